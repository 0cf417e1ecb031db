use crate::analysis::{Analysis, Complexity};
use crate::env::{Directive, EvalRef};
use crate::expr::{
    map_syntax, mk_neutral, mk_rewrite, mk_syntax, Expr, InnerExpr, Literal, NeutralExpr,
    Rewrite, Syntax,
};
use crate::name::{Ident, Level, Qualified};
use crate::op::{Op, Op1};
use crate::quote::Ctx;
use crate::utils::foldr;

/// The bottom-up smart constructor: every node the quoter (or the
/// convert step) produces goes through here, and locally profitable
/// shapes are rewritten on the spot. Rewrites that need another
/// evaluation pass to take effect are queued as `Rewrite` nodes, which
/// set the analysis rewrite bit and flag the declaration for another
/// round.
pub fn build(ctx: &Ctx, node: Syntax<Expr>) -> Expr {
    match node {
        // App spines never nest.
        Syntax::App(head, args) => {
            if let Some(Syntax::App(inner, inner_args)) = head.syntax() {
                let mut all = inner_args.clone();
                all.extend(args);
                return build(ctx, Syntax::App(inner.clone(), all));
            }
            mk_syntax(Syntax::App(head, args))
        }
        // Curried abstractions directly inside one another flatten into
        // one parameter list.
        Syntax::Abs(mut params, body) => {
            if let Some(Syntax::Abs(inner_params, inner_body)) = body.syntax() {
                params.extend(inner_params.clone());
                return mk_syntax(Syntax::Abs(params, inner_body.clone()));
            }
            mk_syntax(Syntax::Abs(params, body))
        }
        Syntax::Let(id, lvl, binding, body) => build_let(ctx, id, lvl, binding, body),
        // Binding a pure effect is just a let.
        Syntax::EffectBind(id, lvl, value, body) => {
            if let Some(Syntax::EffectPure(inner)) = value.syntax() {
                let inner = inner.clone();
                return build_let(ctx, id, lvl, inner, body);
            }
            mk_syntax(Syntax::EffectBind(id, lvl, value, body))
        }
        Syntax::Branch(pairs, default) => simplify_branches(ctx, pairs, default),
        Syntax::PrimOp(Op::Op1(Op1::OpBooleanNot, value)) => build_not(value),
        owise => mk_syntax(owise),
    }
}

fn build_let(
    ctx: &Ctx,
    id: Option<Ident>,
    lvl: Level,
    binding: Expr,
    body: Expr,
) -> Expr {
    // A let whose binding is itself a let chain re-associates so the
    // inner bindings float out in order.
    if let Some(Syntax::Let(inner_id, inner_lvl, inner_binding, inner_body)) = binding.syntax() {
        return mk_rewrite(Rewrite::LetAssoc(
            vec![
                (inner_id.clone(), *inner_lvl, inner_binding.clone()),
                (id, lvl, inner_body.clone()),
            ],
            body,
        ));
    }
    if let InnerExpr::Rewrite {
        node: Rewrite::LetAssoc(entries, inner_body),
        ..
    } = binding.as_ref()
    {
        let mut entries = entries.clone();
        entries.push((id, lvl, inner_body.clone()));
        return mk_rewrite(Rewrite::LetAssoc(entries, body));
    }
    if should_inline_let(ctx, &id, lvl, &binding, &body) {
        return mk_rewrite(Rewrite::Inline(id, lvl, binding, body));
    }
    mk_syntax(Syntax::Let(id, lvl, binding, body))
}

/// The let-inlining policy. A directive on the local wins; otherwise
/// dead bindings always inline, uncaptured cheap-or-single-use bindings
/// inline, abstractions inline unless they are big and shared, and
/// trivial values inline.
pub fn should_inline_let(
    ctx: &Ctx,
    id: &Option<Ident>,
    lvl: Level,
    binding: &Expr,
    body: &Expr,
) -> bool {
    match ctx.directive(&EvalRef::EvalLocal(id.clone(), lvl)) {
        Some(Directive::InlineNever) => return false,
        Some(Directive::InlineAlways) => return true,
        _ => (),
    }
    let usage = body.analysis().usage_of(lvl);
    let b = binding.analysis();
    if usage.count == 0 {
        return true;
    }
    if !usage.captured
        && (usage.count == 1 || (b.complexity <= Complexity::Deref && b.size < 5))
    {
        return true;
    }
    if binding.is_abs() && (usage.count == 1 || b.usages.is_empty() || b.size < 16) {
        return true;
    }
    b.complexity == Complexity::Trivial && b.size < 5
}

fn build_not(value: Expr) -> Expr {
    match value.syntax() {
        Some(Syntax::PrimOp(Op::Op1(Op1::OpBooleanNot, inner))) => inner.clone(),
        Some(Syntax::PrimOp(Op::Op2(op2, lhs, rhs))) => match op2.negate() {
            Some(negated) => mk_syntax(Syntax::PrimOp(Op::Op2(negated, lhs.clone(), rhs.clone()))),
            None => mk_syntax(Syntax::PrimOp(Op::Op1(Op1::OpBooleanNot, value))),
        },
        Some(Syntax::Lit(Literal::LitBoolean(b))) => {
            mk_syntax(Syntax::Lit(Literal::LitBoolean(!b)))
        }
        _ => mk_syntax(Syntax::PrimOp(Op::Op1(Op1::OpBooleanNot, value))),
    }
}

/// A stop pins a reference the evaluator must leave alone for the rest
/// of the optimization of this declaration. It carries no rewrite bit:
/// a stop is a stable outcome, not queued work.
pub fn build_stop(q: Qualified) -> Expr {
    mk_rewrite(Rewrite::Stop(q))
}

/// Branch cleanup, applied until no rule matches:
/// a default that is itself a branch fuses in; arms after a
/// literally-true guard drop; the boolean skeletons
/// `if g then true else false` / `if g then false else true` collapse;
/// and the two-armed `if l .. else if not l .. else fail` drops its
/// unreachable failure.
pub fn simplify_branches(
    ctx: &Ctx,
    mut pairs: Vec<(Expr, Expr)>,
    default: Option<Expr>,
) -> Expr {
    // Fuse a branch sitting in default position.
    if let Some(d) = &default {
        if let Some(Syntax::Branch(inner_pairs, inner_default)) = d.syntax() {
            pairs.extend(inner_pairs.clone());
            let inner_default = inner_default.clone();
            return simplify_branches(ctx, pairs, inner_default);
        }
    }
    // Arms after a literally-true guard are unreachable. The arm
    // itself (and the default) stay put: committing a guard is the
    // evaluator's job, because the chosen body may still fall through
    // to the default from a branch of its own.
    if let Some(pos) = pairs
        .iter()
        .position(|(guard, _)| guard.lit_boolean() == Some(true))
    {
        if pos + 1 < pairs.len() {
            pairs.truncate(pos + 1);
            return simplify_branches(ctx, pairs, default);
        }
    }
    if pairs.len() == 1 {
        let (guard, body) = &pairs[0];
        match (body.lit_boolean(), default.as_ref().and_then(|d| d.lit_boolean())) {
            (Some(true), Some(false)) => return guard.clone(),
            (Some(false), Some(true)) => return build_not(guard.clone()),
            _ => (),
        }
    }
    if pairs.len() == 2 {
        if let Some(rewritten) = drop_refuted_arm(&pairs, &default) {
            let (pairs, default) = rewritten;
            return simplify_branches(ctx, pairs, default);
        }
    }
    mk_syntax(Syntax::Branch(pairs, default))
}

/// `if l then a else if not l then b else fail` can only reach `fail`
/// if `l` is neither true nor false, so the second guard is redundant:
/// `if l then a else b`.
fn drop_refuted_arm(
    pairs: &[(Expr, Expr)],
    default: &Option<Expr>,
) -> Option<(Vec<(Expr, Expr)>, Option<Expr>)> {
    let failing_default = match default {
        Some(d) => matches!(d.syntax(), Some(Syntax::Fail(_))),
        None => false,
    };
    if !failing_default {
        return None;
    }
    let first_lvl = match pairs[0].0.syntax() {
        Some(Syntax::Local(_, lvl)) => *lvl,
        _ => return None,
    };
    let second_lvl = match pairs[1].0.syntax() {
        Some(Syntax::PrimOp(Op::Op1(Op1::OpBooleanNot, inner))) => match inner.syntax() {
            Some(Syntax::Local(_, lvl)) => *lvl,
            _ => return None,
        },
        _ => return None,
    };
    if first_lvl != second_lvl {
        return None;
    }
    Some((
        vec![pairs[0].clone()],
        Some(pairs[1].1.clone()),
    ))
}

/// Compresses a conditional whose body is itself a single-arm,
/// default-less branch: `if g1 then (if g2 then b)` is one arm guarded
/// by `g1 && g2`.
pub fn build_pair(_ctx: &Ctx, guard: Expr, body: Expr) -> (Expr, Expr) {
    if let Some(Syntax::Branch(inner_pairs, None)) = body.syntax() {
        if inner_pairs.len() == 1 {
            let (inner_guard, inner_body) = inner_pairs[0].clone();
            let fused = mk_syntax(Syntax::PrimOp(Op::Op2(
                crate::op::Op2::OpBooleanAnd,
                guard,
                inner_guard,
            )));
            return (fused, inner_body);
        }
    }
    (guard, body)
}

/// Folds a single-arm branch whose body is a boolean literal and whose
/// else-side is a boolean tail into plain boolean operators:
/// `if g then true else e` is `g || e`, and `if g then false else e`
/// is `!g && e`.
pub fn build_branch_cond(ctx: &Ctx, pairs: Vec<(Expr, Expr)>, default: Option<Expr>) -> Expr {
    if pairs.len() == 1 {
        if let Some(els) = &default {
            if is_boolean_tail(els) {
                let (guard, body) = &pairs[0];
                match body.lit_boolean() {
                    Some(true) => {
                        return mk_syntax(Syntax::PrimOp(Op::Op2(
                            crate::op::Op2::OpBooleanOr,
                            guard.clone(),
                            els.clone(),
                        )))
                    }
                    Some(false) => {
                        return mk_syntax(Syntax::PrimOp(Op::Op2(
                            crate::op::Op2::OpBooleanAnd,
                            build_not(guard.clone()),
                            els.clone(),
                        )))
                    }
                    None => (),
                }
            }
        }
    }
    build(ctx, Syntax::Branch(pairs, default))
}

fn is_boolean_tail(e: &Expr) -> bool {
    match e.syntax() {
        Some(Syntax::Lit(Literal::LitBoolean(_)))
        | Some(Syntax::Var(_))
        | Some(Syntax::Local(..))
        | Some(Syntax::PrimOp(_)) => true,
        _ => false,
    }
}

/// Strips the rewrite layer: queued inlines become the lets they were,
/// re-associated chains become right-nested lets, stops become bare
/// references. The result is the canonical IR handed to the emitter
/// and to downstream modules' inliners.
pub fn freeze(expr: &Expr) -> (Analysis, NeutralExpr) {
    let mut analysis = expr.analysis().clone();
    analysis.rewrite = false;
    (analysis, freeze_expr(expr))
}

fn freeze_expr(expr: &Expr) -> NeutralExpr {
    match expr.as_ref() {
        InnerExpr::Syntax { node, .. } => mk_neutral(map_syntax(node, &mut freeze_expr)),
        InnerExpr::Rewrite { node, .. } => match node {
            Rewrite::Inline(id, lvl, binding, body) => mk_neutral(Syntax::Let(
                id.clone(),
                *lvl,
                freeze_expr(binding),
                freeze_expr(body),
            )),
            Rewrite::Stop(q) => mk_neutral(Syntax::Var(q.clone())),
            Rewrite::LetAssoc(entries, body) => foldr(
                |(id, lvl, binding): &(Option<Ident>, Level, Expr), acc: NeutralExpr| {
                    mk_neutral(Syntax::Let(
                        id.clone(),
                        *lvl,
                        freeze_expr(binding),
                        acc,
                    ))
                },
                entries.iter(),
                freeze_expr(body),
            ),
        },
    }
}

#[cfg(test)]
mod rewrite_tests {
    use super::*;
    use crate::env::Directives;
    use crate::name::mk_ident;
    use std::sync::Arc;

    fn ctx() -> Ctx {
        Ctx::new(Arc::new(Directives::new()))
    }

    fn local(lvl: usize) -> Expr {
        mk_syntax(Syntax::Local(None, Level(lvl)))
    }

    fn lit_bool(b: bool) -> Expr {
        mk_syntax(Syntax::Lit(Literal::LitBoolean(b)))
    }

    #[test]
    fn app_spines_flatten() {
        let q = crate::name::mk_unqualified(mk_ident("f"));
        let inner = build(&ctx(), Syntax::App(mk_syntax(Syntax::Var(q)), vec![local(0)]));
        let outer = build(&ctx(), Syntax::App(inner, vec![local(1)]));
        match outer.syntax() {
            Some(Syntax::App(_, args)) => assert_eq!(args.len(), 2),
            owise => panic!("expected App, got {:?}", owise),
        }
    }

    #[test]
    fn abs_chains_flatten() {
        let inner = build(&ctx(), Syntax::Abs(vec![(None, Level(1))], local(1)));
        let outer = build(&ctx(), Syntax::Abs(vec![(None, Level(0))], inner));
        match outer.syntax() {
            Some(Syntax::Abs(params, _)) => assert_eq!(params.len(), 2),
            owise => panic!("expected Abs, got {:?}", owise),
        }
    }

    #[test]
    fn single_use_let_queues_an_inline() {
        let e = build(
            &ctx(),
            Syntax::Let(None, Level(0), lit_bool(true), local(0)),
        );
        assert!(e.analysis().rewrite);
        match e.as_ref() {
            InnerExpr::Rewrite {
                node: Rewrite::Inline(..),
                ..
            } => (),
            _ => panic!("expected a queued inline"),
        }
    }

    #[test]
    fn nested_let_binding_reassociates() {
        let inner = mk_syntax(Syntax::Let(None, Level(0), lit_bool(true), local(0)));
        // Force the outer binding to be the raw nested let.
        let e = build(
            &ctx(),
            Syntax::Let(None, Level(0), inner, local(0)),
        );
        match e.as_ref() {
            InnerExpr::Rewrite {
                node: Rewrite::LetAssoc(entries, _),
                ..
            } => assert_eq!(entries.len(), 2),
            _ => panic!("expected a let-assoc rewrite"),
        }
    }

    #[test]
    fn boolean_skeleton_collapses_to_guard() {
        let guard = local(0);
        let e = simplify_branches(
            &ctx(),
            vec![(guard.clone(), lit_bool(true))],
            Some(lit_bool(false)),
        );
        match e.syntax() {
            Some(Syntax::Local(_, lvl)) => assert_eq!(*lvl, Level(0)),
            owise => panic!("expected the bare guard, got {:?}", owise),
        }
    }

    #[test]
    fn negated_skeleton_collapses_to_not_guard() {
        let e = simplify_branches(
            &ctx(),
            vec![(local(0), lit_bool(false))],
            Some(lit_bool(true)),
        );
        match e.syntax() {
            Some(Syntax::PrimOp(Op::Op1(Op1::OpBooleanNot, _))) => (),
            owise => panic!("expected not guard, got {:?}", owise),
        }
    }

    #[test]
    fn complementary_arms_drop_the_failure_default() {
        let not_l = mk_syntax(Syntax::PrimOp(Op::Op1(Op1::OpBooleanNot, local(0))));
        let fail = mk_syntax(Syntax::Fail(String::from("Failed pattern match")));
        let a = mk_syntax(Syntax::Lit(Literal::LitInt(1)));
        let b = mk_syntax(Syntax::Lit(Literal::LitInt(2)));
        let e = simplify_branches(
            &ctx(),
            vec![(local(0), a), (not_l, b)],
            Some(fail),
        );
        match e.syntax() {
            Some(Syntax::Branch(pairs, Some(default))) => {
                assert_eq!(pairs.len(), 1);
                match default.syntax() {
                    Some(Syntax::Lit(Literal::LitInt(2))) => (),
                    owise => panic!("expected the second body as default, got {:?}", owise),
                }
            }
            owise => panic!("expected a one-armed branch, got {:?}", owise),
        }
    }

    #[test]
    fn double_negation_cancels() {
        let once = build_not(local(0));
        let twice = build_not(once);
        match twice.syntax() {
            Some(Syntax::Local(_, lvl)) => assert_eq!(*lvl, Level(0)),
            owise => panic!("expected the bare local, got {:?}", owise),
        }
    }

    #[test]
    fn freeze_reassociates_let_chains_to_the_right() {
        let entries = vec![
            (Some(mk_ident("a")), Level(0), lit_bool(true)),
            (Some(mk_ident("b")), Level(1), lit_bool(false)),
        ];
        let e = mk_rewrite(Rewrite::LetAssoc(entries, local(1)));
        let (_, frozen) = freeze(&e);
        match frozen.as_ref() {
            Syntax::Let(Some(a), Level(0), _, body) => {
                assert_eq!(a.as_str(), "a");
                match body.as_ref() {
                    Syntax::Let(Some(b), Level(1), _, _) => assert_eq!(b.as_str(), "b"),
                    owise => panic!("expected nested let, got {:?}", owise),
                }
            }
            owise => panic!("expected let chain, got {:?}", owise),
        }
    }

    #[test]
    fn freeze_turns_stops_into_vars() {
        let q = crate::name::mk_unqualified(mk_ident("f"));
        let (_, frozen) = freeze(&build_stop(q.clone()));
        match frozen.as_ref() {
            Syntax::Var(frozen_q) => assert_eq!(*frozen_q, q),
            owise => panic!("expected Var, got {:?}", owise),
        }
    }
}
