use std::sync::Arc;

use crate::env::{Directive, Env, EvalRef, Impl, LocalBinding};
use crate::errors;
use crate::expr::{
    normalize_props, Accessor, Expr, InnerExpr, Literal, NeutralExpr, Prop, Rewrite, Syntax,
};
use crate::analysis::{Analysis, Complexity};
use crate::name::{mk_qualified, Ident, Level, Qualified};
use crate::op::{fold_int_bit, fold_int_num, fold_number_num, Op, Op1, Op2, OpOrd};
use crate::sem::{
    snoc_app, Closure, ExternSpine, GroupClosure, InnerSem, MkFn, Sem, SemConditional, Try,
};
use crate::utils::Thunk;

use InnerSem::*;

/// Interprets build IR into semantic values. Total on well-formed,
/// well-typed IR; an unbound local is a fatal bug in whatever produced
/// the tree.
pub fn eval(env: &Env, expr: &Expr) -> Sem {
    match expr.as_ref() {
        InnerExpr::Syntax { node, .. } => eval_syntax(env, node),
        InnerExpr::Rewrite { node, .. } => eval_rewrite(env, node),
    }
}

fn eval_syntax(env: &Env, node: &Syntax<Expr>) -> Sem {
    // The pending else-chain is meaningful only to a branch in tail
    // position; every other form clears it before descending.
    let cleared;
    let env = match node {
        Syntax::Branch(..) => env,
        _ if env.try_else.is_some() => {
            cleared = env.with_try(None);
            &cleared
        }
        _ => env,
    };
    match node {
        Syntax::Var(q) => eval_extern(env, q, Vec::new()),
        Syntax::Local(id, lvl) => eval_local(env, id, *lvl),
        Syntax::Lit(lit) => NeutLit(eval_literal(env, lit)).into(),
        Syntax::App(head, args) => {
            let head = eval(env, head);
            let args = args.iter().map(|a| eval(env, a)).collect::<Vec<Sem>>();
            eval_app(env, head, args)
        }
        Syntax::Abs(params, body) => eval_abs(env, params, body),
        Syntax::UncurriedAbs(params, body) => {
            let curried = eval_abs(env, params, body);
            MkFn(eval_mk_fn(env, params.len(), curried)).into()
        }
        Syntax::UncurriedEffectAbs(params, body) => {
            let curried = eval_abs(env, params, body);
            MkEffectFn(eval_mk_fn(env, params.len(), curried)).into()
        }
        Syntax::UncurriedApp(head, args) => {
            let head = eval(env, head);
            let args = args.iter().map(|a| eval(env, a)).collect::<Vec<Sem>>();
            eval_uncurried_app(env, head, args, false)
        }
        Syntax::UncurriedEffectApp(head, args) => {
            let head = eval(env, head);
            let args = args.iter().map(|a| eval(env, a)).collect::<Vec<Sem>>();
            eval_uncurried_app(env, head, args, true)
        }
        Syntax::Let(id, lvl, binding, body) => {
            let value = eval(env, binding);
            let env2 = env.clone();
            let lvl = *lvl;
            let body = body.clone();
            Let(
                id.clone(),
                value,
                Closure::new(move |v| eval(&env2.bind_one(lvl, v), &body)),
            )
            .into()
        }
        Syntax::LetRec(lvl, bindings, body) => {
            if bindings.is_empty() {
                errors::empty_rec_group(line!());
            }
            LetRec(GroupClosure {
                env: env.clone(),
                lvl: *lvl,
                bindings: Arc::new(bindings.clone()),
                body: body.clone(),
            })
            .into()
        }
        Syntax::EffectBind(id, lvl, value, body) => {
            let value = eval(env, value);
            let env2 = env.clone();
            let lvl = *lvl;
            let body = body.clone();
            EffectBind(
                id.clone(),
                value,
                Closure::new(move |v| eval(&env2.bind_one(lvl, v), &body)),
            )
            .into()
        }
        Syntax::EffectPure(value) => EffectPure(eval(env, value)).into(),
        Syntax::Accessor(head, acc) => {
            let head = eval(env, head);
            eval_accessor(env, head, acc.clone())
        }
        Syntax::Update(head, props) => {
            let head = eval(env, head);
            let props = props
                .iter()
                .map(|(k, v)| (k.clone(), eval(env, v)))
                .collect::<Vec<Prop<Sem>>>();
            eval_update(env, head, props)
        }
        Syntax::Branch(pairs, default) => eval_branch(env, pairs, default),
        Syntax::PrimOp(op) => {
            let op = match op {
                Op::Op1(op1, a) => Op::Op1(op1.clone(), eval(env, a)),
                Op::Op2(op2, l, r) => Op::Op2(*op2, eval(env, l), eval(env, r)),
            };
            eval_prim_op(env, op)
        }
        Syntax::Fail(msg) => NeutFail(msg.clone()).into(),
        Syntax::CtorDef(ct, ty, tag, fields) => NeutCtorDef(
            mk_qualified(env.current_module.clone(), tag.clone()),
            *ct,
            ty.clone(),
            tag.clone(),
            fields.clone(),
        )
        .into(),
        Syntax::CtorSaturated(q, ct, ty, tag, fields) => NeutData(
            q.clone(),
            *ct,
            ty.clone(),
            tag.clone(),
            fields
                .iter()
                .map(|(k, v)| (k.clone(), eval(env, v)))
                .collect(),
        )
        .into(),
    }
}

fn eval_rewrite(env: &Env, node: &Rewrite) -> Sem {
    match node {
        // The queued inline: the binding goes straight into the scope,
        // so every occurrence resolves to the value itself and the let
        // disappears.
        Rewrite::Inline(_, lvl, binding, body) => {
            let value = eval(env, binding);
            eval(&env.bind_one(*lvl, value), body)
        }
        Rewrite::LetAssoc(bindings, body) => eval_let_assoc(env, bindings, body),
        Rewrite::Stop(q) => NeutStop(q.clone()).into(),
    }
}

fn eval_let_assoc(env: &Env, bindings: &[(Option<Ident>, Level, Expr)], body: &Expr) -> Sem {
    match bindings.split_first() {
        None => eval(env, body),
        Some(((id, lvl, binding), rest)) => {
            let value = eval(env, binding);
            let env2 = env.with_try(None);
            let lvl = *lvl;
            let rest = rest.to_vec();
            let body = body.clone();
            Let(
                id.clone(),
                value,
                Closure::new(move |v| eval_let_assoc(&env2.bind_one(lvl, v), &rest, &body)),
            )
            .into()
        }
    }
}

fn eval_local(env: &Env, id: &Option<Ident>, lvl: Level) -> Sem {
    match env.lookup_local(lvl) {
        Some(LocalBinding::One(sem)) => sem.clone(),
        Some(LocalBinding::Group(group)) => {
            let ident = match id {
                Some(ident) => ident,
                None => errors::unbound_local(line!(), lvl),
            };
            match group.iter().find(|(member, _)| member == ident) {
                Some((_, thunk)) => thunk.force(),
                None => errors::unbound_group_member(line!(), lvl, ident),
            }
        }
        None => errors::unbound_local(line!(), lvl),
    }
}

fn eval_literal(env: &Env, lit: &Literal<Expr>) -> Literal<Sem> {
    match lit {
        Literal::LitInt(n) => Literal::LitInt(*n),
        Literal::LitNumber(n) => Literal::LitNumber(*n),
        Literal::LitString(s) => Literal::LitString(s.clone()),
        Literal::LitChar(c) => Literal::LitChar(*c),
        Literal::LitBoolean(b) => Literal::LitBoolean(*b),
        Literal::LitArray(xs) => Literal::LitArray(xs.iter().map(|x| eval(env, x)).collect()),
        Literal::LitRecord(props) => {
            // Children are evaluated in declaration order; only then is
            // the field list canonicalized.
            let evaled = props
                .iter()
                .map(|(k, v)| (k.clone(), eval(env, v)))
                .collect::<Vec<Prop<Sem>>>();
            Literal::LitRecord(normalize_props(evaled))
        }
    }
}

fn eval_abs(env: &Env, params: &[(Option<Ident>, Level)], body: &Expr) -> Sem {
    if params.is_empty() {
        return eval(env, body);
    }
    eval_abs_at(env.clone(), Arc::new(params.to_vec()), 0, body.clone())
}

fn eval_abs_at(
    env: Env,
    params: Arc<Vec<(Option<Ident>, Level)>>,
    idx: usize,
    body: Expr,
) -> Sem {
    let (id, lvl) = params[idx].clone();
    let last = idx + 1 == params.len();
    Lam(
        id,
        Closure::new(move |v| {
            let env2 = env.bind_one(lvl, v);
            if last {
                eval(&env2, &body)
            } else {
                eval_abs_at(env2, params.clone(), idx + 1, body.clone())
            }
        }),
    )
    .into()
}

/// Application reduction. A lambda head consumes one argument through a
/// preserved let (so the argument stays shared across the closure
/// body); an extern head grows its spine; an application slides under a
/// preserved let; anything else is stuck.
pub fn eval_app(env: &Env, head: Sem, args: Vec<Sem>) -> Sem {
    if args.is_empty() {
        return head;
    }
    match head.as_ref() {
        Lam(_, k) => {
            let mut rest = args;
            let arg = rest.remove(0);
            let env2 = env.clone();
            let k = k.clone();
            Let(
                None,
                arg,
                Closure::new(move |v| eval_app(&env2, k.call(v), rest.clone())),
            )
            .into()
        }
        Extern(q, spine, _) => {
            let mut rest = args;
            let arg = rest.remove(0);
            let grown = eval_extern(env, q, snoc_app(spine.clone(), vec![arg]));
            eval_app(env, grown, rest)
        }
        Let(id, value, k) => {
            let env2 = env.clone();
            let k = k.clone();
            Let(
                id.clone(),
                value.clone(),
                Closure::new(move |v| {
                    let env3 = env2.clone();
                    let args = args.clone();
                    Let(
                        None,
                        k.call(v),
                        Closure::new(move |f| eval_app(&env3, f, args.clone())),
                    )
                    .into()
                }),
            )
            .into()
        }
        _ => mk_neut_app(head, args),
    }
}

/// `NeutApp` spines never nest; re-application extends the spine.
fn mk_neut_app(head: Sem, args: Vec<Sem>) -> Sem {
    if args.is_empty() {
        return head;
    }
    match head.as_ref() {
        NeutApp(inner, prev) => {
            let mut all = prev.clone();
            all.extend(args);
            NeutApp(inner.clone(), all).into()
        }
        _ => NeutApp(head, args).into(),
    }
}

fn eval_uncurried_app(env: &Env, head: Sem, args: Vec<Sem>, effect: bool) -> Sem {
    eval_assoc_let(
        env,
        head,
        Arc::new(move |_env: &Env, head: Sem| {
            let chain = match (head.as_ref(), effect) {
                (MkFn(chain), false) => Some(chain.clone()),
                (MkEffectFn(chain), true) => Some(chain.clone()),
                _ => None,
            };
            match chain.and_then(|chain| apply_mk_fn(chain, &args)) {
                Some(sem) => sem,
                None if effect => NeutUncurriedEffectApp(head, args.clone()).into(),
                None => NeutUncurriedApp(head, args.clone()).into(),
            }
        }),
    )
}

/// Feeds a flat argument list through an uncurried chain. `None` when
/// the arity does not line up; the caller leaves the call stuck.
fn apply_mk_fn(chain: MkFn, args: &[Sem]) -> Option<Sem> {
    let mut cur = chain;
    let mut idx = 0usize;
    loop {
        match cur {
            MkFn::Next(_, f) => {
                if idx < args.len() {
                    cur = (&*f)(args[idx].clone());
                    idx += 1;
                } else {
                    return None;
                }
            }
            MkFn::Applied(sem) => {
                return if idx == args.len() { Some(sem) } else { None };
            }
        }
    }
}

/// Lifts a semantic value into an `n`-ary uncurried closure: lambdas
/// peel off directly, anything else gets a synthetic parameter applied
/// through `eval_app`.
pub fn eval_mk_fn(env: &Env, n: usize, sem: Sem) -> MkFn {
    if n == 0 {
        return MkFn::Applied(sem);
    }
    match sem.as_ref() {
        Lam(id, k) => {
            let env = env.clone();
            let k = k.clone();
            MkFn::next(id.clone(), move |a| eval_mk_fn(&env, n - 1, k.call(a)))
        }
        _ => {
            let env = env.clone();
            MkFn::next(None, move |a| {
                let applied = eval_app(&env, sem.clone(), vec![a]);
                eval_mk_fn(&env, n - 1, applied)
            })
        }
    }
}

type AssocK = Arc<dyn Fn(&Env, Sem) -> Sem>;

/// Pushes an operation under any preserved lets wrapping its head, so
/// `(let v in e).f` becomes `let v in e.f` and folding can see `e`.
fn eval_assoc_let(env: &Env, sem: Sem, f: AssocK) -> Sem {
    match sem.as_ref() {
        Let(id, value, k) => {
            let env2 = env.clone();
            let k = k.clone();
            Let(
                id.clone(),
                value.clone(),
                Closure::new(move |v| eval_assoc_let(&env2, k.call(v), f.clone())),
            )
            .into()
        }
        _ => (&*f)(env, sem),
    }
}

pub fn eval_accessor(env: &Env, head: Sem, acc: Accessor) -> Sem {
    eval_assoc_let(
        env,
        head,
        Arc::new(move |env: &Env, head: Sem| match (head.as_ref(), &acc) {
            (Extern(q, spine, _), _) => {
                let mut spine = spine.clone();
                spine.push(ExternSpine::ExternAccessor(acc.clone()));
                eval_extern(env, q, spine)
            }
            (NeutLit(Literal::LitRecord(props)), Accessor::GetProp(key)) => {
                match props.iter().find(|(k, _)| k == key) {
                    Some((_, value)) => value.clone(),
                    None => NeutAccessor(head.clone(), acc.clone()).into(),
                }
            }
            (NeutLit(Literal::LitArray(values)), Accessor::GetIndex(idx)) => {
                match values.get(*idx) {
                    Some(value) => value.clone(),
                    None => NeutAccessor(head.clone(), acc.clone()).into(),
                }
            }
            (NeutData(_, _, _, _, fields), Accessor::GetOffset(idx)) => match fields.get(*idx) {
                Some((_, value)) => value.clone(),
                None => NeutAccessor(head.clone(), acc.clone()).into(),
            },
            _ => NeutAccessor(head, acc.clone()).into(),
        }),
    )
}

pub fn eval_update(env: &Env, head: Sem, props: Vec<Prop<Sem>>) -> Sem {
    eval_assoc_let(
        env,
        head,
        Arc::new(move |_env: &Env, head: Sem| match head.as_ref() {
            NeutLit(Literal::LitRecord(base)) => {
                let mut merged = props.clone();
                merged.extend(base.clone());
                NeutLit(Literal::LitRecord(normalize_props(merged))).into()
            }
            _ => NeutUpdate(head, normalize_props(props.clone())).into(),
        }),
    )
}

fn eval_branch(env: &Env, pairs: &[(Expr, Expr)], default: &Option<Expr>) -> Sem {
    let conds = pairs
        .iter()
        .map(|(guard, body)| {
            let env = env.clone();
            let guard = guard.clone();
            let body = body.clone();
            Thunk::defer(move || {
                let guard_sem = eval(&env.with_try(None), &guard);
                let env = env.clone();
                SemConditional::new(guard_sem, move |try_else| {
                    eval(&env.with_try(try_else), &body)
                })
            })
        })
        .collect::<Vec<Thunk<SemConditional>>>();
    let fallthrough = match default {
        Some(default) => {
            let env = env.with_try(None);
            let default = default.clone();
            Some(Thunk::defer(move || eval(&env, &default)))
        }
        // No syntactic default: the enclosing pattern group's pending
        // else-chain is the fallthrough.
        None => env.try_else.clone().map(try_to_thunk),
    };
    eval_branches(env, conds, fallthrough)
}

fn try_to_thunk(try_else: Try) -> Thunk<Sem> {
    Thunk::defer(move || {
        if try_else.conds.is_empty() {
            match try_else.fallback {
                Some(fallback) => fallback.force(),
                None => NeutFail(String::from("Failed pattern match")).into(),
            }
        } else {
            Branch(try_else.conds, try_else.fallback).into()
        }
    })
}

/// Walks the conditionals in declaration order. A literally-true guard
/// commits its branch; the branch's continuation receives the
/// conditionals that would have been tried after it, so pattern groups
/// inside the committed body can keep merging against them.
pub fn eval_branches(
    _env: &Env,
    conds: Vec<Thunk<SemConditional>>,
    default: Option<Thunk<Sem>>,
) -> Sem {
    let mut kept: Vec<Thunk<SemConditional>> = Vec::new();
    let mut fallthrough = default;
    let mut iter = conds.into_iter();
    while let Some(cond_thunk) = iter.next() {
        let cond = cond_thunk.force();
        match cond.guard.lit_boolean() {
            Some(true) => {
                let remaining = iter.collect::<Vec<Thunk<SemConditional>>>();
                let try_else = Try {
                    conds: remaining,
                    fallback: fallthrough.clone(),
                };
                let kont = cond.kont.clone();
                fallthrough = Some(Thunk::defer(move || (&*kont)(Some(try_else))));
                break;
            }
            Some(false) => continue,
            None => kept.push(cond_thunk),
        }
    }
    if kept.is_empty() {
        match fallthrough {
            Some(fallthrough) => fallthrough.force(),
            None => NeutFail(String::from("Failed pattern match")).into(),
        }
    } else {
        Branch(kept, fallthrough).into()
    }
}

pub fn eval_prim_op(env: &Env, op: Op<Sem>) -> Sem {
    match op {
        Op::Op1(op1, head) => {
            // A unary operator on a pending extern rides the spine, so
            // the inliner still sees the whole chain.
            if let Extern(q, spine, _) = head.as_ref() {
                let mut spine = spine.clone();
                spine.push(ExternSpine::ExternPrimOp(op1.clone()));
                return eval_extern(env, q, spine);
            }
            eval_assoc_let(
                env,
                head,
                Arc::new(move |_env: &Env, head: Sem| fold_op1(&op1, head)),
            )
        }
        Op::Op2(op2, lhs, rhs) => {
            let env2 = env.clone();
            eval_assoc_let(
                env,
                lhs,
                Arc::new(move |_env: &Env, lhs: Sem| {
                    let rhs = rhs.clone();
                    let lhs2 = lhs.clone();
                    eval_assoc_let(
                        &env2,
                        rhs,
                        Arc::new(move |_env: &Env, rhs: Sem| fold_op2(op2, lhs2.clone(), rhs)),
                    )
                }),
            )
        }
    }
}

fn fold_op1(op1: &Op1, head: Sem) -> Sem {
    match (op1, head.as_ref()) {
        (Op1::OpBooleanNot, _) => fold_not(head),
        (Op1::OpIntBitNot, NeutLit(Literal::LitInt(n))) => NeutLit(Literal::LitInt(!n)).into(),
        (Op1::OpIntNegate, NeutLit(Literal::LitInt(n))) => match n.checked_neg() {
            Some(negated) => NeutLit(Literal::LitInt(negated)).into(),
            None => NeutPrimOp(Op::Op1(op1.clone(), head.clone())).into(),
        },
        (Op1::OpNumberNegate, NeutLit(Literal::LitNumber(n))) => {
            NeutLit(Literal::LitNumber(-n)).into()
        }
        (Op1::OpArrayLength, NeutLit(Literal::LitArray(values))) => {
            NeutLit(Literal::LitInt(values.len() as i32)).into()
        }
        (Op1::OpIsTag(q), NeutData(tag, ..)) => NeutLit(Literal::LitBoolean(q == tag)).into(),
        _ => NeutPrimOp(Op::Op1(op1.clone(), head)).into(),
    }
}

fn fold_not(head: Sem) -> Sem {
    if let Some(b) = head.lit_boolean() {
        return NeutLit(Literal::LitBoolean(!b)).into();
    }
    match head.as_ref() {
        // not (not e)
        NeutPrimOp(Op::Op1(Op1::OpBooleanNot, inner)) => inner.clone(),
        // not (a <op> b) folds into the negated comparison at the leaf,
        // so equivalent subexpressions collapse to one shape.
        NeutPrimOp(Op::Op2(op2, lhs, rhs)) => match op2.negate() {
            Some(negated) => NeutPrimOp(Op::Op2(negated, lhs.clone(), rhs.clone())).into(),
            None => NeutPrimOp(Op::Op1(Op1::OpBooleanNot, head.clone())).into(),
        },
        _ => NeutPrimOp(Op::Op1(Op1::OpBooleanNot, head)).into(),
    }
}

fn fold_op2(op2: Op2, lhs: Sem, rhs: Sem) -> Sem {
    let stuck = |lhs: Sem, rhs: Sem| -> Sem { NeutPrimOp(Op::Op2(op2, lhs, rhs)).into() };
    match op2 {
        Op2::OpBooleanAnd => match (lhs.lit_boolean(), rhs.lit_boolean()) {
            (Some(true), _) => rhs,
            (Some(false), _) => lhs,
            (_, Some(true)) => lhs,
            (_, Some(false)) => rhs,
            _ => stuck(lhs, rhs),
        },
        Op2::OpBooleanOr => match (lhs.lit_boolean(), rhs.lit_boolean()) {
            (Some(true), _) => lhs,
            (Some(false), _) => rhs,
            (_, Some(true)) => rhs,
            (_, Some(false)) => lhs,
            _ => stuck(lhs, rhs),
        },
        Op2::OpBooleanOrd(ord) => match (lhs.lit_boolean(), rhs.lit_boolean()) {
            (Some(l), Some(r)) => NeutLit(Literal::LitBoolean(ord.fold(&l, &r))).into(),
            // Equality against a boolean literal folds to the other
            // operand, or its negation.
            (Some(lit), None) | (None, Some(lit)) => {
                let other = if lhs.lit_boolean().is_some() {
                    rhs.clone()
                } else {
                    lhs.clone()
                };
                match ord {
                    OpOrd::OpEq => {
                        if lit {
                            other
                        } else {
                            fold_not(other)
                        }
                    }
                    OpOrd::OpNotEq => {
                        if lit {
                            fold_not(other)
                        } else {
                            other
                        }
                    }
                    _ => stuck(lhs, rhs),
                }
            }
            _ => stuck(lhs, rhs),
        },
        Op2::OpIntOrd(ord) => match (lhs.as_ref(), rhs.as_ref()) {
            (NeutLit(Literal::LitInt(l)), NeutLit(Literal::LitInt(r))) => {
                NeutLit(Literal::LitBoolean(ord.fold(l, r))).into()
            }
            _ => stuck(lhs, rhs),
        },
        Op2::OpCharOrd(ord) => match (lhs.as_ref(), rhs.as_ref()) {
            (NeutLit(Literal::LitChar(l)), NeutLit(Literal::LitChar(r))) => {
                NeutLit(Literal::LitBoolean(ord.fold(l, r))).into()
            }
            _ => stuck(lhs, rhs),
        },
        Op2::OpStringOrd(ord) => match (lhs.as_ref(), rhs.as_ref()) {
            (NeutLit(Literal::LitString(l)), NeutLit(Literal::LitString(r))) => {
                NeutLit(Literal::LitBoolean(ord.fold(l, r))).into()
            }
            _ => stuck(lhs, rhs),
        },
        Op2::OpNumberOrd(ord) => match (lhs.as_ref(), rhs.as_ref()) {
            (NeutLit(Literal::LitNumber(l)), NeutLit(Literal::LitNumber(r))) => {
                NeutLit(Literal::LitBoolean(ord.fold(l, r))).into()
            }
            _ => stuck(lhs, rhs),
        },
        Op2::OpIntBitAnd
        | Op2::OpIntBitOr
        | Op2::OpIntBitXor
        | Op2::OpIntBitShiftLeft
        | Op2::OpIntBitShiftRight
        | Op2::OpIntBitZeroFillShiftRight => match (lhs.as_ref(), rhs.as_ref()) {
            (NeutLit(Literal::LitInt(l)), NeutLit(Literal::LitInt(r))) => {
                match fold_int_bit(op2, *l, *r) {
                    Some(folded) => NeutLit(Literal::LitInt(folded)).into(),
                    None => stuck(lhs.clone(), rhs.clone()),
                }
            }
            _ => stuck(lhs, rhs),
        },
        Op2::OpIntNum(num) => match (lhs.as_ref(), rhs.as_ref()) {
            (NeutLit(Literal::LitInt(l)), NeutLit(Literal::LitInt(r))) => {
                match fold_int_num(num, *l, *r) {
                    Some(folded) => NeutLit(Literal::LitInt(folded)).into(),
                    // Not representable in the 32-bit domain: the
                    // emitter decides what the target runtime does.
                    None => stuck(lhs.clone(), rhs.clone()),
                }
            }
            _ => stuck(lhs, rhs),
        },
        Op2::OpNumberNum(num) => match (lhs.as_ref(), rhs.as_ref()) {
            (NeutLit(Literal::LitNumber(l)), NeutLit(Literal::LitNumber(r))) => {
                NeutLit(Literal::LitNumber(fold_number_num(num, *l, *r))).into()
            }
            _ => stuck(lhs, rhs),
        },
        Op2::OpStringAppend => fold_string_append(lhs, rhs),
    }
}

/// String append folds adjacent literal runs up to two nodes deep on
/// either side, keeping the remaining parts left-associated:
/// `"a" ++ ("b" ++ z)` becomes `"ab" ++ z`, and
/// `(x ++ "a") ++ ("b" ++ z)` becomes `(x ++ "ab") ++ z`.
fn fold_string_append(lhs: Sem, rhs: Sem) -> Sem {
    let append = |l: Sem, r: Sem| -> Sem {
        NeutPrimOp(Op::Op2(Op2::OpStringAppend, l, r)).into()
    };
    let lit = |s: String| -> Sem { NeutLit(Literal::LitString(s)).into() };

    enum Shape {
        Lit(String),
        LitLeft(String, Sem),
        LitRight(Sem, String),
        Opaque,
    }
    let shape = |sem: &Sem| -> Shape {
        if let Some(s) = sem.lit_string() {
            return Shape::Lit(String::from(s));
        }
        if let NeutPrimOp(Op::Op2(Op2::OpStringAppend, l, r)) = sem.as_ref() {
            if let Some(s) = l.lit_string() {
                return Shape::LitLeft(String::from(s), r.clone());
            }
            if let Some(s) = r.lit_string() {
                return Shape::LitRight(l.clone(), String::from(s));
            }
        }
        Shape::Opaque
    };

    match (shape(&lhs), shape(&rhs)) {
        (Shape::Lit(l), Shape::Lit(r)) => lit(l + &r),
        (Shape::Lit(l), _) if l.is_empty() => rhs,
        (_, Shape::Lit(r)) if r.is_empty() => lhs,
        (Shape::Lit(l), Shape::LitLeft(r, tail)) => append(lit(l + &r), tail),
        (Shape::LitRight(head, l), Shape::Lit(r)) => append(head, lit(l + &r)),
        (Shape::LitRight(head, l), Shape::LitLeft(r, tail)) => {
            append(append(head, lit(l + &r)), tail)
        }
        _ => append(lhs, rhs),
    }
}

/// Extern dispatch: a directive can pin the reference (or one of its
/// fields) as a stop; otherwise the foreign-semantics table gets first
/// refusal, then the implementation store. A miss leaves a pending
/// extern whose neutral reification is computed only if nothing ever
/// commits.
pub fn eval_extern(env: &Env, q: &Qualified, spine: Vec<ExternSpine>) -> Sem {
    if spine.is_empty() {
        if env.directive(&EvalRef::EvalExtern(q.clone(), None)) == Some(Directive::InlineNever) {
            return NeutStop(q.clone()).into();
        }
    }
    if let [ExternSpine::ExternAccessor(acc)] = spine.as_slice() {
        if env.directive(&EvalRef::EvalExtern(q.clone(), Some(acc.clone())))
            == Some(Directive::InlineNever)
        {
            return NeutAccessor(NeutStop(q.clone()).into(), acc.clone()).into();
        }
    }
    if let Some(hook) = env.foreign.get(q) {
        if let Some(sem) = (&**hook)(env, q, &spine) {
            return sem;
        }
    }
    if let Some((analysis, implementation)) = env.lookup_implementation(q) {
        let analysis = analysis.clone();
        let implementation = implementation.clone();
        if let Some(sem) = eval_extern_from_impl(env, q, &analysis, &implementation, &spine) {
            return sem;
        }
    }
    let fallback_q = q.clone();
    let fallback_spine = spine.clone();
    Extern(
        q.clone(),
        spine,
        Thunk::defer(move || neutralize(NeutVar(fallback_q).into(), &fallback_spine)),
    )
    .into()
}

/// Reifies a pending extern as a neutral by replaying its spine onto a
/// bare `NeutVar`.
fn neutralize(base: Sem, spine: &[ExternSpine]) -> Sem {
    spine.iter().fold(base, |acc, step| match step {
        ExternSpine::ExternApp(args) => mk_neut_app(acc, args.clone()),
        ExternSpine::ExternAccessor(acc_step) => NeutAccessor(acc, acc_step.clone()).into(),
        ExternSpine::ExternPrimOp(op1) => NeutPrimOp(Op::Op1(op1.clone(), acc)).into(),
    })
}

fn eval_extern_from_impl(
    env: &Env,
    q: &Qualified,
    analysis: &Analysis,
    implementation: &Impl,
    spine: &[ExternSpine],
) -> Option<Sem> {
    match implementation {
        // A constructor with fields must stay a pending extern until
        // its whole argument list arrives on the spine; committing to a
        // bare `NeutData` early would strand later arguments outside
        // it. A nullary constructor is already a value.
        Impl::ImplCtor(ct, ty, tag, fields) => match spine {
            [] if fields.is_empty() => Some(
                NeutData(q.clone(), *ct, ty.clone(), tag.clone(), Vec::new()).into(),
            ),
            [ExternSpine::ExternApp(args)] if args.len() == fields.len() => Some(
                NeutData(
                    q.clone(),
                    *ct,
                    ty.clone(),
                    tag.clone(),
                    fields.iter().cloned().zip(args.iter().cloned()).collect(),
                )
                .into(),
            ),
            _ => None,
        },
        Impl::ImplExpr(group, expr) => {
            if spine.is_empty() {
                if let Syntax::Var(_) = expr.as_ref() {
                    return Some(eval_inlined(env, q, expr));
                }
                if let Syntax::Lit(_) = expr.as_ref() {
                    if group.is_empty() && should_inline_extern_literal(env, q, analysis) {
                        return Some(eval_inlined(env, q, expr));
                    }
                }
                return None;
            }
            match spine.split_first() {
                Some((ExternSpine::ExternApp(args), rest))
                    if group.is_empty()
                        && should_inline_extern_app(env, q, None, analysis, args.len()) =>
                {
                    let inlined = eval_inlined(env, q, expr);
                    let applied = eval_app(env, inlined, args.clone());
                    Some(apply_spine(env, applied, rest))
                }
                _ => None,
            }
        }
        Impl::ImplDict(group, props) => match spine.split_first() {
            Some((ExternSpine::ExternAccessor(Accessor::GetProp(key)), rest)) => {
                let (field_analysis, field_expr) = props
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, entry)| entry)?;
                let acc = Accessor::GetProp(key.clone());
                let committed = match rest.split_first() {
                    Some((ExternSpine::ExternApp(args), tail)) => {
                        if !should_inline_extern_app(
                            env,
                            q,
                            Some(acc),
                            field_analysis,
                            args.len(),
                        ) {
                            return None;
                        }
                        // The stop keeps a mutually recursive group
                        // from unfolding into itself through its own
                        // dictionary.
                        let env2 = env.add_stops(group);
                        let inlined = eval_inlined(&env2, q, field_expr);
                        let applied = eval_app(&env2, inlined, args.clone());
                        apply_spine(&env2, applied, tail)
                    }
                    _ => {
                        if !should_inline_extern_accessor(env, q, acc, field_analysis) {
                            return None;
                        }
                        let env2 = env.add_stops(group);
                        let inlined = eval_inlined(&env2, q, field_expr);
                        apply_spine(&env2, inlined, rest)
                    }
                };
                Some(committed)
            }
            _ => None,
        },
    }
}

/// Evaluates a published neutral implementation in a fresh scope under
/// its defining module.
fn eval_inlined(env: &Env, q: &Qualified, expr: &NeutralExpr) -> Sem {
    let mut env2 = env.clone();
    env2.locals = Vec::new();
    env2.try_else = None;
    if let Some(m) = &q.module {
        env2.current_module = m.clone();
    }
    eval(&env2, &crate::expr::reify_neutral(expr))
}

fn apply_spine(env: &Env, sem: Sem, spine: &[ExternSpine]) -> Sem {
    spine.iter().fold(sem, |acc, step| match step {
        ExternSpine::ExternApp(args) => eval_app(env, acc, args.clone()),
        ExternSpine::ExternAccessor(acc_step) => eval_accessor(env, acc, acc_step.clone()),
        ExternSpine::ExternPrimOp(op1) => eval_prim_op(env, Op::Op1(op1.clone(), acc)),
    })
}

fn lookup_extern_directive(
    env: &Env,
    q: &Qualified,
    acc: Option<Accessor>,
) -> Option<Directive> {
    env.directive(&EvalRef::EvalExtern(q.clone(), acc))
}

pub fn should_inline_extern_app(
    env: &Env,
    q: &Qualified,
    acc: Option<Accessor>,
    analysis: &Analysis,
    num_args: usize,
) -> bool {
    match lookup_extern_directive(env, q, acc) {
        Some(Directive::InlineNever) => false,
        Some(Directive::InlineAlways) => true,
        Some(Directive::InlineArity(n)) => num_args >= n,
        None => {
            (analysis.complexity <= Complexity::Deref && analysis.size < 16)
                || (!analysis.args.is_empty()
                    && num_args >= analysis.args.len()
                    && analysis.size < 64
                    && analysis
                        .args
                        .iter()
                        .all(|usage| usage.count <= 1 && !usage.captured))
        }
    }
}

pub fn should_inline_extern_literal(env: &Env, q: &Qualified, analysis: &Analysis) -> bool {
    match lookup_extern_directive(env, q, None) {
        Some(Directive::InlineNever) => false,
        Some(Directive::InlineAlways) => true,
        _ => analysis.complexity <= Complexity::Deref && analysis.size < 32,
    }
}

pub fn should_inline_extern_accessor(
    env: &Env,
    q: &Qualified,
    acc: Accessor,
    analysis: &Analysis,
) -> bool {
    match lookup_extern_directive(env, q, Some(acc)) {
        Some(Directive::InlineNever) => false,
        Some(Directive::InlineAlways) => true,
        _ => analysis.complexity <= Complexity::Deref && analysis.size < 16,
    }
}
