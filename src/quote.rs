use std::sync::Arc;

use crate::env::Directives;
use crate::eval::eval;
use crate::expr::{Expr, Literal, Prop, Syntax};
use crate::name::{Ident, Level};
use crate::op::Op;
use crate::rewrite::{build, build_branch_cond, build_pair, build_stop};
use crate::sem::{InnerSem, MkFn, Sem};
use crate::utils::Thunk;

/// Quotation context: the next fresh level (the scope depth at this
/// point of the output term) and the directive table the rewriter
/// consults while rebuilding.
#[derive(Clone)]
pub struct Ctx {
    pub current_level: Level,
    pub directives: Arc<Directives>,
}

impl Ctx {
    pub fn new(directives: Arc<Directives>) -> Ctx {
        Ctx {
            current_level: Level(0),
            directives,
        }
    }

    /// Hands out the binder level for this scope position and the
    /// context for the body underneath it.
    pub fn next_level(&self) -> (Level, Ctx) {
        let lvl = self.current_level;
        let mut deeper = self.clone();
        deeper.current_level = lvl.next();
        (lvl, deeper)
    }

    pub fn directive(&self, r: &crate::env::EvalRef) -> Option<crate::env::Directive> {
        self.directives.get(r).copied()
    }
}

/// Reifies a semantic value back into build IR, invoking the rewriter
/// at every constructor. Closures are entered by feeding them a neutral
/// local at a fresh level.
pub fn quote(ctx: &Ctx, sem: &Sem) -> Expr {
    match sem.as_ref() {
        InnerSem::Lam(id, k) => {
            let (lvl, ctx2) = ctx.next_level();
            let body = quote(
                &ctx2,
                &k.call(InnerSem::NeutLocal(id.clone(), lvl).into()),
            );
            build(ctx, Syntax::Abs(vec![(id.clone(), lvl)], body))
        }
        InnerSem::MkFn(chain) => quote_mk_fn(ctx, chain, false),
        InnerSem::MkEffectFn(chain) => quote_mk_fn(ctx, chain, true),
        InnerSem::Let(id, value, k) => {
            let binding = quote(ctx, value);
            let (lvl, ctx2) = ctx.next_level();
            let body = quote(
                &ctx2,
                &k.call(InnerSem::NeutLocal(id.clone(), lvl).into()),
            );
            build(ctx, Syntax::Let(id.clone(), lvl, binding, body))
        }
        InnerSem::LetRec(group) => {
            let (lvl, ctx2) = ctx.next_level();
            // The cycle is broken here: every member of the group is
            // re-entered under a table of already-forced neutral
            // locals, so sibling references reify as plain locals.
            let neutrals = Arc::new(
                group
                    .bindings
                    .iter()
                    .map(|(id, _)| {
                        (
                            id.clone(),
                            Thunk::pure(InnerSem::NeutLocal(Some(id.clone()), lvl).into()),
                        )
                    })
                    .collect::<Vec<(Ident, Thunk<Sem>)>>(),
            );
            let rec_env = group.env.bind_group(group.lvl, neutrals);
            let bindings = group
                .bindings
                .iter()
                .map(|(id, expr)| (id.clone(), quote(&ctx2, &eval(&rec_env, expr))))
                .collect::<Vec<(Ident, Expr)>>();
            let body = quote(&ctx2, &eval(&rec_env, &group.body));
            build(ctx, Syntax::LetRec(lvl, bindings, body))
        }
        InnerSem::EffectBind(id, value, k) => {
            let bound = quote(ctx, value);
            let (lvl, ctx2) = ctx.next_level();
            let body = quote(
                &ctx2,
                &k.call(InnerSem::NeutLocal(id.clone(), lvl).into()),
            );
            build(ctx, Syntax::EffectBind(id.clone(), lvl, bound, body))
        }
        InnerSem::EffectPure(value) => {
            let inner = quote(ctx, value);
            build(ctx, Syntax::EffectPure(inner))
        }
        InnerSem::Branch(conds, default) => {
            let pairs = conds
                .iter()
                .map(|cond_thunk| {
                    let cond = cond_thunk.force();
                    let guard = quote(ctx, &cond.guard);
                    let body = quote(ctx, &(&*cond.kont)(None));
                    build_pair(ctx, guard, body)
                })
                .collect::<Vec<(Expr, Expr)>>();
            let default = default.as_ref().map(|d| quote(ctx, &d.force()));
            build_branch_cond(ctx, pairs, default)
        }
        InnerSem::NeutLocal(id, lvl) => build(ctx, Syntax::Local(id.clone(), *lvl)),
        InnerSem::NeutVar(q) => build(ctx, Syntax::Var(q.clone())),
        InnerSem::NeutStop(q) => build_stop(q.clone()),
        InnerSem::NeutData(q, ct, ty, tag, fields) => {
            if fields.is_empty() {
                // A constructor not yet applied to anything reifies as
                // a plain reference to it.
                build(ctx, Syntax::Var(q.clone()))
            } else {
                let fields = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), quote(ctx, v)))
                    .collect::<Vec<Prop<Expr>>>();
                build(
                    ctx,
                    Syntax::CtorSaturated(q.clone(), *ct, ty.clone(), tag.clone(), fields),
                )
            }
        }
        InnerSem::NeutCtorDef(_, ct, ty, tag, fields) => build(
            ctx,
            Syntax::CtorDef(*ct, ty.clone(), tag.clone(), fields.clone()),
        ),
        InnerSem::NeutApp(head, args) => {
            let head = quote(ctx, head);
            let args = args.iter().map(|a| quote(ctx, a)).collect::<Vec<Expr>>();
            build(ctx, Syntax::App(head, args))
        }
        InnerSem::NeutUncurriedApp(head, args) => {
            let head = quote(ctx, head);
            let args = args.iter().map(|a| quote(ctx, a)).collect::<Vec<Expr>>();
            build(ctx, Syntax::UncurriedApp(head, args))
        }
        InnerSem::NeutUncurriedEffectApp(head, args) => {
            let head = quote(ctx, head);
            let args = args.iter().map(|a| quote(ctx, a)).collect::<Vec<Expr>>();
            build(ctx, Syntax::UncurriedEffectApp(head, args))
        }
        InnerSem::NeutAccessor(head, acc) => {
            let head = quote(ctx, head);
            build(ctx, Syntax::Accessor(head, acc.clone()))
        }
        InnerSem::NeutUpdate(head, props) => {
            let head = quote(ctx, head);
            let props = props
                .iter()
                .map(|(k, v)| (k.clone(), quote(ctx, v)))
                .collect::<Vec<Prop<Expr>>>();
            build(ctx, Syntax::Update(head, props))
        }
        InnerSem::NeutLit(lit) => {
            let lit = quote_literal(ctx, lit);
            build(ctx, Syntax::Lit(lit))
        }
        InnerSem::NeutPrimOp(op) => {
            let op = match op {
                Op::Op1(op1, a) => Op::Op1(op1.clone(), quote(ctx, a)),
                Op::Op2(op2, l, r) => Op::Op2(*op2, quote(ctx, l), quote(ctx, r)),
            };
            build(ctx, Syntax::PrimOp(op))
        }
        InnerSem::NeutFail(msg) => build(ctx, Syntax::Fail(msg.clone())),
        // Inlining never committed; reify the neutral fallback.
        InnerSem::Extern(_, _, fallback) => quote(ctx, &fallback.force()),
    }
}

fn quote_literal(ctx: &Ctx, lit: &Literal<Sem>) -> Literal<Expr> {
    match lit {
        Literal::LitInt(n) => Literal::LitInt(*n),
        Literal::LitNumber(n) => Literal::LitNumber(*n),
        Literal::LitString(s) => Literal::LitString(s.clone()),
        Literal::LitChar(c) => Literal::LitChar(*c),
        Literal::LitBoolean(b) => Literal::LitBoolean(*b),
        Literal::LitArray(xs) => {
            Literal::LitArray(xs.iter().map(|x| quote(ctx, x)).collect())
        }
        Literal::LitRecord(props) => Literal::LitRecord(
            props
                .iter()
                .map(|(k, v)| (k.clone(), quote(ctx, v)))
                .collect(),
        ),
    }
}

fn quote_mk_fn(ctx: &Ctx, chain: &MkFn, effect: bool) -> Expr {
    let mut params = Vec::new();
    let mut ctx2 = ctx.clone();
    let mut cur = chain.clone();
    loop {
        match cur {
            MkFn::Next(id, f) => {
                let (lvl, deeper) = ctx2.next_level();
                ctx2 = deeper;
                cur = (&*f)(InnerSem::NeutLocal(id.clone(), lvl).into());
                params.push((id, lvl));
            }
            MkFn::Applied(sem) => {
                let body = quote(&ctx2, &sem);
                let node = if effect {
                    Syntax::UncurriedEffectAbs(params, body)
                } else {
                    Syntax::UncurriedAbs(params, body)
                };
                return build(ctx, node);
            }
        }
    }
}
