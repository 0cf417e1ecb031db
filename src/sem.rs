use std::sync::Arc;

use crate::env::Env;
use crate::expr::{Accessor, CtorType, Expr, Literal, Prop};
use crate::name::{Ident, Level, Qualified};
use crate::op::{Op, Op1};
use crate::utils::Thunk;

/// A semantic value: what build IR evaluates to. Closed under thunks;
/// the graph is shared through Arcs because a value can be observed
/// through several branch paths.
///
/// The `Neut*` variants are neutral: stuck on a free variable, an
/// unknown extern, or an operator whose operands are not literal.
/// Everything else still carries computation, either as a host closure
/// (`Lam`, `Let`, the `MkFn` chains) or as suspended branch arms.
#[derive(Clone)]
pub struct Sem(Arc<InnerSem>);

pub enum InnerSem {
    /// A cross-declaration reference holding the spine of pending
    /// applications/projections, and a lazy fallback that reifies the
    /// whole thing as a neutral if inlining never commits.
    Extern(Qualified, Vec<ExternSpine>, Thunk<Sem>),
    Lam(Option<Ident>, Closure),
    MkFn(MkFn),
    MkEffectFn(MkFn),
    Let(Option<Ident>, Sem, Closure),
    LetRec(GroupClosure),
    EffectBind(Option<Ident>, Sem, Closure),
    EffectPure(Sem),
    Branch(Vec<Thunk<SemConditional>>, Option<Thunk<Sem>>),
    NeutLocal(Option<Ident>, Level),
    NeutVar(Qualified),
    NeutStop(Qualified),
    NeutData(Qualified, CtorType, Ident, Ident, Vec<Prop<Sem>>),
    NeutCtorDef(Qualified, CtorType, Ident, Ident, Vec<String>),
    NeutApp(Sem, Vec<Sem>),
    NeutUncurriedApp(Sem, Vec<Sem>),
    NeutUncurriedEffectApp(Sem, Vec<Sem>),
    NeutAccessor(Sem, Accessor),
    NeutUpdate(Sem, Vec<Prop<Sem>>),
    NeutLit(Literal<Sem>),
    NeutPrimOp(Op<Sem>),
    NeutFail(String),
}

impl std::convert::AsRef<InnerSem> for Sem {
    fn as_ref(&self) -> &InnerSem {
        self.0.as_ref()
    }
}

impl From<InnerSem> for Sem {
    fn from(x: InnerSem) -> Sem {
        Sem(Arc::new(x))
    }
}

impl Sem {
    pub fn lit_boolean(&self) -> Option<bool> {
        match self.as_ref() {
            InnerSem::NeutLit(Literal::LitBoolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn lit_string(&self) -> Option<&str> {
        match self.as_ref() {
            InnerSem::NeutLit(Literal::LitString(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Sem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.as_ref() {
            InnerSem::Extern(q, spine, _) => write!(f, "Extern({}, |{}|)", q, spine.len()),
            InnerSem::Lam(..) => write!(f, "Lam"),
            InnerSem::MkFn(_) => write!(f, "MkFn"),
            InnerSem::MkEffectFn(_) => write!(f, "MkEffectFn"),
            InnerSem::Let(..) => write!(f, "Let"),
            InnerSem::LetRec(..) => write!(f, "LetRec"),
            InnerSem::EffectBind(..) => write!(f, "EffectBind"),
            InnerSem::EffectPure(v) => write!(f, "EffectPure({:?})", v),
            InnerSem::Branch(conds, _) => write!(f, "Branch(|{}|)", conds.len()),
            InnerSem::NeutLocal(_, lvl) => write!(f, "NeutLocal({})", lvl),
            InnerSem::NeutVar(q) => write!(f, "NeutVar({})", q),
            InnerSem::NeutStop(q) => write!(f, "NeutStop({})", q),
            InnerSem::NeutData(q, ..) => write!(f, "NeutData({})", q),
            InnerSem::NeutCtorDef(q, ..) => write!(f, "NeutCtorDef({})", q),
            InnerSem::NeutApp(h, args) => write!(f, "NeutApp({:?}, |{}|)", h, args.len()),
            InnerSem::NeutUncurriedApp(h, args) => {
                write!(f, "NeutUncurriedApp({:?}, |{}|)", h, args.len())
            }
            InnerSem::NeutUncurriedEffectApp(h, args) => {
                write!(f, "NeutUncurriedEffectApp({:?}, |{}|)", h, args.len())
            }
            InnerSem::NeutAccessor(e, acc) => write!(f, "NeutAccessor({:?}, {:?})", e, acc),
            InnerSem::NeutUpdate(e, _) => write!(f, "NeutUpdate({:?})", e),
            InnerSem::NeutLit(_) => write!(f, "NeutLit"),
            InnerSem::NeutPrimOp(_) => write!(f, "NeutPrimOp"),
            InnerSem::NeutFail(msg) => write!(f, "NeutFail({})", msg),
        }
    }
}

/// A single-argument host closure over semantic values; the essence of
/// normalization by evaluation. Substitution is function application on
/// the host side.
#[derive(Clone)]
pub struct Closure(Arc<dyn Fn(Sem) -> Sem>);

impl Closure {
    pub fn new(f: impl Fn(Sem) -> Sem + 'static) -> Closure {
        Closure(Arc::new(f))
    }

    pub fn call(&self, v: Sem) -> Sem {
        (&*self.0)(v)
    }
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "<closure>")
    }
}

/// An uncurried closure, represented as a chain: each `Next` consumes
/// one argument, `Applied` is the saturated result. Foreign interop
/// layers use this to coerce curried implementations into flat
/// multi-argument shapes.
#[derive(Clone)]
pub enum MkFn {
    Next(Option<Ident>, Arc<dyn Fn(Sem) -> MkFn>),
    Applied(Sem),
}

impl MkFn {
    pub fn next(id: Option<Ident>, f: impl Fn(Sem) -> MkFn + 'static) -> MkFn {
        MkFn::Next(id, Arc::new(f))
    }
}

/// One arm of a semantic branch: the (already evaluated) guard, and the
/// body as a continuation over the else-chain the body may merge with.
#[derive(Clone)]
pub struct SemConditional {
    pub guard: Sem,
    pub kont: Arc<dyn Fn(Option<Try>) -> Sem>,
}

impl SemConditional {
    pub fn new(guard: Sem, kont: impl Fn(Option<Try>) -> Sem + 'static) -> SemConditional {
        SemConditional {
            guard,
            kont: Arc::new(kont),
        }
    }
}

/// The pending else-chain carried into a committed branch body: the
/// conditionals that would have been tried next, and the fallthrough
/// after them.
#[derive(Clone)]
pub struct Try {
    pub conds: Vec<Thunk<SemConditional>>,
    pub fallback: Option<Thunk<Sem>>,
}

/// A first-order closure over a recursive group: enough to re-enter the
/// right-hand sides and the body under any binding for the group local.
/// Quotation supplies a group of already-forced neutral locals at a
/// fresh level, which is what breaks the cycle.
#[derive(Clone)]
pub struct GroupClosure {
    pub env: Env,
    pub lvl: Level,
    pub bindings: Arc<Vec<(Ident, Expr)>>,
    pub body: Expr,
}

/// One pending step hanging off an extern reference.
#[derive(Debug, Clone)]
pub enum ExternSpine {
    ExternApp(Vec<Sem>),
    ExternAccessor(Accessor),
    ExternPrimOp(Op1),
}

/// Appends application arguments to a spine, coalescing into the
/// trailing `ExternApp` if there is one. A spine with two adjacent
/// `ExternApp`s would defeat every arity-based inlining decision, so
/// all spine growth goes through here.
pub fn snoc_app(mut spine: Vec<ExternSpine>, args: Vec<Sem>) -> Vec<ExternSpine> {
    if args.is_empty() {
        return spine;
    }
    match spine.last_mut() {
        Some(ExternSpine::ExternApp(prev)) => {
            prev.extend(args);
        }
        _ => spine.push(ExternSpine::ExternApp(args)),
    }
    spine
}

#[cfg(test)]
mod sem_tests {
    use super::*;

    fn unit() -> Sem {
        InnerSem::NeutLit(Literal::LitInt(0)).into()
    }

    #[test]
    fn snoc_app_coalesces_adjacent_apps() {
        let spine = snoc_app(Vec::new(), vec![unit()]);
        let spine = snoc_app(spine, vec![unit(), unit()]);
        assert_eq!(spine.len(), 1);
        match &spine[0] {
            ExternSpine::ExternApp(args) => assert_eq!(args.len(), 3),
            owise => panic!("expected ExternApp, got {:?}", owise),
        }
    }

    #[test]
    fn snoc_app_after_accessor_starts_a_new_app() {
        let spine = vec![ExternSpine::ExternAccessor(Accessor::GetProp("f".into()))];
        let spine = snoc_app(spine, vec![unit()]);
        assert_eq!(spine.len(), 2);
    }

    #[test]
    fn snoc_app_ignores_empty_argument_lists() {
        let spine = snoc_app(Vec::new(), Vec::new());
        assert!(spine.is_empty());
    }
}
