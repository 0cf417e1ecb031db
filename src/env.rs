use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::analysis::Analysis;
use crate::expr::{Accessor, CtorType, NeutralExpr};
use crate::name::{Ident, Level, ModuleName, Qualified};
use crate::sem::{ExternSpine, Sem, Try};
use crate::utils::Thunk;

/// What a level resolves to during evaluation: a single value, or a
/// recursive group addressed by member ident. Group members are thunks
/// so a right-hand side may mention its siblings without forcing an
/// evaluation order.
#[derive(Clone)]
pub enum LocalBinding {
    One(Sem),
    Group(Arc<Vec<(Ident, Thunk<Sem>)>>),
}

/// An external override of the inlining policy for one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    InlineNever,
    InlineAlways,
    InlineArity(usize),
}

/// What a directive attaches to: a global (optionally at one of its
/// record fields), or a local binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EvalRef {
    EvalExtern(Qualified, Option<Accessor>),
    EvalLocal(Option<Ident>, Level),
}

pub type Directives = HashMap<EvalRef, Directive>;

/// Hand-written semantics for primitives the optimizer must understand
/// beyond what their compiled implementations expose. Consulted before
/// the implementation store; a hit short-circuits everything else.
pub type ForeignEval = Arc<dyn Fn(&Env, &Qualified, &[ExternSpine]) -> Option<Sem>>;
pub type ForeignSemantics = Arc<HashMap<Qualified, ForeignEval>>;

pub fn no_foreign() -> ForeignSemantics {
    Arc::new(HashMap::new())
}

/// The published shape of an optimized top-level declaration; what a
/// later module's inliner gets to look at. `group` is the set of
/// globals in the declaration's recursive binding group, empty for a
/// non-recursive declaration.
#[derive(Debug, Clone)]
pub enum Impl {
    ImplExpr(Arc<HashSet<Qualified>>, NeutralExpr),
    /// A literal record binding, split per field so class dictionaries
    /// inline one member at a time.
    ImplDict(
        Arc<HashSet<Qualified>>,
        Vec<(String, (Analysis, NeutralExpr))>,
    ),
    /// The declaration is a constructor definition.
    ImplCtor(CtorType, Ident, Ident, Vec<String>),
}

pub type Implementations = Arc<HashMap<Qualified, (Analysis, Impl)>>;

pub fn no_implementations() -> Implementations {
    Arc::new(HashMap::new())
}

/// Everything evaluation reads: the current module (for qualifying
/// constructor names), the foreign-semantics table, the implementation
/// store built up by the driver, the local scope, inline directives,
/// and the pending else-chain for branch merging.
///
/// Locals are an ordered sequence searched back-to-front, which gives
/// exact shadowing for equal levels; that is what keeps bodies valid
/// when let-associativity moves them across binders.
#[derive(Clone)]
pub struct Env {
    pub current_module: ModuleName,
    pub foreign: ForeignSemantics,
    pub implementations: Implementations,
    pub locals: Vec<(Level, LocalBinding)>,
    pub directives: Arc<Directives>,
    pub try_else: Option<Try>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "<env {} |{}|>", self.current_module, self.locals.len())
    }
}

impl Env {
    pub fn new(
        current_module: ModuleName,
        foreign: ForeignSemantics,
        implementations: Implementations,
        directives: Arc<Directives>,
    ) -> Env {
        Env {
            current_module,
            foreign,
            implementations,
            locals: Vec::new(),
            directives,
            try_else: None,
        }
    }

    pub fn bind_one(&self, lvl: Level, sem: Sem) -> Env {
        let mut out = self.clone();
        out.locals.push((lvl, LocalBinding::One(sem)));
        out
    }

    pub fn bind_group(&self, lvl: Level, group: Arc<Vec<(Ident, Thunk<Sem>)>>) -> Env {
        let mut out = self.clone();
        out.locals.push((lvl, LocalBinding::Group(group)));
        out
    }

    pub fn lookup_local(&self, lvl: Level) -> Option<&LocalBinding> {
        self.locals
            .iter()
            .rev()
            .find(|(bound, _)| *bound == lvl)
            .map(|(_, binding)| binding)
    }

    pub fn directive(&self, r: &EvalRef) -> Option<Directive> {
        self.directives.get(r).copied()
    }

    pub fn with_try(&self, try_else: Option<Try>) -> Env {
        let mut out = self.clone();
        out.try_else = try_else;
        out
    }

    /// Pins every member of a recursive group to `InlineNever` while
    /// one of its members is being inlined, so the group cannot unfold
    /// into itself through a dictionary.
    pub fn add_stops(&self, group: &HashSet<Qualified>) -> Env {
        if group.is_empty() {
            return self.clone();
        }
        let mut directives = self.directives.as_ref().clone();
        for q in group.iter() {
            directives.insert(EvalRef::EvalExtern(q.clone(), None), Directive::InlineNever);
        }
        let mut out = self.clone();
        out.directives = Arc::new(directives);
        out
    }

    pub fn lookup_implementation(&self, q: &Qualified) -> Option<&(Analysis, Impl)> {
        self.implementations.get(q)
    }
}

#[cfg(test)]
mod env_tests {
    use super::*;
    use crate::expr::Literal;
    use crate::name::mk_ident;
    use crate::sem::InnerSem;

    fn test_env() -> Env {
        Env::new(
            ModuleName::from("Test"),
            no_foreign(),
            no_implementations(),
            Arc::new(Directives::new()),
        )
    }

    fn lit(n: i32) -> Sem {
        InnerSem::NeutLit(Literal::LitInt(n)).into()
    }

    #[test]
    fn lookup_prefers_the_innermost_binding() {
        let env = test_env()
            .bind_one(Level(0), lit(1))
            .bind_one(Level(0), lit(2));
        match env.lookup_local(Level(0)) {
            Some(LocalBinding::One(sem)) => match sem.as_ref() {
                InnerSem::NeutLit(Literal::LitInt(n)) => assert_eq!(*n, 2),
                _ => panic!("wrong binding"),
            },
            _ => panic!("missing binding"),
        }
    }

    #[test]
    fn add_stops_overrides_directives() {
        let q = crate::name::mk_qualified(ModuleName::from("M"), mk_ident("f"));
        let mut group = HashSet::new();
        group.insert(q.clone());
        let env = test_env().add_stops(&group);
        assert_eq!(
            env.directive(&EvalRef::EvalExtern(q, None)),
            Some(Directive::InlineNever)
        );
    }
}
