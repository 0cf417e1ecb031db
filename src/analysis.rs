use fxhash::FxHashMap;
use hashbrown::HashSet;

use crate::name::{Level, ModuleName};

/// How expensive it would be to duplicate an expression. The tiers are
/// ordered; the rewriter compares against them exactly, so the order of
/// the variants is load-bearing.
///
/// `Trivial` is a literal scalar, a variable, or a local. `Deref` is a
/// single projection away from trivial. `KnownSize` is a constructor or
/// literal aggregate whose children are all known. Everything else is
/// `NonTrivial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Complexity {
    Trivial,
    Deref,
    KnownSize,
    NonTrivial,
}

impl Complexity {
    /// Sequential composition takes the worse tier.
    pub fn append(self, other: Complexity) -> Complexity {
        self.max(other)
    }
}

impl Default for Complexity {
    fn default() -> Self {
        Complexity::Trivial
    }
}

/// Per-level usage data. `count` is the number of syntactic occurrences
/// under the binder; `captured` is set once any occurrence sits under
/// an abstraction, at which point inlining the binding changes how many
/// times it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub count: usize,
    pub captured: bool,
}

impl Usage {
    pub fn once() -> Usage {
        Usage {
            count: 1,
            captured: false,
        }
    }

    pub fn append(self, other: Usage) -> Usage {
        Usage {
            count: self.count + other.count,
            captured: self.captured || other.captured,
        }
    }
}

/// The record the rewriter consults before touching a node: usage per
/// free level, a symbolic size, the usage of each formal parameter when
/// the node is an abstraction, the modules the node depends on, and a
/// bit marking that a rewrite is queued somewhere inside.
///
/// Built bottom-up by the smart constructors in `expr.rs`, the same way
/// the per-node cache of a kernel term is built as the tree is
/// constructed; a node's analysis covers its entire subtree.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub usages: FxHashMap<Level, Usage>,
    pub args: Vec<Usage>,
    pub size: usize,
    pub complexity: Complexity,
    pub rewrite: bool,
    pub deps: HashSet<ModuleName>,
}

impl Analysis {
    pub fn new() -> Analysis {
        Analysis::default()
    }

    /// Monoid append for sequential composition. Child `args` vectors
    /// do not propagate; parameter usage is a fact about one
    /// abstraction node, not about its context.
    pub fn append(mut self, other: &Analysis) -> Analysis {
        for (lvl, usage) in other.usages.iter() {
            let merged = match self.usages.get(lvl) {
                Some(prev) => prev.append(*usage),
                None => *usage,
            };
            self.usages.insert(*lvl, merged);
        }
        self.size += other.size;
        self.complexity = self.complexity.append(other.complexity);
        self.rewrite = self.rewrite || other.rewrite;
        for dep in other.deps.iter() {
            self.deps.insert(dep.clone());
        }
        self.args = Vec::new();
        self
    }

    /// Records one occurrence of a bound local.
    pub fn used(mut self, lvl: Level) -> Analysis {
        let merged = match self.usages.get(&lvl) {
            Some(prev) => prev.append(Usage::once()),
            None => Usage::once(),
        };
        self.usages.insert(lvl, merged);
        self
    }

    /// Removes a level at its binding site; the level is not free above
    /// the binder, so it must not leak upward.
    pub fn bound(mut self, lvl: Level) -> Analysis {
        self.usages.remove(&lvl);
        self
    }

    /// Looks up the usage of a level, defaulting to unused.
    pub fn usage_of(&self, lvl: Level) -> Usage {
        self.usages.get(&lvl).copied().unwrap_or_default()
    }

    /// Marks every usage as captured. Applied when composing a body
    /// under an abstraction: anything the body touches may now run an
    /// unknown number of times.
    pub fn capture(mut self) -> Analysis {
        for usage in self.usages.values_mut() {
            usage.captured = true;
        }
        self
    }

    /// Scales usage counts by `n`, for contexts that replay their body,
    /// IE the bindings of a recursive group.
    pub fn power(mut self, n: usize) -> Analysis {
        for usage in self.usages.values_mut() {
            usage.count *= n;
        }
        self
    }

    pub fn with_rewrite(mut self) -> Analysis {
        self.rewrite = true;
        self
    }

    pub fn with_complexity(mut self, c: Complexity) -> Analysis {
        self.complexity = c;
        self
    }

    pub fn with_args(mut self, args: Vec<Usage>) -> Analysis {
        self.args = args;
        self
    }

    pub fn with_dep(mut self, m: ModuleName) -> Analysis {
        self.deps.insert(m);
        self
    }

    /// Every constructed node pays one unit of size.
    pub fn bump(mut self) -> Analysis {
        self.size += 1;
        self
    }
}

#[cfg(test)]
mod analysis_tests {
    use super::*;

    #[test]
    fn complexity_tiers_are_ordered() {
        assert!(Complexity::Trivial < Complexity::Deref);
        assert!(Complexity::Deref < Complexity::KnownSize);
        assert!(Complexity::KnownSize < Complexity::NonTrivial);
        assert_eq!(
            Complexity::Deref.append(Complexity::Trivial),
            Complexity::Deref
        );
    }

    #[test]
    fn append_sums_usages_and_sizes() {
        let a = Analysis::new().used(Level(0)).bump();
        let b = Analysis::new().used(Level(0)).used(Level(1)).bump();
        let ab = a.append(&b);
        assert_eq!(ab.usage_of(Level(0)).count, 2);
        assert_eq!(ab.usage_of(Level(1)).count, 1);
        assert_eq!(ab.size, 2);
    }

    #[test]
    fn bound_removes_the_binder_level() {
        let a = Analysis::new().used(Level(3)).used(Level(1)).bound(Level(3));
        assert_eq!(a.usage_of(Level(3)).count, 0);
        assert_eq!(a.usage_of(Level(1)).count, 1);
    }

    #[test]
    fn capture_marks_everything() {
        let a = Analysis::new().used(Level(0)).capture();
        assert!(a.usage_of(Level(0)).captured);
    }

    #[test]
    fn power_scales_counts() {
        let a = Analysis::new().used(Level(0)).power(3);
        assert_eq!(a.usage_of(Level(0)).count, 3);
    }
}
