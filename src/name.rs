use std::sync::Arc;

/// `Ident` is an Arc wrapper around the unique name of a top-level
/// declaration, a constructor, or a bound variable as it appeared in
/// the source. Idents are compared structurally, and cloning one is a
/// pointer copy, which matters because idents get copied into every
/// analysis record and semantic value that mentions them.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(Arc<String>);

pub fn mk_ident(s: impl Into<String>) -> Ident {
    Ident(Arc::new(s.into()))
}

impl Ident {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Ident {
        mk_ident(s)
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A segmented module name, IE `Data.Functor.Compose`. Always at least
/// one segment. Displays from left to right with a `.` separating
/// segments.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleName(Arc<Vec<String>>);

pub fn mk_module_name(segments: Vec<String>) -> ModuleName {
    assert!(!segments.is_empty());
    ModuleName(Arc::new(segments))
}

impl ModuleName {
    pub fn segments(&self) -> &[String] {
        self.0.as_slice()
    }
}

impl From<&str> for ModuleName {
    fn from(s: &str) -> ModuleName {
        let segments = s.split('.').map(String::from).collect::<Vec<String>>();
        mk_module_name(segments)
    }
}

impl std::fmt::Display for ModuleName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl std::fmt::Debug for ModuleName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// A de Bruijn *level*: the number of binders in scope at the point a
/// binder is introduced, counted from the outside of the declaration.
/// Unlike an index, a level keeps its meaning when a body moves under
/// additional binders, which is what the let-associativity rewrite
/// relies on. Levels are unique along any scope chain; an inner binder
/// shadows an equal outer level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(pub usize);

impl Level {
    pub fn next(self) -> Level {
        Level(self.0 + 1)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A global reference. The module part is `None` only for references
/// that have not yet been resolved against the current module; the
/// convert step fills it in before anything downstream sees the
/// reference.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Qualified {
    pub module: Option<ModuleName>,
    pub ident: Ident,
}

pub fn mk_qualified(module: ModuleName, ident: Ident) -> Qualified {
    Qualified {
        module: Some(module),
        ident,
    }
}

pub fn mk_unqualified(ident: Ident) -> Qualified {
    Qualified {
        module: None,
        ident,
    }
}

impl Qualified {
    /// Pins an unqualified reference to the given module. Already
    /// qualified references are returned as they are.
    pub fn qualify_in(&self, m: &ModuleName) -> Qualified {
        match &self.module {
            Some(_) => self.clone(),
            None => mk_qualified(m.clone(), self.ident.clone()),
        }
    }
}

impl std::fmt::Display for Qualified {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.module {
            Some(m) => write!(f, "{}.{}", m, self.ident),
            None => write!(f, "{}", self.ident),
        }
    }
}

impl std::fmt::Debug for Qualified {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod name_tests {
    use super::*;

    #[test]
    fn module_name_display() {
        let m = ModuleName::from("Data.Functor.Compose");
        assert_eq!(m.segments().len(), 3);
        assert_eq!(format!("{}", m), "Data.Functor.Compose");
    }

    #[test]
    fn qualify_in_only_touches_unqualified() {
        let here = ModuleName::from("Main");
        let there = ModuleName::from("Data.Eq");
        let q1 = mk_unqualified(mk_ident("eq"));
        let q2 = mk_qualified(there.clone(), mk_ident("eq"));
        assert_eq!(q1.qualify_in(&here).module, Some(here));
        assert_eq!(q2.qualify_in(&ModuleName::from("Main")).module, Some(there));
    }
}
