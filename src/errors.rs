use crate::name::{Level, Qualified};

/// The optimizer's failures come in two flavors. Malformed input files
/// are recoverable and travel as `OptErr` values up to `main`. Broken
/// IR invariants (an unbound local, an empty recursive group, a rewrite
/// chain that never settles) are programming errors in whatever
/// produced the IR; those get a diagnostic naming the offending
/// declaration and kill the process, since no output the optimizer
/// could produce past that point would be trustworthy.

pub fn unbound_local(loc: u32, lvl: Level) -> ! {
    eprintln!(
        "eval line {}; tried to follow local {} but the environment has no binding for it. \
         The input IR references a variable outside its scope.\n",
        loc, lvl
    );
    std::process::exit(-1);
}

pub fn unbound_group_member(loc: u32, lvl: Level, id: &crate::name::Ident) -> ! {
    eprintln!(
        "eval line {}; local {} resolves to a recursive group, but the group has no member \
         named `{}`.\n",
        loc, lvl, id
    );
    std::process::exit(-1);
}

pub fn empty_rec_group(loc: u32) -> ! {
    eprintln!(
        "convert line {}; encountered a recursive binding group with no members.\n",
        loc
    );
    std::process::exit(-1);
}

pub fn cyclic_thunk(loc: u32) -> ! {
    eprintln!(
        "utils line {}; a suspended value was demanded while it was already being forced. \
         Some binding's value depends on itself in a non-productive way.\n",
        loc
    );
    std::process::exit(-1);
}

pub fn rewrite_limit_exceeded(loc: u32, q: &Qualified, limit: usize) -> ! {
    eprintln!(
        "driver line {}; optimizing `{}` did not settle within {} rewrite passes. \
         Two rewrites are feeding each other; this is a bug in the rewriter, not in \
         the input.\n",
        loc, q, limit
    );
    std::process::exit(-1);
}

pub fn toplevel_err<T: std::fmt::Display>(e: &T) -> ! {
    eprintln!("execution failed with error : {}\n", e);
    std::process::exit(-1)
}

pub type OptResult<T> = Result<T, OptErr>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptErr {
    ParseExhausted(usize),
    ParseUnexpected(usize, String),
    ParseInt(usize, String),
    ParseNumber(usize, String),
    DuplicateModule(String),
}

impl std::fmt::Display for OptErr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OptErr::ParseExhausted(line) => {
                write!(f, "parse error at line {} : input ended inside a form", line)
            }
            OptErr::ParseUnexpected(line, what) => {
                write!(f, "parse error at line {} : unexpected `{}`", line, what)
            }
            OptErr::ParseInt(line, what) => {
                write!(f, "parse error at line {} : `{}` is not a 32-bit integer", line, what)
            }
            OptErr::ParseNumber(line, what) => {
                write!(f, "parse error at line {} : `{}` is not a number", line, what)
            }
            OptErr::DuplicateModule(name) => {
                write!(f, "module `{}` appears more than once in the input set", name)
            }
        }
    }
}

impl std::error::Error for OptErr {}
