use std::fs::read_to_string;
use std::path::PathBuf;

use structopt::StructOpt;

use crate::driver::DEFAULT_REWRITE_LIMIT;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "quench",
    about = "A normalization-by-evaluation optimizer for a functional backend IR"
)]
pub struct Opt {
    /// Dump per-module progress while folding the module set.
    #[structopt(short = "d", long = "debug")]
    pub debug: bool,

    /// Print each optimized module to stdout after the build.
    #[structopt(short = "p", long = "print")]
    pub print: bool,

    /// Upper bound on evaluate/quote passes per declaration. Hitting
    /// it means the rewriter is oscillating, and the build dies with
    /// the offending declaration's name.
    #[structopt(long = "rewrite-limit", default_value = "10000")]
    pub rewrite_limit: usize,

    /// Module files, in topological order by import. Bare names are
    /// resolved against the working directory.
    #[structopt(name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,
}

impl Opt {
    pub fn try_read_files(&self) -> Result<Vec<String>, std::io::Error> {
        self.files.iter().map(|x| try_read_cwd(x)).collect()
    }

    pub fn rewrite_limit_or_default(&self) -> usize {
        if self.rewrite_limit == 0 {
            DEFAULT_REWRITE_LIMIT
        } else {
            self.rewrite_limit
        }
    }
}

fn try_read_cwd(suggestion: &PathBuf) -> Result<String, std::io::Error> {
    match std::env::current_dir() {
        Err(_) => read_to_string(suggestion),
        Ok(mut path) => {
            path.push(suggestion.clone());
            read_to_string(path)
        }
    }
}
