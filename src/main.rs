#![forbid(unsafe_code)]

use std::time::SystemTime;

use hashbrown::HashSet;
use structopt::StructOpt;

use crate::cli::Opt;
use crate::driver::{BuildOptions, Builder};
use crate::errors::{OptErr, OptResult};

pub mod analysis;
pub mod cli;
pub mod convert;
pub mod driver;
pub mod env;
pub mod errors;
pub mod eval;
pub mod expr;
pub mod name;
pub mod op;
pub mod parser;
pub mod pretty;
pub mod quote;
pub mod rewrite;
pub mod sem;
pub mod utils;

fn main() {
    let opt = Opt::from_args();

    if opt.debug {
        eprintln!("CLI returned these arguments : {:#?}", opt);
    }

    let sources = match opt.try_read_files() {
        Ok(sources) => sources,
        Err(e) => errors::toplevel_err(&e),
    };

    let start_instant = SystemTime::now();

    let modules = match parse_all(sources) {
        Ok(modules) => modules,
        Err(e) => errors::toplevel_err(&e),
    };
    let num_modules = modules.len();

    let mut options = BuildOptions::default();
    options.rewrite_limit = opt.rewrite_limit_or_default();

    let mut builder = Builder::new(options);
    if opt.debug {
        builder = builder.on_codegen(|state, module| {
            eprintln!(
                "[{}] {} : {} binding group(s), {} implementation(s)",
                state.module_index,
                module.name,
                module.bindings.len(),
                module.implementations.len()
            );
        });
    }
    let backends = builder.build_modules(modules);

    if opt.print {
        for backend in backends.iter() {
            println!("{}", pretty::render_module(backend));
        }
    }

    let num_bindings: usize = backends
        .iter()
        .map(|m| m.bindings.iter().map(|g| g.bindings.len()).sum::<usize>())
        .sum();

    match start_instant.elapsed() {
        Ok(dur) => println!(
            "optimized {} declaration(s) across {} module(s) in {:?}",
            num_bindings, num_modules, dur
        ),
        Err(_) => println!(
            "optimized {} declaration(s) across {} module(s)",
            num_bindings, num_modules
        ),
    }
}

fn parse_all(sources: Vec<String>) -> OptResult<Vec<convert::Module>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for source in sources {
        for module in parser::parse_modules(&source)? {
            if !seen.insert(module.name.clone()) {
                return Err(OptErr::DuplicateModule(format!("{}", module.name)));
            }
            out.push(module);
        }
    }
    Ok(out)
}
