use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::analysis::Analysis;
use crate::convert::{BindGroup, DataTypes, Module, ModuleConverter, SourceBinding};
use crate::env::{
    no_foreign, Directive, Directives, Env, EvalRef, ForeignSemantics, Impl,
};
use crate::errors;
use crate::eval::eval;
use crate::expr::{Expr, Literal, NeutralExpr, Syntax};
use crate::name::{mk_qualified, Ident, ModuleName, Qualified};
use crate::quote::{quote, Ctx};
use crate::rewrite::freeze;

/// The compiler-generated module every program implicitly depends on;
/// never reported as an import.
static PRIM: Lazy<ModuleName> = Lazy::new(|| ModuleName::from("Prim"));

pub const DEFAULT_REWRITE_LIMIT: usize = 10_000;

pub struct BuildOptions {
    pub directives: Directives,
    pub foreign: ForeignSemantics,
    pub rewrite_limit: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            directives: Directives::new(),
            foreign: no_foreign(),
            rewrite_limit: DEFAULT_REWRITE_LIMIT,
        }
    }
}

/// The accumulator threaded across the pre-sorted module list: every
/// directive seen so far, every published implementation, and a
/// monotone module index.
pub struct BuildState {
    pub directives: Directives,
    pub implementations: HashMap<Qualified, (Analysis, Impl)>,
    pub module_index: usize,
}

#[derive(Debug, Clone)]
pub struct BackendBindingGroup {
    pub recursive: bool,
    pub bindings: Vec<(Ident, NeutralExpr)>,
}

/// Everything the code emitter needs for one module.
#[derive(Clone)]
pub struct BackendModule {
    pub name: ModuleName,
    pub bindings: Vec<BackendBindingGroup>,
    pub imports: Vec<ModuleName>,
    pub data_types: DataTypes,
    pub exports: Vec<(Ident, Qualified)>,
    pub implementations: IndexMap<Qualified, (Analysis, Impl)>,
    pub directives: Directives,
    pub foreign: Vec<Ident>,
}

/// Evaluate/quote to a fixpoint: the quoter's rewriter flags the tree
/// whenever it queued work for another pass. Running past the limit
/// means two rewrites are undoing each other, which is a bug worth
/// dying for rather than looping on.
pub fn optimize(ctx: &Ctx, env: &Env, q: &Qualified, limit: usize, expr: Expr) -> Expr {
    let mut expr = expr;
    let mut remaining = limit;
    loop {
        let next = quote(ctx, &eval(env, &expr));
        if !next.analysis().rewrite {
            return next;
        }
        if remaining == 0 {
            errors::rewrite_limit_exceeded(line!(), q, limit);
        }
        remaining -= 1;
        expr = next;
    }
}

type PrepareHook = Box<dyn FnMut(&BuildState, Module) -> Module>;
type CodegenHook = Box<dyn FnMut(&BuildState, &BackendModule)>;

pub struct Builder {
    options: BuildOptions,
    state: BuildState,
    prepare: Option<PrepareHook>,
    codegen: Option<CodegenHook>,
}

impl Builder {
    pub fn new(options: BuildOptions) -> Builder {
        let state = BuildState {
            directives: options.directives.clone(),
            implementations: HashMap::new(),
            module_index: 0,
        };
        Builder {
            options,
            state,
            prepare: None,
            codegen: None,
        }
    }

    pub fn on_prepare(mut self, f: impl FnMut(&BuildState, Module) -> Module + 'static) -> Builder {
        self.prepare = Some(Box::new(f));
        self
    }

    pub fn on_codegen(mut self, f: impl FnMut(&BuildState, &BackendModule) + 'static) -> Builder {
        self.codegen = Some(Box::new(f));
        self
    }

    /// Folds the pre-sorted module list, threading directives and
    /// implementations forward.
    pub fn build_modules(mut self, modules: Vec<Module>) -> Vec<BackendModule> {
        let mut out = Vec::with_capacity(modules.len());
        for module in modules {
            let module = match &mut self.prepare {
                Some(hook) => hook(&self.state, module),
                None => module,
            };
            let backend = self.build_module(module);
            if let Some(hook) = &mut self.codegen {
                hook(&self.state, &backend);
            }
            out.push(backend);
        }
        out
    }

    fn build_module(&mut self, module: Module) -> BackendModule {
        // Directives visible while optimizing this module: everything
        // carried so far, with the module's own locals on top.
        let mut scoped = self.state.directives.clone();
        for (r, d) in module.directives.locals.iter() {
            scoped.insert(r.clone(), *d);
        }
        let directives = Arc::new(scoped);
        let converter = ModuleConverter::new(&module, Ctx::new(directives.clone()));

        let mut exported = module.directives.exports.clone();
        let mut implementations: IndexMap<Qualified, (Analysis, Impl)> = IndexMap::new();
        let mut groups: Vec<BackendBindingGroup> = Vec::new();
        let mut deps: HashSet<ModuleName> = HashSet::new();

        for group in module.bindings.iter() {
            match group {
                BindGroup::NonRec(binding) => {
                    let rec_group = Arc::new(HashSet::new());
                    let (q, analysis, impl_, neutral) = self.optimize_binding(
                        &module.name,
                        &converter,
                        &directives,
                        rec_group,
                        binding,
                        &mut exported,
                    );
                    deps.extend(analysis.deps.iter().cloned());
                    self.state
                        .implementations
                        .insert(q.clone(), (analysis.clone(), impl_.clone()));
                    implementations.insert(q, (analysis, impl_));
                    // Adjacent non-recursive bindings collapse into one
                    // output group.
                    match groups.last_mut() {
                        Some(last) if !last.recursive => {
                            last.bindings.push((binding.ident.clone(), neutral));
                        }
                        _ => groups.push(BackendBindingGroup {
                            recursive: false,
                            bindings: vec![(binding.ident.clone(), neutral)],
                        }),
                    }
                }
                BindGroup::Rec(bindings) => {
                    if bindings.is_empty() {
                        errors::empty_rec_group(line!());
                    }
                    let rec_group = Arc::new(
                        bindings
                            .iter()
                            .map(|b| mk_qualified(module.name.clone(), b.ident.clone()))
                            .collect::<HashSet<Qualified>>(),
                    );
                    let mut out_bindings = Vec::with_capacity(bindings.len());
                    for binding in bindings.iter() {
                        let (q, analysis, impl_, neutral) = self.optimize_binding(
                            &module.name,
                            &converter,
                            &directives,
                            rec_group.clone(),
                            binding,
                            &mut exported,
                        );
                        deps.extend(analysis.deps.iter().cloned());
                        self.state
                            .implementations
                            .insert(q.clone(), (analysis.clone(), impl_.clone()));
                        implementations.insert(q, (analysis, impl_));
                        out_bindings.push((binding.ident.clone(), neutral));
                    }
                    groups.push(BackendBindingGroup {
                        recursive: true,
                        bindings: out_bindings,
                    });
                }
            }
        }

        let mut imports = deps
            .into_iter()
            .filter(|m| *m != module.name && *m != *PRIM)
            .collect::<Vec<ModuleName>>();
        imports.sort();

        let mut exports = module
            .exports
            .iter()
            .map(|id| (id.clone(), mk_qualified(module.name.clone(), id.clone())))
            .collect::<Vec<(Ident, Qualified)>>();
        exports.extend(module.reexports.iter().cloned());

        for (r, d) in exported.iter() {
            self.state.directives.insert(r.clone(), *d);
        }
        self.state.module_index += 1;

        BackendModule {
            name: module.name.clone(),
            bindings: groups,
            imports,
            data_types: converter.data_types().clone(),
            exports,
            implementations,
            directives: exported,
            foreign: module.foreign.clone(),
        }
    }

    fn optimize_binding(
        &mut self,
        module_name: &ModuleName,
        converter: &ModuleConverter,
        directives: &Arc<Directives>,
        rec_group: Arc<HashSet<Qualified>>,
        binding: &SourceBinding,
        exported: &mut Directives,
    ) -> (Qualified, Analysis, Impl, NeutralExpr) {
        let q = mk_qualified(module_name.clone(), binding.ident.clone());
        let converted = converter.convert(&binding.expr);
        let env = Env::new(
            module_name.clone(),
            self.options.foreign.clone(),
            Arc::new(self.state.implementations.clone()),
            directives.clone(),
        );
        let ctx = Ctx::new(directives.clone());
        let optimized = optimize(&ctx, &env, &q, self.options.rewrite_limit, converted);
        let (analysis, impl_, neutral) = derive_impl(rec_group, &optimized);
        self.propagate_arity(&q, &neutral, directives, exported);
        (q, analysis, impl_, neutral)
    }

    /// A declaration that settles into a partial application of an
    /// arity-directed function is itself arity-directed: the missing
    /// arguments compose across module boundaries.
    fn propagate_arity(
        &mut self,
        q: &Qualified,
        neutral: &NeutralExpr,
        directives: &Arc<Directives>,
        exported: &mut Directives,
    ) {
        if let Syntax::App(head, args) = neutral.as_ref() {
            if let Syntax::Var(target) = head.as_ref() {
                let target_ref = EvalRef::EvalExtern(target.clone(), None);
                if let Some(Directive::InlineArity(n)) = directives.get(&target_ref).copied() {
                    if args.len() < n {
                        let published = Directive::InlineArity(n - args.len());
                        let self_ref = EvalRef::EvalExtern(q.clone(), None);
                        self.state.directives.insert(self_ref.clone(), published);
                        exported.insert(self_ref, published);
                    }
                }
            }
        }
    }
}

/// Reads the published shape off an optimized declaration. A literal
/// record splits into per-field implementations so dictionaries inline
/// one member at a time; a constructor definition publishes its
/// metadata; anything else publishes its frozen form.
fn derive_impl(
    rec_group: Arc<HashSet<Qualified>>,
    optimized: &Expr,
) -> (Analysis, Impl, NeutralExpr) {
    let (analysis, neutral) = freeze(optimized);
    let impl_ = match optimized.syntax() {
        Some(Syntax::Lit(Literal::LitRecord(props))) => Impl::ImplDict(
            rec_group,
            props
                .iter()
                .map(|(k, v)| (k.clone(), freeze(v)))
                .collect(),
        ),
        Some(Syntax::CtorDef(ct, ty, tag, fields)) => {
            Impl::ImplCtor(*ct, ty.clone(), tag.clone(), fields.clone())
        }
        _ => Impl::ImplExpr(rec_group, neutral.clone()),
    };
    (analysis, impl_, neutral)
}

#[cfg(test)]
mod driver_tests {
    use super::*;
    use crate::convert::{ModuleDirectives, SourceExpr};
    use crate::expr::{Accessor, Literal};
    use crate::name::{mk_ident, mk_unqualified};
    use crate::op::{Op1, Op2, OpNum, OpOrd};
    use SourceExpr::*;

    fn var(name: &str) -> SourceExpr {
        SrcVar(mk_unqualified(mk_ident(name)))
    }

    fn qvar(module: &str, name: &str) -> SourceExpr {
        SrcVar(mk_qualified(ModuleName::from(module), mk_ident(name)))
    }

    fn int(n: i32) -> SourceExpr {
        SrcLit(Literal::LitInt(n))
    }

    fn string(s: &str) -> SourceExpr {
        SrcLit(Literal::LitString(String::from(s)))
    }

    fn module(name: &str, bindings: Vec<BindGroup>) -> Module {
        Module {
            name: ModuleName::from(name),
            imports: Vec::new(),
            exports: Vec::new(),
            reexports: Vec::new(),
            foreign: Vec::new(),
            directives: ModuleDirectives::default(),
            bindings,
        }
    }

    fn bind(name: &str, expr: SourceExpr) -> BindGroup {
        BindGroup::NonRec(SourceBinding {
            ident: mk_ident(name),
            expr,
        })
    }

    fn run_one(m: Module) -> BackendModule {
        Builder::new(BuildOptions::default())
            .build_modules(vec![m])
            .remove(0)
    }

    fn binding_of<'m>(backend: &'m BackendModule, name: &str) -> &'m NeutralExpr {
        backend
            .bindings
            .iter()
            .flat_map(|g| g.bindings.iter())
            .find(|(id, _)| id.as_str() == name)
            .map(|(_, e)| e)
            .expect("missing binding")
    }

    #[test]
    fn beta_reduction_folds_to_a_literal() {
        // let f = \x -> x + 1 in f 2
        let m = module(
            "Main",
            vec![bind(
                "main",
                SrcLet(
                    mk_ident("f"),
                    Box::new(SrcAbs(
                        vec![mk_ident("x")],
                        Box::new(SrcOp2(
                            Op2::OpIntNum(OpNum::OpAdd),
                            Box::new(var("x")),
                            Box::new(int(1)),
                        )),
                    )),
                    Box::new(SrcApp(Box::new(var("f")), vec![int(2)])),
                ),
            )],
        );
        let backend = run_one(m);
        match binding_of(&backend, "main").as_ref() {
            Syntax::Lit(Literal::LitInt(3)) => (),
            owise => panic!("expected 3, got {:?}", owise),
        }
    }

    #[test]
    fn negated_equality_becomes_not_eq() {
        // \x y -> not (x == y)
        let m = module(
            "Main",
            vec![bind(
                "main",
                SrcAbs(
                    vec![mk_ident("x"), mk_ident("y")],
                    Box::new(SrcOp1(
                        Op1::OpBooleanNot,
                        Box::new(SrcOp2(
                            Op2::OpIntOrd(OpOrd::OpEq),
                            Box::new(var("x")),
                            Box::new(var("y")),
                        )),
                    )),
                ),
            )],
        );
        let backend = run_one(m);
        match binding_of(&backend, "main").as_ref() {
            Syntax::Abs(_, body) => match body.as_ref() {
                Syntax::PrimOp(crate::op::Op::Op2(Op2::OpIntOrd(OpOrd::OpNotEq), _, _)) => (),
                owise => panic!("expected folded not-eq, got {:?}", owise),
            },
            owise => panic!("expected abs, got {:?}", owise),
        }
    }

    #[test]
    fn true_guard_commits_its_branch() {
        let m = module(
            "Main",
            vec![bind(
                "main",
                SrcBranch(
                    vec![(SrcLit(Literal::LitBoolean(true)), int(1))],
                    Some(Box::new(int(2))),
                ),
            )],
        );
        let backend = run_one(m);
        match binding_of(&backend, "main").as_ref() {
            Syntax::Lit(Literal::LitInt(1)) => (),
            owise => panic!("expected the first arm, got {:?}", owise),
        }
    }

    #[test]
    fn complementary_guards_drop_the_failure_arm() {
        // \l -> if l then 1 else if not l then 2 else fail
        let m = module(
            "Main",
            vec![bind(
                "main",
                SrcAbs(
                    vec![mk_ident("l")],
                    Box::new(SrcBranch(
                        vec![
                            (var("l"), int(1)),
                            (SrcOp1(Op1::OpBooleanNot, Box::new(var("l"))), int(2)),
                        ],
                        Some(Box::new(SrcFail(String::from("Failed pattern match")))),
                    )),
                ),
            )],
        );
        let backend = run_one(m);
        match binding_of(&backend, "main").as_ref() {
            Syntax::Abs(_, body) => match body.as_ref() {
                Syntax::Branch(pairs, Some(default)) => {
                    assert_eq!(pairs.len(), 1);
                    match default.as_ref() {
                        Syntax::Lit(Literal::LitInt(2)) => (),
                        owise => panic!("expected else arm, got {:?}", owise),
                    }
                }
                owise => panic!("expected one-armed branch, got {:?}", owise),
            },
            owise => panic!("expected abs, got {:?}", owise),
        }
    }

    #[test]
    fn committed_branches_expose_their_else_chain() {
        // \l -> if true then (if l then 1) else 2
        // The inner branch has no default; committing the outer arm
        // hands it the pending else-chain, so the fallthrough survives.
        let m = module(
            "Main",
            vec![bind(
                "main",
                SrcAbs(
                    vec![mk_ident("l")],
                    Box::new(SrcBranch(
                        vec![(
                            SrcLit(Literal::LitBoolean(true)),
                            SrcBranch(vec![(var("l"), int(1))], None),
                        )],
                        Some(Box::new(int(2))),
                    )),
                ),
            )],
        );
        let backend = run_one(m);
        match binding_of(&backend, "main").as_ref() {
            Syntax::Abs(_, body) => match body.as_ref() {
                Syntax::Branch(pairs, Some(default)) => {
                    assert_eq!(pairs.len(), 1);
                    match default.as_ref() {
                        Syntax::Lit(Literal::LitInt(2)) => (),
                        owise => panic!("expected the adopted fallthrough, got {:?}", owise),
                    }
                }
                owise => panic!("expected a branch, got {:?}", owise),
            },
            owise => panic!("expected abs, got {:?}", owise),
        }
    }

    #[test]
    fn record_updates_merge_and_sort_fields() {
        // { b: 1, a: 2 } { b = 9 }  -->  { a: 2, b: 9 }
        let m = module(
            "Main",
            vec![bind(
                "main",
                SrcUpdate(
                    Box::new(SrcLit(Literal::LitRecord(vec![
                        (String::from("b"), int(1)),
                        (String::from("a"), int(2)),
                    ]))),
                    vec![(String::from("b"), int(9))],
                ),
            )],
        );
        let backend = run_one(m);
        match binding_of(&backend, "main").as_ref() {
            Syntax::Lit(Literal::LitRecord(props)) => {
                assert_eq!(props.len(), 2);
                assert_eq!(props[0].0, "a");
                assert_eq!(props[1].0, "b");
                match props[1].1.as_ref() {
                    Syntax::Lit(Literal::LitInt(9)) => (),
                    owise => panic!("expected the update to win, got {:?}", owise),
                }
            }
            owise => panic!("expected a record literal, got {:?}", owise),
        }
    }

    #[test]
    fn string_append_folds_adjacent_literal_runs() {
        // \z -> ("foo" ++ ("bar" ++ z)) ++ "baz"
        let m = module(
            "Main",
            vec![bind(
                "main",
                SrcAbs(
                    vec![mk_ident("z")],
                    Box::new(SrcOp2(
                        Op2::OpStringAppend,
                        Box::new(SrcOp2(
                            Op2::OpStringAppend,
                            Box::new(string("foo")),
                            Box::new(SrcOp2(
                                Op2::OpStringAppend,
                                Box::new(string("bar")),
                                Box::new(var("z")),
                            )),
                        )),
                        Box::new(string("baz")),
                    )),
                ),
            )],
        );
        let backend = run_one(m);
        // ("foobar" ++ z) ++ "baz"
        match binding_of(&backend, "main").as_ref() {
            Syntax::Abs(_, body) => match body.as_ref() {
                Syntax::PrimOp(crate::op::Op::Op2(Op2::OpStringAppend, left, right)) => {
                    match right.as_ref() {
                        Syntax::Lit(Literal::LitString(s)) => assert_eq!(s, "baz"),
                        owise => panic!("expected trailing literal, got {:?}", owise),
                    }
                    match left.as_ref() {
                        Syntax::PrimOp(crate::op::Op::Op2(Op2::OpStringAppend, l2, _)) => {
                            match l2.as_ref() {
                                Syntax::Lit(Literal::LitString(s)) => assert_eq!(s, "foobar"),
                                owise => panic!("expected folded run, got {:?}", owise),
                            }
                        }
                        owise => panic!("expected nested append, got {:?}", owise),
                    }
                }
                owise => panic!("expected append, got {:?}", owise),
            },
            owise => panic!("expected abs, got {:?}", owise),
        }
    }

    #[test]
    fn dictionary_fields_inline_through_accessors() {
        let mut lib = module(
            "Lib",
            vec![bind(
                "dict",
                SrcLit(Literal::LitRecord(vec![(
                    String::from("f"),
                    SrcAbs(vec![mk_ident("x")], Box::new(var("x"))),
                )])),
            )],
        );
        lib.directives.exports.insert(
            EvalRef::EvalExtern(
                mk_qualified(ModuleName::from("Lib"), mk_ident("dict")),
                Some(Accessor::GetProp(String::from("f"))),
            ),
            Directive::InlineAlways,
        );
        let main = module(
            "Main",
            vec![bind(
                "main",
                SrcApp(
                    Box::new(SrcAccessor(
                        Box::new(qvar("Lib", "dict")),
                        Accessor::GetProp(String::from("f")),
                    )),
                    vec![int(7)],
                ),
            )],
        );
        let backends = Builder::new(BuildOptions::default()).build_modules(vec![lib, main]);
        match binding_of(&backends[1], "main").as_ref() {
            Syntax::Lit(Literal::LitInt(7)) => (),
            owise => panic!("expected the identity application to fold, got {:?}", owise),
        }
    }

    #[test]
    fn inline_never_pins_the_reference() {
        let lib = module("Lib", vec![bind("answer", int(42))]);
        let mut main = module(
            "Main",
            vec![bind("main", qvar("Lib", "answer"))],
        );
        main.directives.locals.insert(
            EvalRef::EvalExtern(
                mk_qualified(ModuleName::from("Lib"), mk_ident("answer")),
                None,
            ),
            Directive::InlineNever,
        );
        let backends = Builder::new(BuildOptions::default()).build_modules(vec![lib, main]);
        match binding_of(&backends[1], "main").as_ref() {
            Syntax::Var(q) => assert_eq!(q.ident.as_str(), "answer"),
            owise => panic!("expected the pinned var, got {:?}", owise),
        }
        // Without the directive the literal inlines.
        let lib2 = module("Lib", vec![bind("answer", int(42))]);
        let main2 = module("Main", vec![bind("main", qvar("Lib", "answer"))]);
        let backends2 = Builder::new(BuildOptions::default()).build_modules(vec![lib2, main2]);
        match binding_of(&backends2[1], "main").as_ref() {
            Syntax::Lit(Literal::LitInt(42)) => (),
            owise => panic!("expected the literal to inline, got {:?}", owise),
        }
    }

    #[test]
    fn partial_applications_propagate_arity_directives() {
        let mut opts = BuildOptions::default();
        let target = mk_qualified(ModuleName::from("Lib"), mk_ident("op"));
        opts.directives.insert(
            EvalRef::EvalExtern(target.clone(), None),
            Directive::InlineArity(2),
        );
        let lib = module(
            "Lib",
            vec![bind(
                "op",
                SrcAbs(
                    vec![mk_ident("x"), mk_ident("y")],
                    Box::new(SrcOp2(
                        Op2::OpIntNum(OpNum::OpAdd),
                        Box::new(var("x")),
                        Box::new(var("y")),
                    )),
                ),
            )],
        );
        let main = module(
            "Main",
            vec![bind("addOne", SrcApp(Box::new(qvar("Lib", "op")), vec![int(1)]))],
        );
        let backends = Builder::new(opts).build_modules(vec![lib, main]);
        let published = backends[1]
            .directives
            .get(&EvalRef::EvalExtern(
                mk_qualified(ModuleName::from("Main"), mk_ident("addOne")),
                None,
            ))
            .copied();
        assert_eq!(published, Some(Directive::InlineArity(1)));
    }

    #[test]
    fn constructors_saturate_through_extern_dispatch() {
        let m = module(
            "Main",
            vec![
                bind(
                    "Just",
                    SrcCtor {
                        newtype: false,
                        ty: mk_ident("Maybe"),
                        tag: mk_ident("Just"),
                        fields: vec![String::from("value0")],
                    },
                ),
                bind(
                    "Nothing",
                    SrcCtor {
                        newtype: false,
                        ty: mk_ident("Maybe"),
                        tag: mk_ident("Nothing"),
                        fields: Vec::new(),
                    },
                ),
                bind("main", SrcApp(Box::new(var("Just")), vec![int(5)])),
            ],
        );
        let backend = run_one(m);
        match binding_of(&backend, "main").as_ref() {
            Syntax::CtorSaturated(q, crate::expr::CtorType::SumType, ty, tag, fields) => {
                assert_eq!(q.ident.as_str(), "Just");
                assert_eq!(ty.as_str(), "Maybe");
                assert_eq!(tag.as_str(), "Just");
                assert_eq!(fields.len(), 1);
            }
            owise => panic!("expected a saturated constructor, got {:?}", owise),
        }
        let types = &backend.data_types;
        let maybe = types.get(&mk_ident("Maybe")).expect("Maybe missing");
        assert_eq!(maybe.constructors.len(), 2);
        assert_eq!(maybe.size, 1);
    }

    #[test]
    fn optimize_is_idempotent() {
        use crate::convert::ModuleConverter;
        use crate::env::{no_implementations, Env};
        use crate::rewrite::freeze;

        let m = module(
            "Main",
            vec![bind(
                "main",
                SrcLet(
                    mk_ident("f"),
                    Box::new(SrcAbs(
                        vec![mk_ident("x")],
                        Box::new(SrcOp2(
                            Op2::OpIntNum(OpNum::OpAdd),
                            Box::new(var("x")),
                            Box::new(int(1)),
                        )),
                    )),
                    Box::new(SrcApp(Box::new(var("f")), vec![int(2)])),
                ),
            )],
        );
        let directives = Arc::new(Directives::new());
        let ctx = Ctx::new(directives.clone());
        let converter = ModuleConverter::new(&m, ctx.clone());
        let q = mk_qualified(ModuleName::from("Main"), mk_ident("main"));
        let env = Env::new(
            ModuleName::from("Main"),
            no_foreign(),
            no_implementations(),
            directives,
        );
        let converted = match &m.bindings[0] {
            BindGroup::NonRec(b) => converter.convert(&b.expr),
            _ => unreachable!(),
        };
        let once = optimize(&ctx, &env, &q, DEFAULT_REWRITE_LIMIT, converted);
        let again = optimize(&ctx, &env, &q, DEFAULT_REWRITE_LIMIT, once.clone());
        assert!(freeze(&once).1 == freeze(&again).1);
        match freeze(&once).1.as_ref() {
            Syntax::Lit(Literal::LitInt(3)) => (),
            owise => panic!("expected 3, got {:?}", owise),
        }
    }

    #[test]
    fn imports_exclude_self_and_prim() {
        let lib = module("Lib", vec![bind("x", int(1))]);
        let mut main = module(
            "Main",
            vec![
                bind("a", qvar("Lib", "x")),
                bind("b", qvar("Prim", "undefined")),
                bind("c", var("a")),
            ],
        );
        main.directives.locals.insert(
            EvalRef::EvalExtern(
                mk_qualified(ModuleName::from("Lib"), mk_ident("x")),
                None,
            ),
            Directive::InlineNever,
        );
        let backends = Builder::new(BuildOptions::default()).build_modules(vec![lib, main]);
        assert_eq!(backends[1].imports, vec![ModuleName::from("Lib")]);
    }

    #[test]
    fn recursive_groups_publish_their_group_and_stay_put() {
        let m = module(
            "Main",
            vec![BindGroup::Rec(vec![
                SourceBinding {
                    ident: mk_ident("even"),
                    expr: SrcAbs(vec![mk_ident("n")], Box::new(SrcApp(
                        Box::new(qvar("Main", "odd")),
                        vec![var("n")],
                    ))),
                },
                SourceBinding {
                    ident: mk_ident("odd"),
                    expr: SrcAbs(vec![mk_ident("n")], Box::new(SrcApp(
                        Box::new(qvar("Main", "even")),
                        vec![var("n")],
                    ))),
                },
            ])],
        );
        let backend = run_one(m);
        assert!(backend.bindings[0].recursive);
        let (analysis, impl_) = backend
            .implementations
            .get(&mk_qualified(ModuleName::from("Main"), mk_ident("even")))
            .expect("even not published");
        assert!(analysis.deps.contains(&ModuleName::from("Main")));
        match impl_ {
            Impl::ImplExpr(group, _) => assert_eq!(group.len(), 2),
            owise => panic!("expected an expr impl, got {:?}", owise),
        }
    }
}
