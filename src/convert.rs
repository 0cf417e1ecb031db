use hashbrown::HashSet;
use indexmap::IndexMap;

use crate::env::Directives;
use crate::errors;
use crate::expr::{Accessor, CtorType, Expr, Literal, Prop, Syntax};
use crate::name::{Ident, Level, ModuleName, Qualified};
use crate::op::{Op, Op1, Op2};
use crate::quote::Ctx;
use crate::rewrite::build;

/// The surface IR as it arrives from the reader: variables are named,
/// not leveled, and locals are whatever the scope map says they are.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceExpr {
    SrcVar(Qualified),
    SrcLit(Literal<SourceExpr>),
    SrcApp(Box<SourceExpr>, Vec<SourceExpr>),
    SrcAbs(Vec<Ident>, Box<SourceExpr>),
    SrcUncurriedApp(Box<SourceExpr>, Vec<SourceExpr>),
    SrcUncurriedAbs(Vec<Ident>, Box<SourceExpr>),
    SrcUncurriedEffectApp(Box<SourceExpr>, Vec<SourceExpr>),
    SrcUncurriedEffectAbs(Vec<Ident>, Box<SourceExpr>),
    SrcLet(Ident, Box<SourceExpr>, Box<SourceExpr>),
    SrcLetRec(Vec<(Ident, SourceExpr)>, Box<SourceExpr>),
    SrcEffectBind(Ident, Box<SourceExpr>, Box<SourceExpr>),
    SrcEffectPure(Box<SourceExpr>),
    SrcAccessor(Box<SourceExpr>, Accessor),
    SrcUpdate(Box<SourceExpr>, Vec<Prop<SourceExpr>>),
    SrcBranch(Vec<(SourceExpr, SourceExpr)>, Option<Box<SourceExpr>>),
    SrcOp1(Op1, Box<SourceExpr>),
    SrcOp2(Op2, Box<SourceExpr>, Box<SourceExpr>),
    SrcFail(String),
    /// A constructor declaration body. `newtype` marks the wrapper
    /// constructors the convert step erases at application sites.
    SrcCtor {
        newtype: bool,
        ty: Ident,
        tag: Ident,
        fields: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct SourceBinding {
    pub ident: Ident,
    pub expr: SourceExpr,
}

#[derive(Debug, Clone)]
pub enum BindGroup {
    NonRec(SourceBinding),
    Rec(Vec<SourceBinding>),
}

/// Inline directives as the directive parser hands them over: the
/// locals apply while optimizing this module, the exports are published
/// to every downstream module.
#[derive(Debug, Clone, Default)]
pub struct ModuleDirectives {
    pub locals: Directives,
    pub exports: Directives,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: ModuleName,
    pub imports: Vec<ModuleName>,
    pub exports: Vec<Ident>,
    pub reexports: Vec<(Ident, Qualified)>,
    pub foreign: Vec<Ident>,
    pub directives: ModuleDirectives,
    pub bindings: Vec<BindGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataCtor {
    pub fields: Vec<String>,
    pub tag: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    pub constructors: IndexMap<Ident, DataCtor>,
    /// The widest constructor payload; what a flat representation of
    /// the type has to be able to hold.
    pub size: usize,
}

pub type DataTypes = IndexMap<Ident, DataType>;

/// Walks the module's constructor declarations into the per-type
/// constructor table. Tags are assigned in declaration order within
/// each type.
pub fn data_types_of(module: &Module) -> DataTypes {
    let mut out = DataTypes::new();
    for group in module.bindings.iter() {
        let bindings: Vec<&SourceBinding> = match group {
            BindGroup::NonRec(b) => vec![b],
            BindGroup::Rec(bs) => bs.iter().collect(),
        };
        for binding in bindings {
            if let SourceExpr::SrcCtor {
                ty, tag, fields, ..
            } = &binding.expr
            {
                let entry = out.entry(ty.clone()).or_insert_with(|| DataType {
                    constructors: IndexMap::new(),
                    size: 0,
                });
                let next_tag = entry.constructors.len();
                entry.size = entry.size.max(fields.len());
                entry.constructors.insert(
                    tag.clone(),
                    DataCtor {
                        fields: fields.clone(),
                        tag: next_tag,
                    },
                );
            }
        }
    }
    out
}

fn newtypes_of(module: &Module) -> HashSet<Ident> {
    let mut out = HashSet::new();
    for group in module.bindings.iter() {
        let bindings: Vec<&SourceBinding> = match group {
            BindGroup::NonRec(b) => vec![b],
            BindGroup::Rec(bs) => bs.iter().collect(),
        };
        for binding in bindings {
            if let SourceExpr::SrcCtor {
                newtype: true, tag, ..
            } = &binding.expr
            {
                out.insert(tag.clone());
            }
        }
    }
    out
}

/// Translates one module's surface bindings. Holds the per-module
/// facts the translation needs: which names are constructors of
/// single-constructor types, which are erased newtype wrappers, and
/// the directive table the smart constructor consults.
pub struct ModuleConverter {
    name: ModuleName,
    data_types: DataTypes,
    newtypes: HashSet<Ident>,
    ctx: Ctx,
}

type Scope = Vec<(Ident, Level)>;

impl ModuleConverter {
    pub fn new(module: &Module, ctx: Ctx) -> ModuleConverter {
        ModuleConverter {
            name: module.name.clone(),
            data_types: data_types_of(module),
            newtypes: newtypes_of(module),
            ctx,
        }
    }

    pub fn data_types(&self) -> &DataTypes {
        &self.data_types
    }

    /// A data type with exactly one constructor is a product; nothing
    /// ever needs to test its tag.
    fn ctor_type(&self, ty: &Ident) -> CtorType {
        match self.data_types.get(ty) {
            Some(data) if data.constructors.len() == 1 => CtorType::ProductType,
            _ => CtorType::SumType,
        }
    }

    fn lookup_scope(&self, scope: &Scope, ident: &Ident) -> Option<Level> {
        scope
            .iter()
            .rev()
            .find(|(bound, _)| bound == ident)
            .map(|(_, lvl)| *lvl)
    }

    fn is_newtype_ctor(&self, q: &Qualified) -> bool {
        match &q.module {
            Some(m) if *m != self.name => false,
            _ => self.newtypes.contains(&q.ident),
        }
    }

    pub fn convert(&self, expr: &SourceExpr) -> Expr {
        self.convert_at(&Scope::new(), 0, expr)
    }

    fn convert_at(&self, scope: &Scope, depth: usize, expr: &SourceExpr) -> Expr {
        let ctx = &self.ctx;
        match expr {
            SourceExpr::SrcVar(q) => match &q.module {
                None => match self.lookup_scope(scope, &q.ident) {
                    Some(lvl) => build(ctx, Syntax::Local(Some(q.ident.clone()), lvl)),
                    None => build(ctx, Syntax::Var(q.qualify_in(&self.name))),
                },
                Some(_) => build(ctx, Syntax::Var(q.clone())),
            },
            SourceExpr::SrcLit(lit) => {
                let lit = self.convert_literal(scope, depth, lit);
                build(ctx, Syntax::Lit(lit))
            }
            SourceExpr::SrcApp(head, args) => {
                // A newtype wrapper applied to its single argument
                // erases to the argument.
                if let SourceExpr::SrcVar(q) = head.as_ref() {
                    if args.len() == 1
                        && q.module.as_ref().map_or(true, |m| *m == self.name)
                        && self.is_newtype_ctor(q)
                        && self.lookup_scope(scope, &q.ident).is_none()
                    {
                        return self.convert_at(scope, depth, &args[0]);
                    }
                }
                let head = self.convert_at(scope, depth, head);
                let args = args
                    .iter()
                    .map(|a| self.convert_at(scope, depth, a))
                    .collect::<Vec<Expr>>();
                build(ctx, Syntax::App(head, args))
            }
            SourceExpr::SrcAbs(params, body) => {
                let (params, scope2, depth2) = self.bind_params(scope, depth, params);
                let body = self.convert_at(&scope2, depth2, body);
                build(ctx, Syntax::Abs(params, body))
            }
            SourceExpr::SrcUncurriedAbs(params, body) => {
                let (params, scope2, depth2) = self.bind_params(scope, depth, params);
                let body = self.convert_at(&scope2, depth2, body);
                build(ctx, Syntax::UncurriedAbs(params, body))
            }
            SourceExpr::SrcUncurriedEffectAbs(params, body) => {
                let (params, scope2, depth2) = self.bind_params(scope, depth, params);
                let body = self.convert_at(&scope2, depth2, body);
                build(ctx, Syntax::UncurriedEffectAbs(params, body))
            }
            SourceExpr::SrcUncurriedApp(head, args) => {
                let head = self.convert_at(scope, depth, head);
                let args = args
                    .iter()
                    .map(|a| self.convert_at(scope, depth, a))
                    .collect::<Vec<Expr>>();
                build(ctx, Syntax::UncurriedApp(head, args))
            }
            SourceExpr::SrcUncurriedEffectApp(head, args) => {
                let head = self.convert_at(scope, depth, head);
                let args = args
                    .iter()
                    .map(|a| self.convert_at(scope, depth, a))
                    .collect::<Vec<Expr>>();
                build(ctx, Syntax::UncurriedEffectApp(head, args))
            }
            SourceExpr::SrcLet(ident, binding, body) => {
                let binding = self.convert_at(scope, depth, binding);
                let lvl = Level(depth);
                let mut scope2 = scope.clone();
                scope2.push((ident.clone(), lvl));
                let body = self.convert_at(&scope2, depth + 1, body);
                build(ctx, Syntax::Let(Some(ident.clone()), lvl, binding, body))
            }
            SourceExpr::SrcLetRec(bindings, body) => {
                if bindings.is_empty() {
                    errors::empty_rec_group(line!());
                }
                let lvl = Level(depth);
                let mut scope2 = scope.clone();
                for (ident, _) in bindings.iter() {
                    scope2.push((ident.clone(), lvl));
                }
                let bindings = bindings
                    .iter()
                    .map(|(ident, rhs)| {
                        (ident.clone(), self.convert_at(&scope2, depth + 1, rhs))
                    })
                    .collect::<Vec<(Ident, Expr)>>();
                let body = self.convert_at(&scope2, depth + 1, body);
                build(ctx, Syntax::LetRec(lvl, bindings, body))
            }
            SourceExpr::SrcEffectBind(ident, value, body) => {
                let value = self.convert_at(scope, depth, value);
                let lvl = Level(depth);
                let mut scope2 = scope.clone();
                scope2.push((ident.clone(), lvl));
                let body = self.convert_at(&scope2, depth + 1, body);
                build(
                    ctx,
                    Syntax::EffectBind(Some(ident.clone()), lvl, value, body),
                )
            }
            SourceExpr::SrcEffectPure(value) => {
                let value = self.convert_at(scope, depth, value);
                build(ctx, Syntax::EffectPure(value))
            }
            SourceExpr::SrcAccessor(head, acc) => {
                let head = self.convert_at(scope, depth, head);
                build(ctx, Syntax::Accessor(head, acc.clone()))
            }
            SourceExpr::SrcUpdate(head, props) => {
                let head = self.convert_at(scope, depth, head);
                let props = props
                    .iter()
                    .map(|(k, v)| (k.clone(), self.convert_at(scope, depth, v)))
                    .collect::<Vec<Prop<Expr>>>();
                build(ctx, Syntax::Update(head, props))
            }
            SourceExpr::SrcBranch(pairs, default) => {
                let pairs = pairs
                    .iter()
                    .map(|(guard, body)| {
                        (
                            self.convert_at(scope, depth, guard),
                            self.convert_at(scope, depth, body),
                        )
                    })
                    .collect::<Vec<(Expr, Expr)>>();
                let default = default
                    .as_ref()
                    .map(|d| self.convert_at(scope, depth, d));
                build(ctx, Syntax::Branch(pairs, default))
            }
            SourceExpr::SrcOp1(op1, a) => {
                let a = self.convert_at(scope, depth, a);
                build(ctx, Syntax::PrimOp(Op::Op1(op1.clone(), a)))
            }
            SourceExpr::SrcOp2(op2, l, r) => {
                let l = self.convert_at(scope, depth, l);
                let r = self.convert_at(scope, depth, r);
                build(ctx, Syntax::PrimOp(Op::Op2(*op2, l, r)))
            }
            SourceExpr::SrcFail(msg) => build(ctx, Syntax::Fail(msg.clone())),
            SourceExpr::SrcCtor { ty, tag, fields, .. } => build(
                ctx,
                Syntax::CtorDef(self.ctor_type(ty), ty.clone(), tag.clone(), fields.clone()),
            ),
        }
    }

    fn bind_params(
        &self,
        scope: &Scope,
        depth: usize,
        params: &[Ident],
    ) -> (Vec<(Option<Ident>, Level)>, Scope, usize) {
        let mut scope2 = scope.clone();
        let mut out = Vec::with_capacity(params.len());
        for (offset, ident) in params.iter().enumerate() {
            let lvl = Level(depth + offset);
            scope2.push((ident.clone(), lvl));
            out.push((Some(ident.clone()), lvl));
        }
        (out, scope2, depth + params.len())
    }

    fn convert_literal(
        &self,
        scope: &Scope,
        depth: usize,
        lit: &Literal<SourceExpr>,
    ) -> Literal<Expr> {
        match lit {
            Literal::LitInt(n) => Literal::LitInt(*n),
            Literal::LitNumber(n) => Literal::LitNumber(*n),
            Literal::LitString(s) => Literal::LitString(s.clone()),
            Literal::LitChar(c) => Literal::LitChar(*c),
            Literal::LitBoolean(b) => Literal::LitBoolean(*b),
            Literal::LitArray(xs) => Literal::LitArray(
                xs.iter()
                    .map(|x| self.convert_at(scope, depth, x))
                    .collect(),
            ),
            Literal::LitRecord(props) => Literal::LitRecord(
                props
                    .iter()
                    .map(|(k, v)| (k.clone(), self.convert_at(scope, depth, v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod convert_tests {
    use super::*;
    use crate::name::{mk_ident, mk_unqualified};
    use std::sync::Arc;

    fn test_module(bindings: Vec<BindGroup>) -> Module {
        Module {
            name: ModuleName::from("Test"),
            imports: Vec::new(),
            exports: Vec::new(),
            reexports: Vec::new(),
            foreign: Vec::new(),
            directives: ModuleDirectives::default(),
            bindings,
        }
    }

    fn converter(module: &Module) -> ModuleConverter {
        ModuleConverter::new(module, Ctx::new(Arc::new(Directives::new())))
    }

    fn var(name: &str) -> SourceExpr {
        SourceExpr::SrcVar(mk_unqualified(mk_ident(name)))
    }

    #[test]
    fn bare_variables_resolve_locally_first() {
        let module = test_module(Vec::new());
        let conv = converter(&module);
        let e = conv.convert(&SourceExpr::SrcAbs(
            vec![mk_ident("x")],
            Box::new(var("x")),
        ));
        match e.syntax() {
            Some(Syntax::Abs(params, body)) => {
                assert_eq!(params[0].1, Level(0));
                match body.syntax() {
                    Some(Syntax::Local(Some(id), Level(0))) => assert_eq!(id.as_str(), "x"),
                    owise => panic!("expected a local, got {:?}", owise),
                }
            }
            owise => panic!("expected an abs, got {:?}", owise),
        }
    }

    #[test]
    fn unknown_bare_variables_qualify_into_the_module() {
        let module = test_module(Vec::new());
        let conv = converter(&module);
        let e = conv.convert(&var("free"));
        match e.syntax() {
            Some(Syntax::Var(q)) => {
                assert_eq!(q.module, Some(ModuleName::from("Test")));
            }
            owise => panic!("expected a var, got {:?}", owise),
        }
    }

    #[test]
    fn single_ctor_types_are_products() {
        let ctor = SourceExpr::SrcCtor {
            newtype: false,
            ty: mk_ident("Pair"),
            tag: mk_ident("MkPair"),
            fields: vec![String::from("fst"), String::from("snd")],
        };
        let module = test_module(vec![BindGroup::NonRec(SourceBinding {
            ident: mk_ident("MkPair"),
            expr: ctor.clone(),
        })]);
        let conv = converter(&module);
        let e = conv.convert(&ctor);
        match e.syntax() {
            Some(Syntax::CtorDef(CtorType::ProductType, _, _, fields)) => {
                assert_eq!(fields.len(), 2)
            }
            owise => panic!("expected a product ctor, got {:?}", owise),
        }
        let types = data_types_of(&module);
        assert_eq!(types.get(&mk_ident("Pair")).unwrap().size, 2);
    }

    #[test]
    fn newtype_wrappers_erase_at_application() {
        let ctor = SourceExpr::SrcCtor {
            newtype: true,
            ty: mk_ident("Age"),
            tag: mk_ident("Age"),
            fields: vec![String::from("value")],
        };
        let module = test_module(vec![BindGroup::NonRec(SourceBinding {
            ident: mk_ident("Age"),
            expr: ctor,
        })]);
        let conv = converter(&module);
        let e = conv.convert(&SourceExpr::SrcApp(
            Box::new(var("Age")),
            vec![SourceExpr::SrcLit(Literal::LitInt(7))],
        ));
        match e.syntax() {
            Some(Syntax::Lit(Literal::LitInt(7))) => (),
            owise => panic!("expected the erased payload, got {:?}", owise),
        }
    }

    #[test]
    fn letrec_members_share_one_level() {
        let module = test_module(Vec::new());
        let conv = converter(&module);
        let e = conv.convert(&SourceExpr::SrcLetRec(
            vec![
                (mk_ident("f"), var("g")),
                (mk_ident("g"), var("f")),
            ],
            Box::new(var("f")),
        ));
        match e.syntax() {
            Some(Syntax::LetRec(Level(0), bindings, body)) => {
                assert_eq!(bindings.len(), 2);
                match bindings[0].1.syntax() {
                    Some(Syntax::Local(Some(id), Level(0))) => assert_eq!(id.as_str(), "g"),
                    owise => panic!("expected sibling local, got {:?}", owise),
                }
                match body.syntax() {
                    Some(Syntax::Local(Some(id), Level(0))) => assert_eq!(id.as_str(), "f"),
                    owise => panic!("expected body local, got {:?}", owise),
                }
            }
            owise => panic!("expected letrec, got {:?}", owise),
        }
    }
}
