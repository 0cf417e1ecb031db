use std::sync::Arc;

use crate::analysis::{Analysis, Complexity, Usage};
use crate::name::{Ident, Level, Qualified};
use crate::op::Op;

/// Whether a data type has exactly one constructor (a product) or
/// several (a sum). Products need no tag test at elimination sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtorType {
    ProductType,
    SumType,
}

/// A projection out of a record, an array, or a constructor payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Accessor {
    GetProp(String),
    GetIndex(usize),
    GetOffset(usize),
}

/// A record field. Construction and update normalize field lists with
/// `normalize_props`, so downstream consumers may rely on sorted,
/// duplicate-free keys.
pub type Prop<T> = (String, T);

#[derive(Debug, Clone, PartialEq)]
pub enum Literal<T> {
    LitInt(i32),
    LitNumber(f64),
    LitString(String),
    LitChar(char),
    LitBoolean(bool),
    LitArray(Vec<T>),
    LitRecord(Vec<Prop<T>>),
}

/// The syntactic forms shared by every stage of the pipeline. The
/// payload is generic: `Syntax<Expr>` is the build IR the rewriter
/// works on, `Syntax<NeutralExpr>` is the rewrite-free output form.
#[derive(Debug, Clone, PartialEq)]
pub enum Syntax<T> {
    Var(Qualified),
    Local(Option<Ident>, Level),
    Lit(Literal<T>),
    App(T, Vec<T>),
    Abs(Vec<(Option<Ident>, Level)>, T),
    UncurriedApp(T, Vec<T>),
    UncurriedAbs(Vec<(Option<Ident>, Level)>, T),
    UncurriedEffectApp(T, Vec<T>),
    UncurriedEffectAbs(Vec<(Option<Ident>, Level)>, T),
    Let(Option<Ident>, Level, T, T),
    LetRec(Level, Vec<(Ident, T)>, T),
    EffectBind(Option<Ident>, Level, T, T),
    EffectPure(T),
    Accessor(T, Accessor),
    Update(T, Vec<Prop<T>>),
    CtorDef(CtorType, Ident, Ident, Vec<String>),
    CtorSaturated(Qualified, CtorType, Ident, Ident, Vec<Prop<T>>),
    Branch(Vec<(T, T)>, Option<T>),
    PrimOp(Op<T>),
    Fail(String),
}

/// A queued local rewrite. `Inline` and `LetAssoc` are work orders for
/// the next evaluation pass and set the analysis rewrite bit; `Stop` is
/// a stable marker pinning a reference that must not be inlined again
/// this pass, and does not.
#[derive(Debug, Clone)]
pub enum Rewrite {
    Inline(Option<Ident>, Level, Expr, Expr),
    LetAssoc(Vec<(Option<Ident>, Level, Expr)>, Expr),
    Stop(Qualified),
}

/// Build IR: an analysis-carrying tree. The analysis on a node covers
/// the entire subtree, computed as the tree is constructed, so the
/// rewriter never re-walks children to make a decision.
#[derive(Clone)]
pub struct Expr(Arc<InnerExpr>);

pub enum InnerExpr {
    Syntax { analysis: Analysis, node: Syntax<Expr> },
    Rewrite { analysis: Analysis, node: Rewrite },
}

impl std::convert::AsRef<InnerExpr> for Expr {
    fn as_ref(&self) -> &InnerExpr {
        self.0.as_ref()
    }
}

impl From<InnerExpr> for Expr {
    fn from(x: InnerExpr) -> Expr {
        Expr(Arc::new(x))
    }
}

impl Expr {
    pub fn analysis(&self) -> &Analysis {
        match self.as_ref() {
            InnerExpr::Syntax { analysis, .. } => analysis,
            InnerExpr::Rewrite { analysis, .. } => analysis,
        }
    }

    pub fn syntax(&self) -> Option<&Syntax<Expr>> {
        match self.as_ref() {
            InnerExpr::Syntax { node, .. } => Some(node),
            InnerExpr::Rewrite { .. } => None,
        }
    }

    pub fn is_abs(&self) -> bool {
        match self.syntax() {
            Some(Syntax::Abs(..))
            | Some(Syntax::UncurriedAbs(..))
            | Some(Syntax::UncurriedEffectAbs(..)) => true,
            _ => false,
        }
    }

    pub fn lit_boolean(&self) -> Option<bool> {
        match self.syntax() {
            Some(Syntax::Lit(Literal::LitBoolean(b))) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.as_ref() {
            InnerExpr::Syntax { node, .. } => write!(f, "{:?}", node),
            InnerExpr::Rewrite { node, .. } => write!(f, "{:?}", node),
        }
    }
}

pub fn mk_syntax(node: Syntax<Expr>) -> Expr {
    let analysis = analyze(&node);
    InnerExpr::Syntax { analysis, node }.into()
}

pub fn mk_rewrite(node: Rewrite) -> Expr {
    let analysis = analyze_rewrite(&node);
    InnerExpr::Rewrite { analysis, node }.into()
}

fn analyze_all<'e, I>(exprs: I) -> Analysis
where
    I: IntoIterator<Item = &'e Expr>,
{
    exprs
        .into_iter()
        .fold(Analysis::new(), |acc, e| acc.append(e.analysis()))
}

fn analyze_props(props: &[Prop<Expr>]) -> Analysis {
    analyze_all(props.iter().map(|(_, v)| v))
}

/// Parameter usage is read off the body before the body's own usages
/// are erased at the binder, then everything the body still touches is
/// marked captured: it now runs however many times the closure runs.
fn analyze_abs(params: &[(Option<Ident>, Level)], body: &Expr) -> Analysis {
    let body_analysis = body.analysis();
    let args = params
        .iter()
        .map(|(_, lvl)| body_analysis.usage_of(*lvl))
        .collect::<Vec<Usage>>();
    let mut acc = Analysis::new().append(body_analysis);
    for (_, lvl) in params.iter() {
        acc = acc.bound(*lvl);
    }
    acc.capture()
        .with_args(args)
        .with_complexity(Complexity::NonTrivial)
        .bump()
}

/// The bottom-up analysis of one syntax node, given the analyses
/// already sitting on its children.
pub fn analyze(node: &Syntax<Expr>) -> Analysis {
    match node {
        Syntax::Var(q) => {
            let acc = Analysis::new().bump();
            match &q.module {
                Some(m) => acc.with_dep(m.clone()),
                None => acc,
            }
        }
        Syntax::Local(_, lvl) => Analysis::new().used(*lvl).bump(),
        Syntax::Lit(lit) => match lit {
            Literal::LitArray(xs) => analyze_all(xs)
                .with_complexity(Complexity::KnownSize)
                .bump(),
            Literal::LitRecord(props) => analyze_props(props)
                .with_complexity(Complexity::KnownSize)
                .bump(),
            _ => Analysis::new().bump(),
        },
        Syntax::App(head, args)
        | Syntax::UncurriedApp(head, args)
        | Syntax::UncurriedEffectApp(head, args) => analyze_all(Some(head).into_iter().chain(args))
            .with_complexity(Complexity::NonTrivial)
            .bump(),
        Syntax::Abs(params, body)
        | Syntax::UncurriedAbs(params, body)
        | Syntax::UncurriedEffectAbs(params, body) => analyze_abs(params, body),
        Syntax::Let(_, lvl, binding, body) => Analysis::new()
            .append(binding.analysis())
            .append(body.analysis())
            .bound(*lvl)
            .with_complexity(Complexity::NonTrivial)
            .bump(),
        Syntax::LetRec(lvl, bindings, body) => {
            // A recursive binding may replay its right-hand sides any
            // number of times; scaling the counts keeps the inliner
            // from treating anything in the group as single-use.
            let group = bindings
                .iter()
                .fold(Analysis::new(), |acc, (_, e)| acc.append(e.analysis()))
                .power(2);
            group
                .append(body.analysis())
                .bound(*lvl)
                .with_complexity(Complexity::NonTrivial)
                .bump()
        }
        Syntax::EffectBind(_, lvl, value, body) => Analysis::new()
            .append(value.analysis())
            .append(body.analysis())
            .bound(*lvl)
            .with_complexity(Complexity::NonTrivial)
            .bump(),
        Syntax::EffectPure(value) => Analysis::new()
            .append(value.analysis())
            .with_complexity(Complexity::NonTrivial)
            .bump(),
        Syntax::Accessor(e, _) => Analysis::new()
            .append(e.analysis())
            .with_complexity(Complexity::Deref)
            .bump(),
        Syntax::Update(e, props) => Analysis::new()
            .append(e.analysis())
            .append(&analyze_props(props))
            .with_complexity(Complexity::NonTrivial)
            .bump(),
        Syntax::CtorDef(..) => Analysis::new()
            .with_complexity(Complexity::KnownSize)
            .bump(),
        Syntax::CtorSaturated(q, _, _, _, fields) => {
            let acc = analyze_props(fields)
                .with_complexity(Complexity::KnownSize)
                .bump();
            match &q.module {
                Some(m) => acc.with_dep(m.clone()),
                None => acc,
            }
        }
        Syntax::Branch(pairs, default) => pairs
            .iter()
            .flat_map(|(guard, body)| vec![guard, body])
            .chain(default.iter())
            .fold(Analysis::new(), |acc, e| acc.append(e.analysis()))
            .with_complexity(Complexity::NonTrivial)
            .bump(),
        Syntax::PrimOp(op) => match op {
            Op::Op1(_, a) => Analysis::new()
                .append(a.analysis())
                .with_complexity(Complexity::NonTrivial)
                .bump(),
            Op::Op2(_, a, b) => Analysis::new()
                .append(a.analysis())
                .append(b.analysis())
                .with_complexity(Complexity::NonTrivial)
                .bump(),
        },
        Syntax::Fail(_) => Analysis::new()
            .with_complexity(Complexity::NonTrivial)
            .bump(),
    }
}

pub fn analyze_rewrite(node: &Rewrite) -> Analysis {
    match node {
        Rewrite::Inline(_, lvl, binding, body) => Analysis::new()
            .append(binding.analysis())
            .append(body.analysis())
            .bound(*lvl)
            .with_complexity(Complexity::NonTrivial)
            .bump()
            .with_rewrite(),
        Rewrite::LetAssoc(bindings, body) => {
            let mut acc = bindings
                .iter()
                .fold(Analysis::new(), |a, (_, _, e)| a.append(e.analysis()))
                .append(body.analysis());
            for (_, lvl, _) in bindings.iter() {
                acc = acc.bound(*lvl);
            }
            acc.with_complexity(Complexity::NonTrivial)
                .bump()
                .with_rewrite()
        }
        Rewrite::Stop(q) => {
            let acc = Analysis::new().bump();
            match &q.module {
                Some(m) => acc.with_dep(m.clone()),
                None => acc,
            }
        }
    }
}

/// The rewrite-free output form: the same grammar, with no analysis and
/// no queued rewrites, ready for a code emitter.
#[derive(Clone, PartialEq)]
pub struct NeutralExpr(Arc<Syntax<NeutralExpr>>);

pub fn mk_neutral(node: Syntax<NeutralExpr>) -> NeutralExpr {
    NeutralExpr(Arc::new(node))
}

impl std::convert::AsRef<Syntax<NeutralExpr>> for NeutralExpr {
    fn as_ref(&self) -> &Syntax<NeutralExpr> {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for NeutralExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_ref())
    }
}

/// Rebuilds a syntax node over a different payload type, visiting
/// children in declaration order. Freeze and neutral reification are
/// both one call to this plus recursion.
pub fn map_syntax<T, U>(node: &Syntax<T>, f: &mut impl FnMut(&T) -> U) -> Syntax<U> {
    let map_props = |props: &[Prop<T>], f: &mut dyn FnMut(&T) -> U| -> Vec<Prop<U>> {
        props.iter().map(|(k, v)| (k.clone(), f(v))).collect()
    };
    match node {
        Syntax::Var(q) => Syntax::Var(q.clone()),
        Syntax::Local(id, lvl) => Syntax::Local(id.clone(), *lvl),
        Syntax::Lit(lit) => Syntax::Lit(match lit {
            Literal::LitInt(n) => Literal::LitInt(*n),
            Literal::LitNumber(n) => Literal::LitNumber(*n),
            Literal::LitString(s) => Literal::LitString(s.clone()),
            Literal::LitChar(c) => Literal::LitChar(*c),
            Literal::LitBoolean(b) => Literal::LitBoolean(*b),
            Literal::LitArray(xs) => Literal::LitArray(xs.iter().map(|x| f(x)).collect()),
            Literal::LitRecord(props) => Literal::LitRecord(map_props(props, f)),
        }),
        Syntax::App(head, args) => Syntax::App(f(head), args.iter().map(|a| f(a)).collect()),
        Syntax::Abs(params, body) => Syntax::Abs(params.clone(), f(body)),
        Syntax::UncurriedApp(head, args) => {
            Syntax::UncurriedApp(f(head), args.iter().map(|a| f(a)).collect())
        }
        Syntax::UncurriedAbs(params, body) => Syntax::UncurriedAbs(params.clone(), f(body)),
        Syntax::UncurriedEffectApp(head, args) => {
            Syntax::UncurriedEffectApp(f(head), args.iter().map(|a| f(a)).collect())
        }
        Syntax::UncurriedEffectAbs(params, body) => {
            Syntax::UncurriedEffectAbs(params.clone(), f(body))
        }
        Syntax::Let(id, lvl, binding, body) => {
            Syntax::Let(id.clone(), *lvl, f(binding), f(body))
        }
        Syntax::LetRec(lvl, bindings, body) => Syntax::LetRec(
            *lvl,
            bindings.iter().map(|(id, e)| (id.clone(), f(e))).collect(),
            f(body),
        ),
        Syntax::EffectBind(id, lvl, value, body) => {
            Syntax::EffectBind(id.clone(), *lvl, f(value), f(body))
        }
        Syntax::EffectPure(value) => Syntax::EffectPure(f(value)),
        Syntax::Accessor(head, acc) => Syntax::Accessor(f(head), acc.clone()),
        Syntax::Update(head, props) => Syntax::Update(f(head), map_props(props, f)),
        Syntax::CtorDef(ct, ty, tag, fields) => {
            Syntax::CtorDef(*ct, ty.clone(), tag.clone(), fields.clone())
        }
        Syntax::CtorSaturated(q, ct, ty, tag, fields) => {
            Syntax::CtorSaturated(q.clone(), *ct, ty.clone(), tag.clone(), map_props(fields, f))
        }
        Syntax::Branch(pairs, default) => Syntax::Branch(
            pairs.iter().map(|(guard, body)| (f(guard), f(body))).collect(),
            default.as_ref().map(|d| f(d)),
        ),
        Syntax::PrimOp(op) => Syntax::PrimOp(match op {
            Op::Op1(op1, a) => Op::Op1(op1.clone(), f(a)),
            Op::Op2(op2, l, r) => Op::Op2(*op2, f(l), f(r)),
        }),
        Syntax::Fail(msg) => Syntax::Fail(msg.clone()),
    }
}

/// Lifts a published neutral implementation back into build IR so it
/// can be evaluated at an inlining site. Analyses are recomputed
/// bottom-up on the way.
pub fn reify_neutral(neutral: &NeutralExpr) -> Expr {
    mk_syntax(map_syntax(neutral.as_ref(), &mut |child| {
        reify_neutral(child)
    }))
}

/// Stable-sorts a field list by key and keeps the first occurrence of
/// each key, so `[(b, 2), (a, 1), (b, 9)]` becomes `[(a, 1), (b, 2)]`.
/// Update reduction concatenates the update's fields in front of the
/// base record's before calling this, which is what makes the update
/// win.
pub fn normalize_props<T>(mut props: Vec<Prop<T>>) -> Vec<Prop<T>> {
    props.sort_by(|(k1, _), (k2, _)| k1.cmp(k2));
    let mut out = Vec::with_capacity(props.len());
    let mut last_key: Option<String> = None;
    for (key, value) in props {
        if last_key.as_ref() == Some(&key) {
            continue;
        }
        last_key = Some(key.clone());
        out.push((key, value));
    }
    out
}

#[cfg(test)]
mod expr_tests {
    use super::*;
    use crate::name::{mk_ident, mk_unqualified};

    fn local(lvl: usize) -> Expr {
        mk_syntax(Syntax::Local(None, Level(lvl)))
    }

    #[test]
    fn abs_records_parameter_usage_and_bounds_levels() {
        // \x0 -> x0 x0 outer
        let body = mk_syntax(Syntax::App(local(0), vec![local(0), local(7)]));
        let abs = mk_syntax(Syntax::Abs(vec![(None, Level(0))], body));
        let analysis = abs.analysis();
        assert_eq!(analysis.args.len(), 1);
        assert_eq!(analysis.args[0].count, 2);
        assert_eq!(analysis.usage_of(Level(0)).count, 0);
        assert_eq!(analysis.usage_of(Level(7)).count, 1);
        assert!(analysis.usage_of(Level(7)).captured);
    }

    #[test]
    fn let_composes_binding_and_body() {
        let e = mk_syntax(Syntax::Let(None, Level(1), local(0), local(1)));
        assert_eq!(e.analysis().usage_of(Level(0)).count, 1);
        assert_eq!(e.analysis().usage_of(Level(1)).count, 0);
        assert!(!e.analysis().rewrite);
    }

    #[test]
    fn rewrite_nodes_set_the_rewrite_bit_except_stop() {
        let inline = mk_rewrite(Rewrite::Inline(None, Level(0), local(3), local(0)));
        assert!(inline.analysis().rewrite);
        let stop = mk_rewrite(Rewrite::Stop(mk_unqualified(mk_ident("f"))));
        assert!(!stop.analysis().rewrite);
    }

    #[test]
    fn normalize_props_sorts_and_keeps_first() {
        let props = vec![("b".to_string(), 2), ("a".to_string(), 1), ("b".to_string(), 9)];
        let normal = normalize_props(props);
        assert_eq!(normal, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }
}
