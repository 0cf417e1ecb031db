//! Renders optimized output back into the same s-expression surface
//! the reader consumes, plus a per-module summary for `--print`.

use crate::driver::BackendModule;
use crate::env::{Directive, EvalRef, Impl};
use crate::expr::{Accessor, CtorType, Literal, NeutralExpr, Syntax};
use crate::name::{Ident, Level};
use crate::op::{Op, Op1, Op2, OpNum, OpOrd};

pub fn render_neutral(expr: &NeutralExpr) -> String {
    let mut out = String::with_capacity(256);
    write_neutral(&mut out, expr);
    out
}

fn write_binder(out: &mut String, id: &Option<Ident>, lvl: Level) {
    match id {
        Some(id) => out.push_str(&format!("{}%{}", id, lvl.0)),
        None => out.push_str(&format!("%{}", lvl.0)),
    }
}

fn write_args(out: &mut String, args: &[NeutralExpr]) {
    for arg in args {
        out.push(' ');
        write_neutral(out, arg);
    }
}

fn write_neutral(out: &mut String, expr: &NeutralExpr) {
    match expr.as_ref() {
        Syntax::Var(q) => out.push_str(&format!("{}", q)),
        Syntax::Local(id, lvl) => write_binder(out, id, *lvl),
        Syntax::Lit(lit) => write_literal(out, lit),
        Syntax::App(head, args) => {
            out.push_str("(app ");
            write_neutral(out, head);
            write_args(out, args);
            out.push(')');
        }
        Syntax::UncurriedApp(head, args) => {
            out.push_str("(uapp ");
            write_neutral(out, head);
            write_args(out, args);
            out.push(')');
        }
        Syntax::UncurriedEffectApp(head, args) => {
            out.push_str("(ueffapp ");
            write_neutral(out, head);
            write_args(out, args);
            out.push(')');
        }
        Syntax::Abs(params, body)
        | Syntax::UncurriedAbs(params, body)
        | Syntax::UncurriedEffectAbs(params, body) => {
            let keyword = match expr.as_ref() {
                Syntax::Abs(..) => "abs",
                Syntax::UncurriedAbs(..) => "uabs",
                _ => "ueffabs",
            };
            out.push_str(&format!("({} (", keyword));
            for (idx, (id, lvl)) in params.iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                write_binder(out, id, *lvl);
            }
            out.push_str(") ");
            write_neutral(out, body);
            out.push(')');
        }
        Syntax::Let(id, lvl, binding, body) => {
            out.push_str("(let ");
            write_binder(out, id, *lvl);
            out.push(' ');
            write_neutral(out, binding);
            out.push(' ');
            write_neutral(out, body);
            out.push(')');
        }
        Syntax::LetRec(lvl, bindings, body) => {
            out.push_str("(letrec (");
            for (idx, (id, rhs)) in bindings.iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                out.push('(');
                write_binder(out, &Some(id.clone()), *lvl);
                out.push(' ');
                write_neutral(out, rhs);
                out.push(')');
            }
            out.push_str(") ");
            write_neutral(out, body);
            out.push(')');
        }
        Syntax::EffectBind(id, lvl, value, body) => {
            out.push_str("(dobind ");
            write_binder(out, id, *lvl);
            out.push(' ');
            write_neutral(out, value);
            out.push(' ');
            write_neutral(out, body);
            out.push(')');
        }
        Syntax::EffectPure(value) => {
            out.push_str("(pure ");
            write_neutral(out, value);
            out.push(')');
        }
        Syntax::Accessor(head, acc) => {
            let (keyword, arg) = match acc {
                Accessor::GetProp(k) => ("get-prop", k.clone()),
                Accessor::GetIndex(n) => ("get-index", n.to_string()),
                Accessor::GetOffset(n) => ("get-offset", n.to_string()),
            };
            out.push_str(&format!("({} ", keyword));
            write_neutral(out, head);
            out.push_str(&format!(" {})", arg));
        }
        Syntax::Update(head, props) => {
            out.push_str("(update ");
            write_neutral(out, head);
            for (key, value) in props {
                out.push_str(&format!(" ({} ", key));
                write_neutral(out, value);
                out.push(')');
            }
            out.push(')');
        }
        Syntax::CtorDef(ct, ty, tag, fields) => {
            let kind = match ct {
                CtorType::ProductType => "product",
                CtorType::SumType => "sum",
            };
            out.push_str(&format!("(ctor {} {} {}", kind, ty, tag));
            for field in fields {
                out.push_str(&format!(" {}", field));
            }
            out.push(')');
        }
        Syntax::CtorSaturated(q, _, _, _, fields) => {
            out.push_str(&format!("(data {}", q));
            for (key, value) in fields {
                out.push_str(&format!(" ({} ", key));
                write_neutral(out, value);
                out.push(')');
            }
            out.push(')');
        }
        Syntax::Branch(pairs, default) => {
            out.push_str("(branch (");
            for (idx, (guard, body)) in pairs.iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                out.push('(');
                write_neutral(out, guard);
                out.push(' ');
                write_neutral(out, body);
                out.push(')');
            }
            out.push(')');
            if let Some(default) = default {
                out.push(' ');
                write_neutral(out, default);
            }
            out.push(')');
        }
        Syntax::PrimOp(op) => match op {
            Op::Op1(Op1::OpIsTag(q), a) => {
                out.push_str(&format!("(is-tag {} ", q));
                write_neutral(out, a);
                out.push(')');
            }
            Op::Op1(op1, a) => {
                out.push_str(&format!("({} ", op1_name(op1)));
                write_neutral(out, a);
                out.push(')');
            }
            Op::Op2(op2, lhs, rhs) => {
                out.push_str(&format!("({} ", op2_name(*op2)));
                write_neutral(out, lhs);
                out.push(' ');
                write_neutral(out, rhs);
                out.push(')');
            }
        },
        Syntax::Fail(msg) => out.push_str(&format!("(fail {:?})", msg)),
    }
}

fn write_literal(out: &mut String, lit: &Literal<NeutralExpr>) {
    match lit {
        Literal::LitInt(n) => out.push_str(&n.to_string()),
        Literal::LitNumber(n) => out.push_str(&format!("(number {})", n)),
        Literal::LitString(s) => out.push_str(&format!("{:?}", s)),
        Literal::LitChar(c) => out.push_str(&format!("(char {})", c)),
        Literal::LitBoolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Literal::LitArray(xs) => {
            out.push_str("(array");
            for x in xs {
                out.push(' ');
                write_neutral(out, x);
            }
            out.push(')');
        }
        Literal::LitRecord(props) => {
            out.push_str("(record");
            for (key, value) in props {
                out.push_str(&format!(" ({} ", key));
                write_neutral(out, value);
                out.push(')');
            }
            out.push(')');
        }
    }
}

fn op1_name(op1: &Op1) -> &'static str {
    match op1 {
        Op1::OpBooleanNot => "not",
        Op1::OpIntBitNot => "bitnot",
        Op1::OpIntNegate => "neg-int",
        Op1::OpNumberNegate => "neg-num",
        Op1::OpArrayLength => "length",
        Op1::OpIsTag(_) => "is-tag",
    }
}

fn op2_name(op2: Op2) -> String {
    let ord = |ord: OpOrd| -> &'static str {
        match ord {
            OpOrd::OpEq => "eq",
            OpOrd::OpNotEq => "neq",
            OpOrd::OpLt => "lt",
            OpOrd::OpLte => "lte",
            OpOrd::OpGt => "gt",
            OpOrd::OpGte => "gte",
        }
    };
    let num = |num: OpNum| -> &'static str {
        match num {
            OpNum::OpAdd => "add",
            OpNum::OpSubtract => "sub",
            OpNum::OpMultiply => "mul",
            OpNum::OpDivide => "div",
        }
    };
    match op2 {
        Op2::OpBooleanAnd => String::from("and"),
        Op2::OpBooleanOr => String::from("or"),
        Op2::OpStringAppend => String::from("append"),
        Op2::OpIntBitAnd => String::from("band"),
        Op2::OpIntBitOr => String::from("bor"),
        Op2::OpIntBitXor => String::from("bxor"),
        Op2::OpIntBitShiftLeft => String::from("shl"),
        Op2::OpIntBitShiftRight => String::from("shr"),
        Op2::OpIntBitZeroFillShiftRight => String::from("zshr"),
        Op2::OpBooleanOrd(o) => format!("{}-bool", ord(o)),
        Op2::OpCharOrd(o) => format!("{}-char", ord(o)),
        Op2::OpIntOrd(o) => format!("{}-int", ord(o)),
        Op2::OpNumberOrd(o) => format!("{}-num", ord(o)),
        Op2::OpStringOrd(o) => format!("{}-string", ord(o)),
        Op2::OpIntNum(n) => format!("{}-int", num(n)),
        Op2::OpNumberNum(n) => format!("{}-num", num(n)),
    }
}

fn render_eval_ref(r: &EvalRef) -> String {
    match r {
        EvalRef::EvalExtern(q, None) => format!("{}", q),
        EvalRef::EvalExtern(q, Some(Accessor::GetProp(k))) => format!("(prop {} {})", q, k),
        EvalRef::EvalExtern(q, Some(acc)) => format!("(prop {} {:?})", q, acc),
        EvalRef::EvalLocal(Some(id), lvl) => format!("(local-ref {} {})", id, lvl.0),
        EvalRef::EvalLocal(None, lvl) => format!("(local-ref _ {})", lvl.0),
    }
}

fn render_directive(d: Directive) -> String {
    match d {
        Directive::InlineNever => String::from("never"),
        Directive::InlineAlways => String::from("always"),
        Directive::InlineArity(n) => format!("arity {}", n),
    }
}

pub fn render_module(module: &BackendModule) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str(&format!(";; module {}\n", module.name));
    if !module.imports.is_empty() {
        let imports = module
            .imports
            .iter()
            .map(|m| format!("{}", m))
            .collect::<Vec<String>>()
            .join(" ");
        out.push_str(&format!(";; imports: {}\n", imports));
    }
    if !module.foreign.is_empty() {
        let foreign = module
            .foreign
            .iter()
            .map(|f| format!("{}", f))
            .collect::<Vec<String>>()
            .join(" ");
        out.push_str(&format!(";; foreign: {}\n", foreign));
    }
    for (ty, data) in module.data_types.iter() {
        out.push_str(&format!(";; data {} (size {}):", ty, data.size));
        for (tag, ctor) in data.constructors.iter() {
            out.push_str(&format!(" {}/{}", tag, ctor.fields.len()));
        }
        out.push('\n');
    }
    for (r, d) in module.directives.iter() {
        out.push_str(&format!(
            ";; directive {} {}\n",
            render_eval_ref(r),
            render_directive(*d)
        ));
    }
    for group in module.bindings.iter() {
        if group.recursive {
            out.push_str(";; recursive group\n");
        }
        for (ident, expr) in group.bindings.iter() {
            out.push_str(&format!("(bind {} {})\n", ident, render_neutral(expr)));
        }
    }
    for (q, (analysis, implementation)) in module.implementations.iter() {
        let shape = match implementation {
            Impl::ImplExpr(group, _) if group.is_empty() => String::from("expr"),
            Impl::ImplExpr(group, _) => format!("expr (group {})", group.len()),
            Impl::ImplDict(_, props) => format!("dict ({} fields)", props.len()),
            Impl::ImplCtor(..) => String::from("ctor"),
        };
        out.push_str(&format!(
            ";; impl {} : {} size={} {:?}\n",
            q, shape, analysis.size, analysis.complexity
        ));
    }
    out
}

#[cfg(test)]
mod pretty_tests {
    use super::*;
    use crate::expr::mk_neutral;
    use crate::name::{mk_ident, mk_unqualified};

    #[test]
    fn renders_nested_applications() {
        let f = mk_neutral(Syntax::Var(mk_unqualified(mk_ident("f"))));
        let x = mk_neutral(Syntax::Local(Some(mk_ident("x")), Level(0)));
        let one = mk_neutral(Syntax::Lit(Literal::LitInt(1)));
        let app = mk_neutral(Syntax::App(f, vec![x, one]));
        assert_eq!(render_neutral(&app), "(app f x%0 1)");
    }

    #[test]
    fn renders_operator_names_the_reader_accepts() {
        assert_eq!(op2_name(Op2::OpIntOrd(OpOrd::OpNotEq)), "neq-int");
        assert_eq!(op2_name(Op2::OpNumberNum(OpNum::OpDivide)), "div-num");
        assert_eq!(op2_name(Op2::OpStringAppend), "append");
    }
}
