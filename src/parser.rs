//! Reader for the serialized surface IR. One file holds any number of
//! `(module ...)` forms; modules must arrive already topologically
//! sorted by import.
//!
//! ```text
//! (module Main
//!   (export main)
//!   (foreign ffiLog)
//!   (directive local Lib.op never)
//!   (directive export Main.addOne arity 1)
//!   (bind Just (ctor sum Maybe Just value0))
//!   (bind main (app (var Lib.op) 1 2))
//!   (bind-rec (even (abs (n) ...)) (odd (abs (n) ...))))
//! ```
//!
//! Expressions: `(var q)`, bare atoms for locals/globals, bare
//! integers, `true`/`false`, `"strings"`, `(number 1.5)`, `(char a)`,
//! `(array e...)`, `(record (k e)...)`, `(app f e...)`,
//! `(abs (x y) e)`, `(uabs (x) e)`, `(uapp f e...)`, `(ueffabs ...)`,
//! `(ueffapp ...)`, `(let x e body)`, `(letrec ((f e)...) body)`,
//! `(dobind x e body)`, `(pure e)`, `(get-prop e k)`,
//! `(get-index e n)`, `(get-offset e n)`, `(update e (k v)...)`,
//! `(branch ((guard body)...) default?)`, `(fail "msg")`,
//! `(ctor sum|product|newtype Ty Tag field...)`, unary
//! `(not e)` `(bitnot e)` `(neg-int e)` `(neg-num e)` `(length e)`
//! `(is-tag q e)`, binary `(and l r)` `(or l r)` `(append l r)`
//! `(band l r)` `(bor l r)` `(bxor l r)` `(shl l r)` `(shr l r)`
//! `(zshr l r)`, and `<cmp>-<ty>` / `<arith>-<ty>` combinations like
//! `(eq-int l r)` or `(mul-num l r)`.

use crate::convert::{BindGroup, Module, ModuleDirectives, SourceBinding, SourceExpr};
use crate::env::{Directive, Directives, EvalRef};
use crate::errors::{OptErr, OptResult};
use crate::expr::{Accessor, Literal, Prop};
use crate::name::{mk_ident, mk_module_name, mk_qualified, mk_unqualified, Ident, Level, Qualified};
use crate::op::{Op1, Op2, OpNum, OpOrd};

use SourceExpr::*;

#[derive(Debug, Clone, PartialEq)]
enum SExpr {
    Atom(String, usize),
    Str(String, usize),
    List(Vec<SExpr>, usize),
}

impl SExpr {
    fn line(&self) -> usize {
        match self {
            SExpr::Atom(_, line) | SExpr::Str(_, line) | SExpr::List(_, line) => *line,
        }
    }

    fn atom(&self) -> OptResult<&str> {
        match self {
            SExpr::Atom(s, _) => Ok(s.as_str()),
            owise => Err(OptErr::ParseUnexpected(owise.line(), describe(owise))),
        }
    }

    fn list(&self) -> OptResult<&[SExpr]> {
        match self {
            SExpr::List(items, _) => Ok(items.as_slice()),
            owise => Err(OptErr::ParseUnexpected(owise.line(), describe(owise))),
        }
    }
}

fn describe(s: &SExpr) -> String {
    match s {
        SExpr::Atom(a, _) => a.clone(),
        SExpr::Str(_, _) => String::from("<string>"),
        SExpr::List(_, _) => String::from("<list>"),
    }
}

struct Lexer<'s> {
    chars: std::iter::Peekable<std::str::Chars<'s>>,
    line: usize,
}

impl<'s> Lexer<'s> {
    fn new(source: &'s str) -> Lexer<'s> {
        Lexer {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    /// Reads the next datum, or `None` at end of input. Comments run
    /// from `;` to end of line.
    fn read(&mut self) -> OptResult<Option<SExpr>> {
        loop {
            match self.chars.peek().copied() {
                None => return Ok(None),
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('(') => {
                    let line = self.line;
                    self.bump();
                    let mut items = Vec::new();
                    loop {
                        self.skip_trivia();
                        match self.chars.peek().copied() {
                            None => return Err(OptErr::ParseExhausted(self.line)),
                            Some(')') => {
                                self.bump();
                                return Ok(Some(SExpr::List(items, line)));
                            }
                            Some(_) => match self.read()? {
                                Some(item) => items.push(item),
                                None => return Err(OptErr::ParseExhausted(self.line)),
                            },
                        }
                    }
                }
                Some(')') => {
                    return Err(OptErr::ParseUnexpected(self.line, String::from(")")));
                }
                Some('"') => {
                    let line = self.line;
                    self.bump();
                    let mut out = String::new();
                    loop {
                        match self.bump() {
                            None => return Err(OptErr::ParseExhausted(self.line)),
                            Some('"') => return Ok(Some(SExpr::Str(out, line))),
                            Some('\\') => match self.bump() {
                                Some('n') => out.push('\n'),
                                Some('t') => out.push('\t'),
                                Some(c @ '"') | Some(c @ '\\') => out.push(c),
                                Some(c) => {
                                    return Err(OptErr::ParseUnexpected(
                                        self.line,
                                        format!("\\{}", c),
                                    ))
                                }
                                None => return Err(OptErr::ParseExhausted(self.line)),
                            },
                            Some(c) => out.push(c),
                        }
                    }
                }
                Some(_) => {
                    let line = self.line;
                    let mut out = String::new();
                    while let Some(c) = self.chars.peek().copied() {
                        if c.is_whitespace() || c == '(' || c == ')' || c == '"' || c == ';' {
                            break;
                        }
                        out.push(c);
                        self.bump();
                    }
                    return Ok(Some(SExpr::Atom(out, line)));
                }
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek().copied() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }
}

/// Parses every `(module ...)` form in one source file.
pub fn parse_modules(source: &str) -> OptResult<Vec<Module>> {
    let mut lexer = Lexer::new(source);
    let mut out = Vec::new();
    while let Some(datum) = lexer.read()? {
        out.push(parse_module(&datum)?);
    }
    Ok(out)
}

fn parse_module(datum: &SExpr) -> OptResult<Module> {
    let items = datum.list()?;
    match items.first() {
        Some(head) if head.atom().ok() == Some("module") => (),
        _ => {
            return Err(OptErr::ParseUnexpected(
                datum.line(),
                String::from("expected (module ...)"),
            ))
        }
    }
    let name = match items.get(1) {
        Some(n) => crate::name::ModuleName::from(n.atom()?),
        None => return Err(OptErr::ParseExhausted(datum.line())),
    };
    let mut module = Module {
        name,
        imports: Vec::new(),
        exports: Vec::new(),
        reexports: Vec::new(),
        foreign: Vec::new(),
        directives: ModuleDirectives::default(),
        bindings: Vec::new(),
    };
    for decl in items.iter().skip(2) {
        let decl_items = decl.list()?;
        let head = match decl_items.first() {
            Some(head) => head.atom()?,
            None => return Err(OptErr::ParseExhausted(decl.line())),
        };
        match head {
            "import" => {
                for m in decl_items.iter().skip(1) {
                    module.imports.push(crate::name::ModuleName::from(m.atom()?));
                }
            }
            "export" => {
                for id in decl_items.iter().skip(1) {
                    module.exports.push(mk_ident(id.atom()?));
                }
            }
            "reexport" => {
                let id = decl_items
                    .get(1)
                    .ok_or(OptErr::ParseExhausted(decl.line()))?;
                let target = decl_items
                    .get(2)
                    .ok_or(OptErr::ParseExhausted(decl.line()))?;
                module
                    .reexports
                    .push((mk_ident(id.atom()?), parse_qualified(target)?));
            }
            "foreign" => {
                for id in decl_items.iter().skip(1) {
                    module.foreign.push(mk_ident(id.atom()?));
                }
            }
            "directive" => parse_directive(decl_items, &mut module.directives)?,
            "bind" => {
                let id = decl_items
                    .get(1)
                    .ok_or(OptErr::ParseExhausted(decl.line()))?;
                let expr = decl_items
                    .get(2)
                    .ok_or(OptErr::ParseExhausted(decl.line()))?;
                module.bindings.push(BindGroup::NonRec(SourceBinding {
                    ident: mk_ident(id.atom()?),
                    expr: parse_expr(expr)?,
                }));
            }
            "bind-rec" => {
                let mut group = Vec::new();
                for entry in decl_items.iter().skip(1) {
                    let pair = entry.list()?;
                    let id = pair.get(0).ok_or(OptErr::ParseExhausted(entry.line()))?;
                    let expr = pair.get(1).ok_or(OptErr::ParseExhausted(entry.line()))?;
                    group.push(SourceBinding {
                        ident: mk_ident(id.atom()?),
                        expr: parse_expr(expr)?,
                    });
                }
                module.bindings.push(BindGroup::Rec(group));
            }
            owise => {
                return Err(OptErr::ParseUnexpected(decl.line(), String::from(owise)));
            }
        }
    }
    Ok(module)
}

fn parse_directive(items: &[SExpr], out: &mut ModuleDirectives) -> OptResult<()> {
    let line = items.first().map(|s| s.line()).unwrap_or(0);
    let scope = items.get(1).ok_or(OptErr::ParseExhausted(line))?.atom()?;
    let target = items.get(2).ok_or(OptErr::ParseExhausted(line))?;
    let eval_ref = parse_eval_ref(target)?;
    let directive = match items.get(3).ok_or(OptErr::ParseExhausted(line))?.atom()? {
        "never" => Directive::InlineNever,
        "always" => Directive::InlineAlways,
        "arity" => {
            let n = items.get(4).ok_or(OptErr::ParseExhausted(line))?;
            Directive::InlineArity(parse_usize(n)?)
        }
        owise => return Err(OptErr::ParseUnexpected(line, String::from(owise))),
    };
    let table: &mut Directives = match scope {
        "local" => &mut out.locals,
        "export" => &mut out.exports,
        owise => return Err(OptErr::ParseUnexpected(line, String::from(owise))),
    };
    table.insert(eval_ref, directive);
    Ok(())
}

fn parse_eval_ref(datum: &SExpr) -> OptResult<EvalRef> {
    match datum {
        SExpr::Atom(..) => Ok(EvalRef::EvalExtern(parse_qualified(datum)?, None)),
        SExpr::List(items, line) => {
            let head = items.first().ok_or(OptErr::ParseExhausted(*line))?.atom()?;
            match head {
                "prop" => {
                    let q = items.get(1).ok_or(OptErr::ParseExhausted(*line))?;
                    let key = items.get(2).ok_or(OptErr::ParseExhausted(*line))?;
                    Ok(EvalRef::EvalExtern(
                        parse_qualified(q)?,
                        Some(Accessor::GetProp(String::from(key.atom()?))),
                    ))
                }
                "local-ref" => {
                    let id = items.get(1).ok_or(OptErr::ParseExhausted(*line))?;
                    let lvl = items.get(2).ok_or(OptErr::ParseExhausted(*line))?;
                    Ok(EvalRef::EvalLocal(
                        Some(mk_ident(id.atom()?)),
                        Level(parse_usize(lvl)?),
                    ))
                }
                owise => Err(OptErr::ParseUnexpected(*line, String::from(owise))),
            }
        }
        owise => Err(OptErr::ParseUnexpected(owise.line(), describe(owise))),
    }
}

/// A dotted atom is a qualified reference; the last segment is the
/// ident, everything before it the module.
fn parse_qualified(datum: &SExpr) -> OptResult<Qualified> {
    let atom = datum.atom()?;
    match atom.rfind('.') {
        Some(split) => {
            let (module, ident) = atom.split_at(split);
            Ok(mk_qualified(
                mk_module_name(module.split('.').map(String::from).collect()),
                mk_ident(&ident[1..]),
            ))
        }
        None => Ok(mk_unqualified(mk_ident(atom))),
    }
}

fn parse_usize(datum: &SExpr) -> OptResult<usize> {
    let atom = datum.atom()?;
    atom.parse::<usize>()
        .map_err(|_| OptErr::ParseInt(datum.line(), String::from(atom)))
}

fn parse_i32(datum: &SExpr) -> OptResult<i32> {
    let atom = datum.atom()?;
    atom.parse::<i32>()
        .map_err(|_| OptErr::ParseInt(datum.line(), String::from(atom)))
}

fn parse_params(datum: &SExpr) -> OptResult<Vec<Ident>> {
    datum
        .list()?
        .iter()
        .map(|p| Ok(mk_ident(p.atom()?)))
        .collect()
}

fn parse_props(items: &[SExpr]) -> OptResult<Vec<Prop<SourceExpr>>> {
    items
        .iter()
        .map(|entry| {
            let pair = entry.list()?;
            let key = pair.get(0).ok_or(OptErr::ParseExhausted(entry.line()))?;
            let value = pair.get(1).ok_or(OptErr::ParseExhausted(entry.line()))?;
            Ok((String::from(key.atom()?), parse_expr(value)?))
        })
        .collect()
}

fn parse_exprs(items: &[SExpr]) -> OptResult<Vec<SourceExpr>> {
    items.iter().map(parse_expr).collect()
}

fn parse_expr(datum: &SExpr) -> OptResult<SourceExpr> {
    match datum {
        SExpr::Str(s, _) => Ok(SrcLit(Literal::LitString(s.clone()))),
        SExpr::Atom(atom, _) => match atom.as_str() {
            "true" => Ok(SrcLit(Literal::LitBoolean(true))),
            "false" => Ok(SrcLit(Literal::LitBoolean(false))),
            _ => match atom.parse::<i32>() {
                Ok(n) => Ok(SrcLit(Literal::LitInt(n))),
                Err(_) => Ok(SrcVar(parse_qualified(datum)?)),
            },
        },
        SExpr::List(items, line) => {
            let line = *line;
            let head = items.first().ok_or(OptErr::ParseExhausted(line))?.atom()?;
            let arg = |idx: usize| -> OptResult<&SExpr> {
                items.get(idx).ok_or(OptErr::ParseExhausted(line))
            };
            match head {
                "var" => Ok(SrcVar(parse_qualified(arg(1)?)?)),
                "int" => Ok(SrcLit(Literal::LitInt(parse_i32(arg(1)?)?))),
                "number" => {
                    let atom = arg(1)?.atom()?;
                    let n = atom
                        .parse::<f64>()
                        .map_err(|_| OptErr::ParseNumber(line, String::from(atom)))?;
                    Ok(SrcLit(Literal::LitNumber(n)))
                }
                "string" => match arg(1)? {
                    SExpr::Str(s, _) => Ok(SrcLit(Literal::LitString(s.clone()))),
                    owise => Err(OptErr::ParseUnexpected(owise.line(), describe(owise))),
                },
                "char" => {
                    let atom = arg(1)?.atom()?;
                    let mut chars = atom.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Ok(SrcLit(Literal::LitChar(c))),
                        _ => Err(OptErr::ParseUnexpected(line, String::from(atom))),
                    }
                }
                "bool" => match arg(1)?.atom()? {
                    "true" => Ok(SrcLit(Literal::LitBoolean(true))),
                    "false" => Ok(SrcLit(Literal::LitBoolean(false))),
                    owise => Err(OptErr::ParseUnexpected(line, String::from(owise))),
                },
                "array" => Ok(SrcLit(Literal::LitArray(parse_exprs(&items[1..])?))),
                "record" => Ok(SrcLit(Literal::LitRecord(parse_props(&items[1..])?))),
                "app" => Ok(SrcApp(
                    Box::new(parse_expr(arg(1)?)?),
                    parse_exprs(&items[2..])?,
                )),
                "abs" => Ok(SrcAbs(
                    parse_params(arg(1)?)?,
                    Box::new(parse_expr(arg(2)?)?),
                )),
                "uapp" => Ok(SrcUncurriedApp(
                    Box::new(parse_expr(arg(1)?)?),
                    parse_exprs(&items[2..])?,
                )),
                "uabs" => Ok(SrcUncurriedAbs(
                    parse_params(arg(1)?)?,
                    Box::new(parse_expr(arg(2)?)?),
                )),
                "ueffapp" => Ok(SrcUncurriedEffectApp(
                    Box::new(parse_expr(arg(1)?)?),
                    parse_exprs(&items[2..])?,
                )),
                "ueffabs" => Ok(SrcUncurriedEffectAbs(
                    parse_params(arg(1)?)?,
                    Box::new(parse_expr(arg(2)?)?),
                )),
                "let" => Ok(SrcLet(
                    mk_ident(arg(1)?.atom()?),
                    Box::new(parse_expr(arg(2)?)?),
                    Box::new(parse_expr(arg(3)?)?),
                )),
                "letrec" => {
                    let mut group = Vec::new();
                    for entry in arg(1)?.list()? {
                        let pair = entry.list()?;
                        let id = pair.get(0).ok_or(OptErr::ParseExhausted(entry.line()))?;
                        let rhs = pair.get(1).ok_or(OptErr::ParseExhausted(entry.line()))?;
                        group.push((mk_ident(id.atom()?), parse_expr(rhs)?));
                    }
                    Ok(SrcLetRec(group, Box::new(parse_expr(arg(2)?)?)))
                }
                "dobind" => Ok(SrcEffectBind(
                    mk_ident(arg(1)?.atom()?),
                    Box::new(parse_expr(arg(2)?)?),
                    Box::new(parse_expr(arg(3)?)?),
                )),
                "pure" => Ok(SrcEffectPure(Box::new(parse_expr(arg(1)?)?))),
                "get-prop" => Ok(SrcAccessor(
                    Box::new(parse_expr(arg(1)?)?),
                    Accessor::GetProp(String::from(arg(2)?.atom()?)),
                )),
                "get-index" => Ok(SrcAccessor(
                    Box::new(parse_expr(arg(1)?)?),
                    Accessor::GetIndex(parse_usize(arg(2)?)?),
                )),
                "get-offset" => Ok(SrcAccessor(
                    Box::new(parse_expr(arg(1)?)?),
                    Accessor::GetOffset(parse_usize(arg(2)?)?),
                )),
                "update" => Ok(SrcUpdate(
                    Box::new(parse_expr(arg(1)?)?),
                    parse_props(&items[2..])?,
                )),
                "branch" => {
                    let mut pairs = Vec::new();
                    for entry in arg(1)?.list()? {
                        let pair = entry.list()?;
                        let guard = pair.get(0).ok_or(OptErr::ParseExhausted(entry.line()))?;
                        let body = pair.get(1).ok_or(OptErr::ParseExhausted(entry.line()))?;
                        pairs.push((parse_expr(guard)?, parse_expr(body)?));
                    }
                    let default = match items.get(2) {
                        Some(d) => Some(Box::new(parse_expr(d)?)),
                        None => None,
                    };
                    Ok(SrcBranch(pairs, default))
                }
                "fail" => match arg(1)? {
                    SExpr::Str(s, _) => Ok(SrcFail(s.clone())),
                    owise => Err(OptErr::ParseUnexpected(owise.line(), describe(owise))),
                },
                "ctor" => {
                    let kind = arg(1)?.atom()?;
                    let newtype = match kind {
                        "newtype" => true,
                        "sum" | "product" => false,
                        owise => {
                            return Err(OptErr::ParseUnexpected(line, String::from(owise)))
                        }
                    };
                    let fields = items
                        .iter()
                        .skip(4)
                        .map(|f| Ok(String::from(f.atom()?)))
                        .collect::<OptResult<Vec<String>>>()?;
                    Ok(SrcCtor {
                        newtype,
                        ty: mk_ident(arg(2)?.atom()?),
                        tag: mk_ident(arg(3)?.atom()?),
                        fields,
                    })
                }
                "is-tag" => Ok(SrcOp1(
                    Op1::OpIsTag(parse_qualified(arg(1)?)?),
                    Box::new(parse_expr(arg(2)?)?),
                )),
                "not" => Ok(SrcOp1(Op1::OpBooleanNot, Box::new(parse_expr(arg(1)?)?))),
                "bitnot" => Ok(SrcOp1(Op1::OpIntBitNot, Box::new(parse_expr(arg(1)?)?))),
                "neg-int" => Ok(SrcOp1(Op1::OpIntNegate, Box::new(parse_expr(arg(1)?)?))),
                "neg-num" => Ok(SrcOp1(Op1::OpNumberNegate, Box::new(parse_expr(arg(1)?)?))),
                "length" => Ok(SrcOp1(Op1::OpArrayLength, Box::new(parse_expr(arg(1)?)?))),
                owise => match op2_of(owise) {
                    Some(op2) => Ok(SrcOp2(
                        op2,
                        Box::new(parse_expr(arg(1)?)?),
                        Box::new(parse_expr(arg(2)?)?),
                    )),
                    None => Err(OptErr::ParseUnexpected(line, String::from(owise))),
                },
            }
        }
    }
}

fn op2_of(name: &str) -> Option<Op2> {
    match name {
        "and" => return Some(Op2::OpBooleanAnd),
        "or" => return Some(Op2::OpBooleanOr),
        "append" => return Some(Op2::OpStringAppend),
        "band" => return Some(Op2::OpIntBitAnd),
        "bor" => return Some(Op2::OpIntBitOr),
        "bxor" => return Some(Op2::OpIntBitXor),
        "shl" => return Some(Op2::OpIntBitShiftLeft),
        "shr" => return Some(Op2::OpIntBitShiftRight),
        "zshr" => return Some(Op2::OpIntBitZeroFillShiftRight),
        _ => (),
    }
    let split = name.rfind('-')?;
    let (op, ty) = name.split_at(split);
    let ty = &ty[1..];
    if let Some(ord) = match op {
        "eq" => Some(OpOrd::OpEq),
        "neq" => Some(OpOrd::OpNotEq),
        "lt" => Some(OpOrd::OpLt),
        "lte" => Some(OpOrd::OpLte),
        "gt" => Some(OpOrd::OpGt),
        "gte" => Some(OpOrd::OpGte),
        _ => None,
    } {
        return match ty {
            "int" => Some(Op2::OpIntOrd(ord)),
            "num" => Some(Op2::OpNumberOrd(ord)),
            "char" => Some(Op2::OpCharOrd(ord)),
            "string" => Some(Op2::OpStringOrd(ord)),
            "bool" => Some(Op2::OpBooleanOrd(ord)),
            _ => None,
        };
    }
    let num = match op {
        "add" => OpNum::OpAdd,
        "sub" => OpNum::OpSubtract,
        "mul" => OpNum::OpMultiply,
        "div" => OpNum::OpDivide,
        _ => return None,
    };
    match ty {
        "int" => Some(Op2::OpIntNum(num)),
        "num" => Some(Op2::OpNumberNum(num)),
        _ => None,
    }
}

#[cfg(test)]
mod parser_tests {
    use super::*;

    #[test]
    fn parses_a_small_module() {
        let source = r#"
; the obligatory example
(module Main
  (export main)
  (directive local Lib.op never)
  (bind main
    (let f (abs (x) (add-int x 1))
      (app f 2))))
"#;
        let modules = parse_modules(source).expect("parse failed");
        assert_eq!(modules.len(), 1);
        let m = &modules[0];
        assert_eq!(format!("{}", m.name), "Main");
        assert_eq!(m.exports.len(), 1);
        assert_eq!(m.directives.locals.len(), 1);
        assert_eq!(m.bindings.len(), 1);
        match &m.bindings[0] {
            BindGroup::NonRec(b) => {
                assert_eq!(b.ident.as_str(), "main");
                match &b.expr {
                    SrcLet(id, binding, _) => {
                        assert_eq!(id.as_str(), "f");
                        match binding.as_ref() {
                            SrcAbs(params, _) => assert_eq!(params.len(), 1),
                            owise => panic!("expected abs, got {:?}", owise),
                        }
                    }
                    owise => panic!("expected let, got {:?}", owise),
                }
            }
            _ => panic!("expected a non-recursive group"),
        }
    }

    #[test]
    fn dotted_atoms_are_qualified() {
        let q = parse_qualified(&SExpr::Atom(String::from("Data.Eq.eq"), 1)).unwrap();
        assert_eq!(format!("{}", q), "Data.Eq.eq");
        assert_eq!(q.ident.as_str(), "eq");
        let bare = parse_qualified(&SExpr::Atom(String::from("eq"), 1)).unwrap();
        assert!(bare.module.is_none());
    }

    #[test]
    fn bare_atoms_sugar_literals_and_vars() {
        match parse_expr(&SExpr::Atom(String::from("42"), 1)).unwrap() {
            SrcLit(Literal::LitInt(42)) => (),
            owise => panic!("expected int, got {:?}", owise),
        }
        match parse_expr(&SExpr::Atom(String::from("true"), 1)).unwrap() {
            SrcLit(Literal::LitBoolean(true)) => (),
            owise => panic!("expected bool, got {:?}", owise),
        }
        match parse_expr(&SExpr::Atom(String::from("x"), 1)).unwrap() {
            SrcVar(_) => (),
            owise => panic!("expected var, got {:?}", owise),
        }
    }

    #[test]
    fn operator_names_cover_the_table() {
        assert_eq!(op2_of("eq-int"), Some(Op2::OpIntOrd(OpOrd::OpEq)));
        assert_eq!(op2_of("lte-string"), Some(Op2::OpStringOrd(OpOrd::OpLte)));
        assert_eq!(op2_of("div-num"), Some(Op2::OpNumberNum(OpNum::OpDivide)));
        assert_eq!(op2_of("append"), Some(Op2::OpStringAppend));
        assert_eq!(op2_of("frobnicate"), None);
    }

    #[test]
    fn branches_parse_with_and_without_defaults() {
        let source = r#"
(module M
  (bind f (abs (l) (branch ((l 1) ((not l) 2)) (fail "no match"))))
  (bind g (abs (l) (branch ((l 1))))))
"#;
        let modules = parse_modules(source).expect("parse failed");
        assert_eq!(modules[0].bindings.len(), 2);
    }

    #[test]
    fn unterminated_input_reports_the_line() {
        let err = parse_modules("(module M\n  (bind x 1)").unwrap_err();
        match err {
            OptErr::ParseExhausted(_) => (),
            owise => panic!("expected exhaustion, got {:?}", owise),
        }
    }
}
