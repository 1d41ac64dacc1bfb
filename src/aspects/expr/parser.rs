//! Grammar for aspect and filter expressions, built on `peg`.

use mongodb::bson::Bson;
use peg::{error::ParseError, str::LineCol};

use super::ExprError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

/// The fixed set of callable functions. Anything else is a syntax error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Len,
    Lower,
    Upper,
    Str,
    Int,
    Float,
    StartsWith,
    EndsWith,
    Contains,
    Split,
    Coalesce,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "len" => Self::Len,
            "lower" => Self::Lower,
            "upper" => Self::Upper,
            "str" => Self::Str,
            "int" => Self::Int,
            "float" => Self::Float,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "contains" => Self::Contains,
            "split" => Self::Split,
            "coalesce" => Self::Coalesce,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Len => "len",
            Self::Lower => "lower",
            Self::Upper => "upper",
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Contains => "contains",
            Self::Split => "split",
            Self::Coalesce => "coalesce",
        }
    }

    /// Accepted argument counts, inclusive.
    fn arity(self) -> (usize, usize) {
        match self {
            Self::Len | Self::Lower | Self::Upper | Self::Str | Self::Int | Self::Float => (1, 1),
            Self::StartsWith | Self::EndsWith | Self::Contains => (2, 2),
            Self::Split => (2, 3),
            Self::Coalesce => (1, usize::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Bson),
    Name(String),
    Array(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

peg::parser! {
    grammar syntax() for str {
        pub rule root() -> Expr
            = _ e:expression() _ { e }

        rule expression() -> Expr
            = precedence!{
                a:(@) _ kw_or() _ b:@ { Expr::Or(Box::new(a), Box::new(b)) }
                --
                a:(@) _ kw_and() _ b:@ { Expr::And(Box::new(a), Box::new(b)) }
                --
                e:negation() { e }
            }

        rule negation() -> Expr
            = kw_not() _ e:negation() { Expr::Not(Box::new(e)) }
            / comparison()

        #[cache]
        rule comparison() -> Expr
            = l:arithmetic() _ op:comparison_op() _ r:arithmetic() chained:$(_ comparison_op())? {?
                match chained {
                    Some(_) => Err("`and` between comparisons"),
                    None => Ok(binary(op, l, r)),
                }
            }
            / arithmetic()

        rule comparison_op() -> BinaryOp
            = "==" { BinaryOp::Eq }
            / "!=" { BinaryOp::Ne }
            / "<=" { BinaryOp::Le }
            / ">=" { BinaryOp::Ge }
            / "<" { BinaryOp::Lt }
            / ">" { BinaryOp::Gt }
            / kw_in() { BinaryOp::In }
            / kw_not() _ kw_in() { BinaryOp::NotIn }

        #[cache]
        rule arithmetic() -> Expr
            = precedence!{
                a:(@) _ "+" _ b:@ { binary(BinaryOp::Add, a, b) }
                a:(@) _ "-" _ b:@ { binary(BinaryOp::Sub, a, b) }
                --
                a:(@) _ "*" _ b:@ { binary(BinaryOp::Mul, a, b) }
                a:(@) _ "/" _ b:@ { binary(BinaryOp::Div, a, b) }
                a:(@) _ "%" _ b:@ { binary(BinaryOp::Mod, a, b) }
                --
                "-" _ e:(@) { Expr::Neg(Box::new(e)) }
                --
                e:(@) _ "." _ field:word() { Expr::Member(Box::new(e), field.to_string()) }
                e:(@) _ "[" _ index:expression() _ "]" { Expr::Index(Box::new(e), Box::new(index)) }
                --
                "(" _ e:expression() _ ")" { e }
                "[" _ items:list() _ "]" { Expr::Array(items) }
                v:literal() { Expr::Literal(v) }
                c:call() { c }
                name:ident() { Expr::Name(name) }
            }

        rule list() -> Vec<Expr>
            = expression() ** (_ "," _)

        rule call() -> Expr
            = name:word() _ "(" _ args:list() _ ")" {? build_call(name, args) }

        rule literal() -> Bson
            = v:number() { v }
            / s:string() { Bson::String(s) }
            / ("true" / "True") !ident_char() { Bson::Boolean(true) }
            / ("false" / "False") !ident_char() { Bson::Boolean(false) }
            / ("null" / "None") !ident_char() { Bson::Null }

        rule number() -> Bson
            = quiet!{
                n:$(digit()+ ("." digit()*)? exponent() / digit()+ "." digit()* / "." digit()+ exponent()?) {?
                    n.parse().map(Bson::Double).or(Err("a number"))
                }
                / n:$(digit()+) {? n.parse().map(Bson::Int64).or(Err("an integer in range")) }
            }
            / expected!("a number")

        rule digit() = ['0'..='9']

        rule exponent() = ['e' | 'E'] ['+' | '-']? digit()+

        rule string() -> String
            = "'" s:(escape() / !['\'' | '\\'] c:[_] { c })* "'" { s.into_iter().collect() }
            / "\"" s:(escape() / !['"' | '\\'] c:[_] { c })* "\"" { s.into_iter().collect() }

        rule escape() -> char
            = "\\" c:[_] {
                match c {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                }
            }

        rule ident() -> String
            = quiet!{ !keyword() name:word() { name.to_string() } }
            / expected!("a name")

        rule word() -> &'input str
            = $(['a'..='z' | 'A'..='Z' | '_'] ident_char()*)

        rule ident_char() = ['a'..='z' | 'A'..='Z' | '0'..='9' | '_']

        rule keyword()
            = ("and" / "or" / "not" / "in" / "true" / "True" / "false" / "False" / "null" / "None") !ident_char()

        rule kw_and() = "and" !ident_char()
        rule kw_or() = "or" !ident_char()
        rule kw_not() = "not" !ident_char()
        rule kw_in() = "in" !ident_char()

        rule _() = quiet!{[' ' | '\t' | '\r' | '\n']*}
    }
}

fn binary(op: BinaryOp, l: Expr, r: Expr) -> Expr {
    Expr::Binary(op, Box::new(l), Box::new(r))
}

/// Only the fixed functions are callable, each with its own arity.
fn build_call(name: &str, args: Vec<Expr>) -> Result<Expr, &'static str> {
    let function = Function::lookup(name).ok_or("a known function")?;
    let (min, max) = function.arity();
    if args.len() < min || args.len() > max {
        return Err("a matching argument count");
    }
    Ok(Expr::Call(function, args))
}

pub fn parse(src: &str) -> Result<Expr, ExprError> {
    syntax::root(src).map_err(|e: ParseError<LineCol>| {
        ExprError::syntax(e.location.offset, format!("expected {}", e.expected))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.into()))
    }

    fn int(v: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Bson::Int64(v)))
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a + 2 * 3 > 4 and not b or c").unwrap();
        let expected = Expr::Or(
            Box::new(Expr::And(
                Box::new(Expr::Binary(
                    BinaryOp::Gt,
                    Box::new(Expr::Binary(
                        BinaryOp::Add,
                        name("a"),
                        Box::new(Expr::Binary(BinaryOp::Mul, int(2), int(3))),
                    )),
                    int(4),
                )),
                Box::new(Expr::Not(name("b"))),
            )),
            name("c"),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_postfix_and_calls() {
        let expr = parse("lower(doc.query['$or'][0])").unwrap();
        let expected = Expr::Call(
            Function::Lower,
            vec![Expr::Index(
                Box::new(Expr::Index(
                    Box::new(Expr::Member(name("doc"), "query".into())),
                    Box::new(Expr::Literal(Bson::String("$or".into()))),
                )),
                int(0),
            )],
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_not_in() {
        let expr = parse("db not in ['admin', 'local']").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::NotIn, _, _)));
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "",
            "a ==",
            "(a",
            "a b",
            "1 < 2 < 3",
            "frobnicate(a)",
            "len(a, b)",
            "a.",
        ] {
            assert!(
                matches!(parse(bad), Err(ExprError::Syntax { .. })),
                "expected syntax error for {bad:?}"
            );
        }
    }

    #[test]
    fn test_numbers() {
        let lit = |src: &str| match parse(src).unwrap() {
            Expr::Literal(v) => v,
            other => panic!("expected a literal, got {other:?}"),
        };
        assert_eq!(lit("1"), Bson::Int64(1));
        assert_eq!(lit("2.5"), Bson::Double(2.5));
        assert_eq!(lit(".5"), Bson::Double(0.5));
        assert_eq!(lit("1e3"), Bson::Double(1000.0));
        assert!(parse("99999999999999999999").is_err());
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            parse(r#""a\"b""#).unwrap(),
            Expr::Literal(Bson::String("a\"b".into()))
        );
        assert_eq!(
            parse(r"'c\'d\n'").unwrap(),
            Expr::Literal(Bson::String("c'd\n".into()))
        );
    }

    #[test]
    fn test_keywords_need_a_word_boundary() {
        assert_eq!(parse("order").unwrap(), Expr::Name("order".into()));
        assert_eq!(parse("nothing").unwrap(), Expr::Name("nothing".into()));
        assert!(matches!(parse("a or b").unwrap(), Expr::Or(_, _)));
    }

    #[test]
    fn test_errors_carry_position() {
        match parse("a = b") {
            Err(ExprError::Syntax { pos, .. }) => assert_eq!(pos, 2),
            other => panic!("unexpected {other:?}"),
        }
        // An unterminated string is only noticed at the end of input.
        match parse("ns == 'abc") {
            Err(ExprError::Syntax { pos, .. }) => assert_eq!(pos, 10),
            other => panic!("unexpected {other:?}"),
        }
    }
}
