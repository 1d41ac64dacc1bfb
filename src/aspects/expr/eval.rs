use std::cmp::Ordering;

use mongodb::bson::Bson;

use super::parser::{BinaryOp, Expr, Function};
use super::{Bindings, ExprError};
use crate::sample::{is_falsy, value_key};

pub fn eval(expr: &Expr, env: &Bindings<'_>) -> Result<Bson, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(name) => Ok(env.lookup(name)),
        Expr::Array(items) => items
            .iter()
            .map(|e| eval(e, env))
            .collect::<Result<Vec<_>, _>>()
            .map(Bson::Array),
        Expr::Member(target, field) => Ok(member(eval(target, env)?, field)),
        Expr::Index(target, index) => index_into(eval(target, env)?, eval(index, env)?),
        Expr::Call(function, args) => {
            let args = args
                .iter()
                .map(|e| eval(e, env))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, args)
        }
        Expr::Neg(inner) => match eval(inner, env)? {
            Bson::Int32(v) => Ok(Bson::Int64(-i64::from(v))),
            Bson::Int64(v) => v
                .checked_neg()
                .map(Bson::Int64)
                .ok_or_else(|| ExprError::Value("integer overflow".into())),
            Bson::Double(v) => Ok(Bson::Double(-v)),
            other => Err(ExprError::Type(format!("bad operand for unary -: {}", kind(&other)))),
        },
        Expr::Not(inner) => Ok(Bson::Boolean(is_falsy(&eval(inner, env)?))),
        // `and`/`or` short-circuit and yield an operand, so `x or 'none'` works
        // as a fallback.
        Expr::And(left, right) => {
            let l = eval(left, env)?;
            if is_falsy(&l) {
                Ok(l)
            } else {
                eval(right, env)
            }
        }
        Expr::Or(left, right) => {
            let l = eval(left, env)?;
            if is_falsy(&l) {
                eval(right, env)
            } else {
                Ok(l)
            }
        }
        Expr::Binary(op, left, right) => binary(*op, eval(left, env)?, eval(right, env)?),
    }
}

// ─── Numbers ─────────────────────────────────────────────────────

enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(v: &Bson) -> Option<Num> {
    match v {
        Bson::Int32(i) => Some(Num::Int(i64::from(*i))),
        Bson::Int64(i) => Some(Num::Int(*i)),
        Bson::Double(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

impl Num {
    fn to_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
        }
    }
}

/// Short type name used in error messages.
fn kind(v: &Bson) -> &'static str {
    match v {
        Bson::Null | Bson::Undefined => "null",
        Bson::Boolean(_) => "bool",
        Bson::Int32(_) | Bson::Int64(_) => "int",
        Bson::Double(_) => "float",
        Bson::String(_) => "str",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        _ => "other",
    }
}

fn type_error(op: BinaryOp, l: &Bson, r: &Bson) -> ExprError {
    ExprError::Type(format!(
        "unsupported operand types for {}: {} and {}",
        op.symbol(),
        kind(l),
        kind(r)
    ))
}

// ─── Operators ───────────────────────────────────────────────────

pub(crate) fn values_equal(l: &Bson, r: &Bson) -> bool {
    match (as_num(l), as_num(r)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => a.to_f64() == b.to_f64(),
        _ => l == r,
    }
}

fn compare(op: BinaryOp, l: &Bson, r: &Bson) -> Result<Ordering, ExprError> {
    let ordering = match (l, r) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        _ => match (as_num(l), as_num(r)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Some(a.cmp(&b)),
            (Some(a), Some(b)) => a.to_f64().partial_cmp(&b.to_f64()),
            _ => return Err(type_error(op, l, r)),
        },
    };
    // Only NaN lands here; like IEEE, every comparison with it is false.
    Ok(ordering.unwrap_or(Ordering::Equal))
}

fn contains(container: &Bson, item: &Bson, op: BinaryOp) -> Result<bool, ExprError> {
    match (container, item) {
        (Bson::String(hay), Bson::String(needle)) => Ok(hay.contains(needle.as_str())),
        (Bson::Array(items), _) => Ok(items.iter().any(|v| values_equal(v, item))),
        (Bson::Document(doc), Bson::String(key)) => Ok(doc.contains_key(key)),
        (Bson::Null, _) => Ok(false),
        _ => Err(type_error(op, item, container)),
    }
}

fn binary(op: BinaryOp, l: Bson, r: Bson) -> Result<Bson, ExprError> {
    let has_nan = matches!(l, Bson::Double(f) if f.is_nan()) || matches!(r, Bson::Double(f) if f.is_nan());

    match op {
        BinaryOp::Eq => Ok(Bson::Boolean(values_equal(&l, &r))),
        BinaryOp::Ne => Ok(Bson::Boolean(!values_equal(&l, &r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(op, &l, &r)?;
            if has_nan {
                return Ok(Bson::Boolean(false));
            }
            Ok(Bson::Boolean(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::In => contains(&r, &l, op).map(Bson::Boolean),
        BinaryOp::NotIn => contains(&r, &l, op).map(|found| Bson::Boolean(!found)),
        BinaryOp::Add => match (&l, &r) {
            (Bson::String(a), Bson::String(b)) => Ok(Bson::String(format!("{a}{b}"))),
            (Bson::Array(a), Bson::Array(b)) => {
                Ok(Bson::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => arithmetic(op, &l, &r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => arithmetic(op, &l, &r),
    }
}

fn arithmetic(op: BinaryOp, l: &Bson, r: &Bson) -> Result<Bson, ExprError> {
    let (Some(a), Some(b)) = (as_num(l), as_num(r)) else {
        return Err(type_error(op, l, r));
    };

    if let (Num::Int(a), Num::Int(b)) = (&a, &b) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                // Sign follows the divisor.
                a.checked_rem(b).map(|m| if m != 0 && (m < 0) != (b < 0) { m + b } else { m })
            }
            _ => None,
        };
        if op != BinaryOp::Div {
            return result
                .map(Bson::Int64)
                .ok_or_else(|| ExprError::Value("integer overflow".into()));
        }
    }

    let (a, b) = (a.to_f64(), b.to_f64());
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            a - b * (a / b).floor()
        }
        _ => unreachable!("non-arithmetic operator {}", op.symbol()),
    };
    Ok(Bson::Double(value))
}

// ─── Access ──────────────────────────────────────────────────────

/// Field lookup that tolerates missing structure: absent fields and
/// non-document targets read as null, since ops have no fixed schema.
fn member(target: Bson, field: &str) -> Bson {
    match target {
        Bson::Document(mut doc) => doc.remove(field).unwrap_or(Bson::Null),
        _ => Bson::Null,
    }
}

fn index_into(target: Bson, index: Bson) -> Result<Bson, ExprError> {
    match (target, index) {
        (Bson::Null, _) => Ok(Bson::Null),
        (Bson::Document(doc), Bson::String(key)) => Ok(member(Bson::Document(doc), &key)),
        (Bson::Array(mut items), idx) => {
            let Some(Num::Int(i)) = as_num(&idx) else {
                return Err(ExprError::Type(format!("array index must be int, not {}", kind(&idx))));
            };
            let len = items.len() as i64;
            let i = if i < 0 { i + len } else { i };
            if (0..len).contains(&i) {
                Ok(items.swap_remove(i as usize))
            } else {
                Ok(Bson::Null)
            }
        }
        (Bson::String(s), idx) => {
            let Some(Num::Int(i)) = as_num(&idx) else {
                return Err(ExprError::Type(format!("string index must be int, not {}", kind(&idx))));
            };
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let i = if i < 0 { i + len } else { i };
            Ok(if (0..len).contains(&i) {
                Bson::String(chars[i as usize].to_string())
            } else {
                Bson::Null
            })
        }
        (target, idx) => Err(ExprError::Type(format!(
            "cannot index {} with {}",
            kind(&target),
            kind(&idx)
        ))),
    }
}

// ─── Functions ───────────────────────────────────────────────────

fn expect_str(function: Function, v: &Bson) -> Result<&str, ExprError> {
    match v {
        Bson::String(s) => Ok(s),
        other => Err(ExprError::Type(format!(
            "{}() expects str, got {}",
            function.name(),
            kind(other)
        ))),
    }
}

fn call(function: Function, mut args: Vec<Bson>) -> Result<Bson, ExprError> {
    match function {
        Function::Len => {
            let n = match &args[0] {
                Bson::String(s) => s.chars().count(),
                Bson::Array(a) => a.len(),
                Bson::Document(d) => d.len(),
                other => {
                    return Err(ExprError::Type(format!("len() of {}", kind(other))));
                }
            };
            Ok(Bson::Int64(n as i64))
        }
        Function::Lower => Ok(Bson::String(expect_str(function, &args[0])?.to_lowercase())),
        Function::Upper => Ok(Bson::String(expect_str(function, &args[0])?.to_uppercase())),
        Function::Str => Ok(Bson::String(value_key(&args[0]))),
        Function::Int => match &args[0] {
            Bson::Int32(v) => Ok(Bson::Int64(i64::from(*v))),
            Bson::Int64(v) => Ok(Bson::Int64(*v)),
            Bson::Double(v) if v.is_finite() => Ok(Bson::Int64(v.trunc() as i64)),
            Bson::Boolean(b) => Ok(Bson::Int64(i64::from(*b))),
            Bson::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Bson::Int64)
                .map_err(|_| ExprError::Value(format!("invalid literal for int(): {s:?}"))),
            other => Err(ExprError::Type(format!("int() of {}", kind(other)))),
        },
        Function::Float => match &args[0] {
            Bson::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Bson::Double)
                .map_err(|_| ExprError::Value(format!("could not convert {s:?} to float"))),
            Bson::Boolean(b) => Ok(Bson::Double(if *b { 1.0 } else { 0.0 })),
            other => as_num(other)
                .map(|n| Bson::Double(n.to_f64()))
                .ok_or_else(|| ExprError::Type(format!("float() of {}", kind(other)))),
        },
        Function::StartsWith => {
            let s = expect_str(function, &args[0])?;
            let prefix = expect_str(function, &args[1])?;
            Ok(Bson::Boolean(s.starts_with(prefix)))
        }
        Function::EndsWith => {
            let s = expect_str(function, &args[0])?;
            let suffix = expect_str(function, &args[1])?;
            Ok(Bson::Boolean(s.ends_with(suffix)))
        }
        Function::Contains => contains(&args[0], &args[1], BinaryOp::In).map(Bson::Boolean),
        Function::Split => {
            let s = expect_str(function, &args[0])?;
            let sep = expect_str(function, &args[1])?;
            if sep.is_empty() {
                return Err(ExprError::Value("split() separator is empty".into()));
            }
            let parts: Vec<Bson> = s.split(sep).map(|p| Bson::String(p.to_string())).collect();
            match args.get(2) {
                None => Ok(Bson::Array(parts)),
                Some(idx) => index_into(Bson::Array(parts), idx.clone()),
            }
        }
        Function::Coalesce => {
            let first = args
                .iter()
                .position(|v| !matches!(v, Bson::Null | Bson::Undefined));
            Ok(first.map_or(Bson::Null, |i| args.swap_remove(i)))
        }
    }
}
