//! A small, sandboxed expression language for user-defined aspects and
//! filters.
//!
//! Expressions are parsed once into a tree and evaluated per op against a
//! set of named bindings. The language has no assignment, loops, or access
//! to anything outside the bindings it is given.
//!
//! ```text
//! db == 'shop' and client_host != '10.0.0.5'
//! lower(coalesce(doc.desc, 'unknown'))
//! split(ns, '.', 1) in ['users', 'orders']
//! ```

mod eval;
mod parser;

pub use parser::{BinaryOp, Expr, Function};

use mongodb::bson::Bson;
use thiserror::Error;

use super::Aspects;
use crate::sample::{is_falsy, Op};

/// Name under which aspect expressions can reach the raw op document.
pub const RAW_OP_BINDING: &str = "doc";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("syntax error at offset {pos}: {msg}")]
    Syntax { pos: usize, msg: String },

    #[error("{0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0}")]
    Value(String),
}

impl ExprError {
    pub(crate) fn syntax(pos: usize, msg: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            msg: msg.into(),
        }
    }

    /// Short class name, used in per-op error placeholders.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "SyntaxError",
            Self::Type(_) => "TypeError",
            Self::DivisionByZero => "ZeroDivisionError",
            Self::Value(_) => "ValueError",
        }
    }
}

/// What names resolve to during one evaluation.
pub struct Bindings<'a> {
    aspects: &'a Aspects,
    op: Option<&'a Op>,
}

impl<'a> Bindings<'a> {
    /// Aspect values only (filters).
    pub fn aspects(aspects: &'a Aspects) -> Self {
        Self { aspects, op: None }
    }

    /// Aspect values plus the raw op as `doc` (aspect expressions).
    pub fn with_op(aspects: &'a Aspects, op: &'a Op) -> Self {
        Self {
            aspects,
            op: Some(op),
        }
    }

    /// Unknown names are null: an aspect that is absent for this op.
    fn lookup(&self, name: &str) -> Bson {
        if name == RAW_OP_BINDING {
            if let Some(op) = self.op {
                return Bson::Document(op.clone());
            }
        }
        self.aspects.get(name).cloned().unwrap_or(Bson::Null)
    }
}

/// A parsed expression, ready to evaluate.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        Ok(Self {
            source: source.to_string(),
            root: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, env: &Bindings<'_>) -> Result<Bson, ExprError> {
        eval::eval(&self.root, env)
    }

    /// Evaluates and applies the truthiness rule used for filters.
    pub fn matches(&self, env: &Bindings<'_>) -> Result<bool, ExprError> {
        Ok(!is_falsy(&self.evaluate(env)?))
    }
}
