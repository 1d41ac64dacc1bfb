//! Per-op aspect extraction.
//!
//! Every op is turned into a map of named values ("aspects") used for
//! grouping. Three tiers contribute, in this order:
//!
//! 1. built-ins, which see only the raw op;
//! 2. externally registered extractors, which see the op plus the built-ins;
//! 3. expression-defined aspects, which see the op plus the built-ins.
//!
//! Tiers 2 and 3 never see each other's output. Built-ins are the only
//! shared context.

pub mod builtin;
pub mod expr;
pub mod query_shape;

use std::collections::BTreeMap;

use mongodb::bson::Bson;
use thiserror::Error;

use self::expr::{Bindings, ExprError, Expression, RAW_OP_BINDING};
use crate::sample::Op;

/// Aspect name → value for one op.
pub type Aspects = BTreeMap<String, Bson>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AspectError {
    #[error("cannot order {left} against {right}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error("aspect `{0}` is already defined")]
    DuplicateName(String),

    #[error("`{0}` is reserved and cannot name an aspect")]
    ReservedName(String),

    #[error("{0}")]
    Failed(String),
}

impl AspectError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Incomparable { .. } => "Incomparable",
            Self::Expr(e) => e.kind(),
            Self::DuplicateName(_) => "DuplicateName",
            Self::ReservedName(_) => "ReservedName",
            Self::Failed(_) => "Failed",
        }
    }
}

/// The value recorded for an aspect whose extractor failed on an op.
pub fn error_placeholder(err: &AspectError) -> Bson {
    Bson::String(format!("<error {}: {}>", err.kind(), err))
}

/// A named, externally supplied aspect.
///
/// Implementations are compiled into (or linked by) the host program and
/// handed to the engine before analysis starts.
pub trait AspectExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means the aspect does not apply to this op.
    fn evaluate(&self, op: &Op, builtins: &Aspects) -> Result<Option<Bson>, AspectError>;
}

/// An aspect defined by an expression. A null result means "absent".
pub struct ExpressionAspect {
    name: String,
    expression: Expression,
}

impl ExpressionAspect {
    pub fn new(name: impl Into<String>, source: &str) -> Result<Self, AspectError> {
        Ok(Self {
            name: name.into(),
            expression: Expression::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        self.expression.source()
    }
}

impl AspectExtractor for ExpressionAspect {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, op: &Op, builtins: &Aspects) -> Result<Option<Bson>, AspectError> {
        match self.expression.evaluate(&Bindings::with_op(builtins, op))? {
            Bson::Null | Bson::Undefined => Ok(None),
            value => Ok(Some(value)),
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────

/// The full set of extractors used for one analysis run.
#[derive(Default)]
pub struct AspectEngine {
    external: Vec<Box<dyn AspectExtractor>>,
    expressions: Vec<ExpressionAspect>,
}

impl AspectEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an externally supplied extractor.
    pub fn register(&mut self, extractor: Box<dyn AspectExtractor>) -> Result<(), AspectError> {
        self.check_name(extractor.name())?;
        self.external.push(extractor);
        Ok(())
    }

    /// Compiles and adds an expression-defined aspect.
    pub fn add_expression(&mut self, name: &str, source: &str) -> Result<(), AspectError> {
        self.check_name(name)?;
        self.expressions.push(ExpressionAspect::new(name, source)?);
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<(), AspectError> {
        if name == RAW_OP_BINDING {
            return Err(AspectError::ReservedName(name.to_string()));
        }
        let taken = builtin::is_builtin(name)
            || self.external.iter().any(|e| e.name() == name)
            || self.expressions.iter().any(|e| e.name() == name);
        if taken {
            return Err(AspectError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Every aspect name the engine can produce.
    pub fn names(&self) -> Vec<String> {
        builtin::names()
            .map(str::to_string)
            .chain(self.external.iter().map(|e| e.name().to_string()))
            .chain(self.expressions.iter().map(|e| e.name().to_string()))
            .collect()
    }

    /// Computes all aspects for one op. Never fails: a broken extractor
    /// contributes an error placeholder for this op only.
    pub fn extract(&self, op: &Op) -> Aspects {
        let builtins = builtin::extract_builtins(op);

        let external = run_tier(self.external.iter().map(|e| e.as_ref()), op, &builtins);
        let expressions = run_tier(
            self.expressions.iter().map(|e| e as &dyn AspectExtractor),
            op,
            &builtins,
        );

        let mut aspects = builtins;
        aspects.extend(external);
        aspects.extend(expressions);
        aspects
    }
}

fn run_tier<'a>(
    extractors: impl Iterator<Item = &'a dyn AspectExtractor>,
    op: &Op,
    builtins: &Aspects,
) -> Aspects {
    let mut out = Aspects::new();
    for extractor in extractors {
        match extractor.evaluate(op, builtins) {
            Ok(Some(value)) => {
                out.insert(extractor.name().to_string(), value);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::trace!(aspect = extractor.name(), error = %e, "aspect extraction failed");
                out.insert(extractor.name().to_string(), error_placeholder(&e));
            }
        }
    }
    out
}
