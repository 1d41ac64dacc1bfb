use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use mongodb::bson::{Bson, Document};

/// One in-flight server operation as reported by `currentOp`.
/// No fixed schema: different op kinds carry different keys.
pub type Op = Document;

/// Everything observed during one sampling tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Seconds since the unix epoch, taken right after the `currentOp` reply.
    pub timestamp: f64,
    pub ops: Vec<Op>,
}

impl Sample {
    pub fn new(timestamp: f64, ops: Vec<Op>) -> Self {
        Self { timestamp, ops }
    }
}

// ─── Timestamp ───────────────────────────────────────────────────

/// A sample timestamp usable as a set member.
///
/// Equality and hashing go through the bit pattern, ordering through
/// `f64::total_cmp`, so the three always agree.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub fn secs(self) -> f64 {
        self.0
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Timestamp {}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

// ─── Value helpers ───────────────────────────────────────────────

/// Whether a field value counts as empty. Empty fields are dropped from ops
/// at sample time and are false in filter expressions.
pub fn is_falsy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => true,
        Bson::Boolean(b) => !b,
        Bson::Int32(v) => *v == 0,
        Bson::Int64(v) => *v == 0,
        Bson::Double(v) => *v == 0.0,
        Bson::String(s) => s.is_empty(),
        Bson::Array(a) => a.is_empty(),
        Bson::Document(d) => d.is_empty(),
        _ => false,
    }
}

/// Drops every top-level field whose value is empty.
pub fn strip_empty_fields(op: Op) -> Op {
    op.into_iter().filter(|(_, v)| !is_falsy(v)).collect()
}

/// The string an aspect value is bucketed under.
///
/// Strings render bare, so `42` and `"42"` share a bucket. Nested values
/// render as relaxed extended JSON.
pub fn value_key(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) => format_double(*v),
        Bson::Boolean(b) => b.to_string(),
        Bson::Null | Bson::Undefined => "null".to_string(),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}

fn format_double(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}
