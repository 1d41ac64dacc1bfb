//! Structural canonicalization of query documents.
//!
//! Literal values are replaced by a placeholder so queries that differ only
//! in their arguments share one shape. Logical operators keep their nested
//! structure.

use std::cmp::Ordering;

use mongodb::bson::{Bson, Document};

use super::AspectError;
use crate::sample::value_key;

/// Stands in for every stripped literal.
pub const PLACEHOLDER: &str = "?";

/// Keys whose values are structure rather than data.
pub const STRUCTURAL_KEYS: &[&str] = &[
    "$or", "$and", "$not", "$nor", "$exists", "$type", "$mod", "$regex", "$where", "$msg",
];

fn is_structural(key: &str) -> bool {
    STRUCTURAL_KEYS.contains(&key)
}

/// Canonical shape of a query node.
///
/// - documents: keys sorted; structural keys recurse, every other key's value
///   (nested structure included) becomes the placeholder;
/// - arrays: elements are canonicalized, then sorted;
/// - scalars: returned unchanged.
///
/// The result is a fixed point: canonicalizing it again changes nothing.
pub fn canonicalize(node: &Bson) -> Result<Bson, AspectError> {
    match node {
        Bson::Document(doc) => canonicalize_document(doc).map(Bson::Document),
        Bson::Array(items) => {
            let mut shaped = items
                .iter()
                .map(canonicalize)
                .collect::<Result<Vec<_>, _>>()?;
            sort_values(&mut shaped)?;
            Ok(Bson::Array(shaped))
        }
        scalar => Ok(scalar.clone()),
    }
}

pub fn canonicalize_document(doc: &Document) -> Result<Document, AspectError> {
    let mut keys: Vec<&String> = doc.keys().collect();
    keys.sort();

    let mut shaped = Document::new();
    for key in keys {
        let value = if is_structural(key) {
            // Keys are taken from the document, so the lookup cannot miss.
            canonicalize(doc.get(key).unwrap_or(&Bson::Null))?
        } else {
            Bson::String(PLACEHOLDER.to_string())
        };
        shaped.insert(key.clone(), value);
    }
    Ok(shaped)
}

// ─── Ordering ────────────────────────────────────────────────────

/// Coarse type class; only values of the same class can be ordered.
fn class(v: &Bson) -> &'static str {
    match v {
        Bson::Null | Bson::Undefined => "null",
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => "number",
        Bson::String(_) | Bson::Symbol(_) => "string",
        Bson::Boolean(_) => "bool",
        Bson::Document(_) => "document",
        Bson::Array(_) => "array",
        Bson::ObjectId(_) => "objectid",
        Bson::DateTime(_) | Bson::Timestamp(_) => "datetime",
        _ => "other",
    }
}

fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Result<Ordering, AspectError> {
    let (ca, cb) = (class(a), class(b));
    if ca != cb {
        return Err(AspectError::Incomparable {
            left: ca,
            right: cb,
        });
    }

    Ok(match (a, b) {
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::Array(x), Bson::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare(l, r)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            x.len().cmp(&y.len())
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            // Strings, documents and the rest order by their rendered form.
            _ => value_key(a).cmp(&value_key(b)),
        },
    })
}

fn sort_values(values: &mut [Bson]) -> Result<(), AspectError> {
    // Validate every pair up front so the sort itself never sees an error.
    for pair in values.windows(2) {
        compare(&pair[0], &pair[1])?;
    }
    values.sort_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal));
    Ok(())
}
