use mongodb::bson::{Bson, Document};

use super::query_shape::canonicalize;
use super::{error_placeholder, AspectError, Aspects};
use crate::sample::Op;

/// Op kinds whose `query` (or `command`) field is a read filter.
const QUERY_OPS: &[&str] = &["query", "getmore"];

/// Commands that carry a read filter when reported as `op: "command"`.
const QUERY_COMMANDS: &[&str] = &["find", "count", "distinct"];

/// A built-in aspect: a name and a function of the raw op.
pub struct Builtin {
    pub name: &'static str,
    extract: fn(&Op) -> Result<Option<Bson>, AspectError>,
}

pub static BUILTINS: &[Builtin] = &[
    Builtin { name: "ns", extract: ns },
    Builtin { name: "client", extract: client },
    Builtin { name: "op", extract: op_kind },
    Builtin { name: "db", extract: db },
    Builtin { name: "collection", extract: collection },
    Builtin { name: "client_host", extract: client_host },
    Builtin { name: "query", extract: query },
    Builtin { name: "query_keys", extract: query_keys },
];

/// Names of all built-in aspects, in evaluation order.
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|b| b.name)
}

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.iter().any(|b| b.name == name)
}

/// Runs every built-in against the raw op. Absent aspects are left out; a
/// failing built-in yields an error placeholder.
pub fn extract_builtins(op: &Op) -> Aspects {
    let mut aspects = Aspects::new();
    for builtin in BUILTINS {
        match (builtin.extract)(op) {
            Ok(Some(value)) => {
                aspects.insert(builtin.name.to_string(), value);
            }
            Ok(None) => {}
            Err(e) => {
                aspects.insert(builtin.name.to_string(), error_placeholder(&e));
            }
        }
    }
    aspects
}

fn ns(op: &Op) -> Result<Option<Bson>, AspectError> {
    Ok(op.get("ns").cloned())
}

fn client(op: &Op) -> Result<Option<Bson>, AspectError> {
    Ok(op.get("client").cloned())
}

fn op_kind(op: &Op) -> Result<Option<Bson>, AspectError> {
    Ok(op.get("op").cloned())
}

fn query(op: &Op) -> Result<Option<Bson>, AspectError> {
    Ok(query_of(op))
}

fn db(op: &Op) -> Result<Option<Bson>, AspectError> {
    Ok(op.get_str("ns").ok().map(|ns| {
        let db = ns.split_once('.').map_or(ns, |(db, _)| db);
        Bson::String(db.to_string())
    }))
}

fn collection(op: &Op) -> Result<Option<Bson>, AspectError> {
    Ok(op
        .get_str("ns")
        .ok()
        .and_then(|ns| ns.split_once('.'))
        .map(|(_, coll)| Bson::String(coll.to_string())))
}

fn client_host(op: &Op) -> Result<Option<Bson>, AspectError> {
    Ok(op.get_str("client").ok().map(|client| {
        let host = client.split_once(':').map_or(client, |(host, _)| host);
        Bson::String(host.to_string())
    }))
}

fn query_keys(op: &Op) -> Result<Option<Bson>, AspectError> {
    query_of(op).map(|q| canonicalize(&q)).transpose()
}

/// The read filter of a query-like op, if it is one.
///
/// Legacy `query` ops report the filter directly (possibly wrapped in
/// `$query`); `find` commands nest it under `filter`, `count`/`distinct`
/// under `query`.
pub fn query_of(op: &Op) -> Option<Bson> {
    let kind = op.get_str("op").ok()?;

    if QUERY_OPS.contains(&kind) {
        let payload = op.get("query").or_else(|| op.get("command"))?;
        return Some(match payload {
            Bson::Document(doc) => unwrap_filter(doc, false),
            other => other.clone(),
        });
    }

    if kind == "command" {
        let command = op.get_document("command").ok()?;
        let name = command.keys().next()?;
        if QUERY_COMMANDS.contains(&name.as_str()) {
            return Some(unwrap_filter(command, true));
        }
    }
    None
}

fn unwrap_filter(payload: &Document, is_command: bool) -> Bson {
    let mut inner_keys = vec!["filter", "$query"];
    if is_command {
        inner_keys.push("query");
    }
    for key in inner_keys {
        if let Ok(inner) = payload.get_document(key) {
            return Bson::Document(inner.clone());
        }
    }
    Bson::Document(payload.clone())
}
