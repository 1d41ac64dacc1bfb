use anyhow::Result;
use mongodb::bson::{doc, Bson, Document};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use super::{AdminClient, ADMIN_COMMAND_NS};
use crate::sample::Op;

// ─── Name pools ──────────────────────────────────────────────────

static DATABASES: &[&str] = &["shop", "accounts", "analytics"];

static COLLECTIONS: &[&str] = &[
    "users", "orders", "products", "sessions", "events", "carts",
];

static CLIENT_HOSTS: &[&str] = &[
    "10.0.1.11", "10.0.1.12", "10.0.2.40", "10.0.2.41", "10.0.3.7",
];

static FIELDS: &[&str] = &[
    "user_id", "email", "status", "created_at", "sku", "region", "score",
];

static STATUSES: &[&str] = &["active", "pending", "shipped", "cancelled"];

/// Address the simulated server reports for the sampler's own connection.
pub const SIMULATED_SELF: &str = "127.0.0.1:40000";

/// A fake server producing plausible `currentOp` output.
///
/// Deterministic for a given seed, so runs (and tests) are reproducible.
/// Each listing also contains the sampler's own `currentOp` command, the
/// way a real server reports it.
pub struct SimulatedAdmin {
    rng: Mutex<StdRng>,
    max_ops: usize,
}

impl SimulatedAdmin {
    pub fn new(seed: u64, max_ops: usize) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            max_ops,
        }
    }
}

impl Default for SimulatedAdmin {
    fn default() -> Self {
        Self::new(42, 8)
    }
}

impl AdminClient for SimulatedAdmin {
    fn whoami(&self) -> Result<String> {
        Ok(SIMULATED_SELF.to_string())
    }

    fn current_ops(&self) -> Result<Vec<Op>> {
        let mut rng = self.rng.lock();

        let n = rng.gen_range(0..=self.max_ops);
        let mut ops = Vec::with_capacity(n + 1);
        ops.push(own_current_op());
        for opid in 0..n {
            ops.push(random_op(&mut rng, opid as i32));
        }
        Ok(ops)
    }
}

fn own_current_op() -> Op {
    doc! {
        "opid": 0,
        "active": true,
        "op": "command",
        "ns": ADMIN_COMMAND_NS,
        "client": SIMULATED_SELF,
        "command": { "currentOp": 1 },
        "desc": "conn1",
    }
}

fn pick<'a>(rng: &mut StdRng, pool: &[&'a str]) -> &'a str {
    pool[rng.gen_range(0..pool.len())]
}

fn random_literal(rng: &mut StdRng) -> Bson {
    match rng.gen_range(0..3) {
        0 => Bson::Int32(rng.gen_range(1..10_000)),
        1 => Bson::String(pick(rng, STATUSES).to_string()),
        _ => Bson::Double(rng.gen_range(0.0..100.0)),
    }
}

fn random_query(rng: &mut StdRng) -> Document {
    let mut query = Document::new();
    let field = pick(rng, FIELDS);

    match rng.gen_range(0..4) {
        // Plain equality
        0 => {
            query.insert(field, random_literal(rng));
        }
        // Range operator
        1 => {
            query.insert(field, doc! { "$gt": random_literal(rng) });
        }
        // Disjunction over two fields
        2 => {
            let other = pick(rng, FIELDS);
            let mut left = Document::new();
            left.insert(field, random_literal(rng));
            let mut right = Document::new();
            right.insert(other, random_literal(rng));
            query.insert("$or", vec![Bson::Document(left), Bson::Document(right)]);
        }
        // Existence check plus equality
        _ => {
            query.insert(field, random_literal(rng));
            query.insert("$exists", true);
        }
    }
    query
}

fn random_op(rng: &mut StdRng, opid: i32) -> Op {
    let db = pick(rng, DATABASES);
    let coll = pick(rng, COLLECTIONS);
    let ns = format!("{db}.{coll}");
    let client = format!("{}:{}", pick(rng, CLIENT_HOSTS), rng.gen_range(30_000..60_000));
    let running: i64 = rng.gen_range(50..250_000);

    let mut op = doc! {
        "opid": opid + 1,
        "active": true,
        "ns": ns,
        "client": client,
        "microsecs_running": running,
        "desc": format!("conn{}", rng.gen_range(2..500)),
        "waiting_for_lock": rng.gen_bool(0.1),
    };

    match rng.gen_range(0..10) {
        0..=4 => {
            op.insert("op", "query");
            op.insert("query", random_query(rng));
        }
        5..=6 => {
            op.insert("op", "command");
            op.insert(
                "command",
                doc! { "find": coll, "filter": random_query(rng), "$db": db },
            );
        }
        7 => {
            op.insert("op", "update");
            op.insert("query", random_query(rng));
        }
        8 => {
            op.insert("op", "insert");
        }
        _ => {
            op.insert("op", "getmore");
            op.insert("query", random_query(rng));
        }
    }

    if rng.gen_bool(0.3) {
        op.insert(
            "locks",
            doc! { "Global": "r", "Database": "r", "Collection": "r" },
        );
    }
    op
}
