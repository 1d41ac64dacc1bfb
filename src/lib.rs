//! Sampling profiler for MongoDB.
//!
//! The write path polls `currentOp` on a fixed cadence and streams one
//! BSON document per tick to a recording. The read path replays a
//! recording, derives named aspects for every op, and reports how often
//! each aspect value was present across samples.

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub mod aspects;
pub mod capture;
pub mod config;
pub mod db;
pub mod handlers;
pub mod metrics;
pub mod recording;
pub mod report;
pub mod sample;
pub mod server;

pub use sample::{Op, Sample};

/// Shared state for the `serve` endpoints, available via `State<Arc<AppState>>`.
pub struct AppState {
    /// Live sampler counters.
    pub stats: Arc<capture::SamplerStats>,

    /// Queue between sampler and aggregator, for depth reporting.
    pub queue: Arc<capture::BoundedQueue<Sample>>,

    /// Report fed by the dumper thread.
    pub report: Arc<metrics::LiveReport>,

    /// Configured sampling interval, echoed by `/api/stats`.
    pub interval_ms: u64,

    /// When `serve` started, for uptime.
    pub started_at: DateTime<Utc>,
}
