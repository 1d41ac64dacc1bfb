use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::capture::SamplerSnapshot;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub sampler: SamplerSnapshot,
    pub interval_ms: u64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub samples_aggregated: usize,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: f64,
}

// ─── GET /api/stats ──────────────────────────────────────────────
/// Sampler counters, queue occupancy and `currentOp` latency percentiles.

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let uptime = Utc::now() - state.started_at;
    Json(StatsResponse {
        sampler: state.stats.snapshot(),
        interval_ms: state.interval_ms,
        queue_depth: state.queue.len(),
        queue_capacity: state.queue.capacity(),
        samples_aggregated: state.report.num_samples(),
        started_at: state.started_at,
        uptime_secs: uptime.num_milliseconds() as f64 / 1000.0,
    })
}
