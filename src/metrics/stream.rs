use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::handlers::ApiError;
use crate::report::ReportSnapshot;
use crate::AppState;

/// How often the stream pushes a fresh snapshot.
const STREAM_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    /// Restrict the breakdown to one aspect.
    pub focus: Option<String>,
    /// Values per aspect; 0 or absent shows all.
    pub limit: Option<usize>,
}

impl ReportQuery {
    fn check(&self, state: &AppState) -> Result<(), ApiError> {
        match &self.focus {
            Some(name) if name.is_empty() => Err(ApiError::BadRequest("focus is empty".into())),
            Some(name) if !state.report.knows_aspect(name) => {
                Err(ApiError::NotFound(format!("unknown aspect `{name}`")))
            }
            _ => Ok(()),
        }
    }
}

// ─── GET /api/report ─────────────────────────────────────────────
/// Summary and per-aspect breakdown of everything sampled so far.

pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ReportSnapshot>, ApiError> {
    query.check(&state)?;
    Ok(Json(
        state.report.snapshot(query.focus.as_deref(), query.limit),
    ))
}

// ─── GET /api/report/stream ──────────────────────────────────────
/// Server-Sent Events endpoint. Pushes a `ReportSnapshot` as JSON every
/// second, with the same `focus`/`limit` parameters as `/api/report`.

pub async fn report_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    query.check(&state)?;
    let interval = tokio::time::interval(STREAM_PERIOD);

    let stream = IntervalStream::new(interval).map(move |_| {
        let snapshot = state.report.snapshot(query.focus.as_deref(), query.limit);
        let json = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok(Event::default().event("report").data(json))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
