use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::metrics::stream;
use crate::AppState;

/// Builds the `serve` router: sampler stats plus the live report.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Sampler ─────────────────────────────────────────────
        .route("/api/stats", get(handlers::stats::get_stats))
        // ── Report ──────────────────────────────────────────────
        .route("/api/report", get(stream::get_report))
        .route("/api/report/stream", get(stream::report_stream))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use mongodb::bson::doc;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::aspects::AspectEngine;
    use crate::capture::{BoundedQueue, SamplerStats};
    use crate::metrics::LiveReport;
    use crate::report::Report;
    use crate::Sample;

    fn state() -> Arc<AppState> {
        let report = Arc::new(LiveReport::new(Report::new(AspectEngine::new(), None)));
        report
            .add_sample(&Sample::new(1.0, vec![doc! { "op": "query", "ns": "shop.orders" }]))
            .unwrap();
        report.add_sample(&Sample::new(2.0, vec![])).unwrap();

        let queue = Arc::new(BoundedQueue::new(8));
        queue.try_push(Sample::new(3.0, vec![])).unwrap();

        Arc::new(AppState {
            stats: Arc::new(SamplerStats::new()),
            queue,
            report,
            interval_ms: 250,
            started_at: Utc::now(),
        })
    }

    async fn get(uri: &str) -> (StatusCode, Value) {
        let response = create_router(state())
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let (status, body) = get("/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["interval_ms"], 250);
        assert_eq!(body["queue_depth"], 1);
        assert_eq!(body["queue_capacity"], 8);
        assert_eq!(body["samples_aggregated"], 2);
        assert_eq!(body["sampler"]["num_samples"], 0);
        assert!(body["started_at"].is_string());
        assert!(body["uptime_secs"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_report_focus_and_limit() {
        let (status, body) = get("/api/report?focus=collection&limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["num_samples"], 2);
        assert_eq!(body["summary"]["perc_active"], 50.0);

        let aspects = body["aspects"].as_array().unwrap();
        assert_eq!(aspects.len(), 1);
        assert_eq!(aspects[0]["aspect"], "collection");
        assert_eq!(aspects[0]["values"][0]["value"], "orders");
        assert_eq!(aspects[0]["values"][0]["count"], 1);
    }

    #[tokio::test]
    async fn test_empty_focus_is_bad_request() {
        let (status, body) = get("/api/report?focus=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
        assert_eq!(body["error"], "focus is empty");
    }

    #[tokio::test]
    async fn test_unknown_aspect_is_not_found() {
        let (status, body) = get("/api/report?focus=nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);

        let (status, _) = get("/api/report/stream?focus=nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
