/**
 * API HTTP - Exposition Prometheus et état de l'exporter
 *
 * RÔLE :
 * Sert ce que le scheduler a collecté. Aucune route ne déclenche de collecte :
 * un scrape lit simplement le registre tel qu'il est à cet instant.
 *
 * ROUTES :
 * - GET /metrics : format texte Prometheus (prometheus::TEXT_FORMAT)
 * - GET /health  : "ok" tant que le process tourne
 * - GET /status  : JSON ExporterHealth (état du scheduler, dernières passes)
 */

use crate::health::{ExporterHealth, HealthTracker};
use crate::sink::MetricsSink;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<MetricsSink>,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(get_metrics))
        .route("/status", get(get_status))
        .with_state(app_state)
}

// GET /metrics
async fn get_metrics(State(app): State<AppState>) -> Response {
    match app.sink.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

// GET /status
async fn get_status(State(app): State<AppState>) -> Json<ExporterHealth> {
    Json(app.health.get_health())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Pass;
    use crate::scheduler::SchedulerState;
    use crate::sink::SeriesPolicy;
    use std::time::Duration;

    fn app_state() -> AppState {
        let sink = Arc::new(MetricsSink::new(SeriesPolicy::Retain).unwrap());
        sink.record("ds_free_bytes", &["datastore1", "VMFS"], 512.0);
        AppState {
            sink,
            health: HealthTracker::new(),
        }
    }

    #[tokio::test]
    async fn test_metrics_handler_returns_exposition() {
        let resp = get_metrics(State(app_state())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("vmware_ds_free_bytes{"));
        assert!(text.contains("} 512"));
    }

    #[tokio::test]
    async fn test_router_over_tcp() {
        let state = app_state();
        state.health.set_state(SchedulerState::Sleeping);
        state.health.record_pass(Pass::Datastore, Duration::from_millis(3), Ok(1));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });

        let base = format!("http://{addr}");
        let health = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let status: serde_json::Value = reqwest::get(format!("{base}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["state"], "sleeping");
        assert_eq!(status["passes"][0]["pass"], "datastore");

        let metrics = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert!(metrics.text().await.unwrap().contains("vmware_ds_free_bytes"));
    }
}
