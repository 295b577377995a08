use std::convert::Infallible;
use std::sync::Arc;

use aggregator_worker::aggregator::{EventAggregator, HealthReport};
use axum::{extract::DefaultBodyLimit, extract::State, http::StatusCode, routing, Json, Router};
use health::HealthStatus;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use super::{events, publish};

pub fn add_routes(
    router: Router,
    aggregator: Arc<EventAggregator>,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    let api = Router::new()
        .route(
            "/publish",
            routing::post(publish::post_publish)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/stats", routing::get(events::get_stats))
        .route("/events", routing::get(events::get_events))
        .route("/_health", routing::get(health_check))
        .route("/_readiness", routing::get(readiness))
        .route("/_liveness", routing::get(liveness))
        .with_state(aggregator);

    router
        .route("/", routing::get(index))
        .merge(api)
        .layer(TraceLayer::new_for_http())
}

pub async fn index() -> &'static str {
    "event aggregator"
}

/// Full `HealthCheck` report, failing when the store is unreachable or no worker is alive.
async fn health_check(
    State(aggregator): State<Arc<EventAggregator>>,
) -> (StatusCode, Json<HealthReport>) {
    let report = aggregator.health_check().await;
    let status = match report.store_reachable && report.workers_alive > 0 {
        true => StatusCode::OK,
        false => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

/// Ready to take traffic once the store answers.
async fn readiness(State(aggregator): State<Arc<EventAggregator>>) -> StatusCode {
    match aggregator.health_check().await.store_reachable {
        true => StatusCode::OK,
        false => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn liveness(State(aggregator): State<Arc<EventAggregator>>) -> HealthStatus {
    aggregator.liveness()
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_app;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt; // for `collect`
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    #[tokio::test]
    async fn index() {
        let dir = tempfile::tempdir().unwrap();
        let (app, aggregator) = test_app(&dir).await;

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"event aggregator");

        aggregator.shutdown().await;
    }

    #[tokio::test]
    async fn health_reports_store_queue_and_workers() {
        let dir = tempfile::tempdir().unwrap();
        let (app, aggregator) = test_app(&dir).await;

        // Workers report in shortly after starting.
        let mut attempts = 0;
        while aggregator.health_check().await.workers_alive < 5 && attempts < 100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            attempts += 1;
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/_health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let report: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            report,
            serde_json::json!({"storeReachable": true, "queueDepth": 0, "workersAlive": 5})
        );

        aggregator.shutdown().await;
    }

    #[tokio::test]
    async fn liveness_fails_once_workers_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (app, aggregator) = test_app(&dir).await;
        aggregator.shutdown().await;

        let mut attempts = 0;
        while aggregator.liveness().healthy_components() > 0 && attempts < 100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            attempts += 1;
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/_liveness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn readiness_follows_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let (app, aggregator) = test_app(&dir).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/_readiness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        aggregator.shutdown().await;
    }
}
