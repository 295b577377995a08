use std::future::Future;
use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Serve `router` on `bind` until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<F>(router: Router, bind: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
/// Installs the global recorder, so it can only be called once per process.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];
    const BATCH_SIZES: &[f64] = &[1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0];

    let handle = PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .set_buckets_for_metric(
            Matcher::Full("aggregator_publish_batch_size".to_owned()),
            BATCH_SIZES,
        )?
        .install_recorder()?;
    describe_metrics();

    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "aggregator_events_received_total",
        "Events that passed validation and entered the pipeline"
    );
    metrics::describe_counter!(
        "aggregator_events_unique_total",
        "Events whose identity was seen for the first time"
    );
    metrics::describe_counter!(
        "aggregator_events_duplicate_total",
        "Events dropped because their identity was already processed"
    );
    metrics::describe_counter!(
        "aggregator_events_failed_total",
        "Events that could not be classified, safe to publish again"
    );
    metrics::describe_gauge!("aggregator_queue_depth", "Events waiting for a worker");
    metrics::describe_histogram!(
        "aggregator_event_processing_duration_seconds",
        metrics::Unit::Seconds,
        "Time from enqueue to outcome for each event"
    );
    metrics::describe_histogram!(
        "aggregator_publish_batch_size",
        metrics::Unit::Count,
        "Events per publish call"
    );
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("aggregator_http_requests_total", &labels).increment(1);
    metrics::histogram!("aggregator_http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
