use std::sync::Arc;
use std::time::Instant;

use aggregator_common::event::Event;
use aggregator_worker::aggregator::EventAggregator;
use aggregator_worker::coordinator::PublishSummary;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_derive::Deserialize;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

/// The body of a publish request: a single event or an array of them.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum PublishRequestBody {
    Batch(Vec<Event>),
    Single(Box<Event>),
}

impl PublishRequestBody {
    fn into_events(self) -> Vec<Event> {
        match self {
            PublishRequestBody::Batch(events) => events,
            PublishRequestBody::Single(event) => vec![*event],
        }
    }
}

pub async fn post_publish(
    State(aggregator): State<Arc<EventAggregator>>,
    Json(body): Json<PublishRequestBody>,
) -> Result<Json<PublishSummary>, (StatusCode, Json<ErrorResponse>)> {
    let events = body.into_events();
    debug!("received {} events", events.len());

    let start_time = Instant::now();

    let summary = aggregator.publish(events).await.map_err(|error| {
        warn!("rejected publish: {}", error);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: error.to_string(),
            }),
        )
    })?;

    metrics::histogram!("aggregator_api_publish_duration_seconds")
        .record(start_time.elapsed().as_secs_f64());

    Ok(Json(summary))
}
