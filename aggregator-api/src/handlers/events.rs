use std::sync::Arc;

use aggregator_common::stats::StatsSnapshot;
use aggregator_common::store::DedupRecord;
use aggregator_worker::aggregator::EventAggregator;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde_derive::Deserialize;
use tracing::error;

use super::publish::ErrorResponse;

#[derive(Deserialize, Debug)]
pub struct EventsQuery {
    topic: Option<String>,
}

pub async fn get_stats(State(aggregator): State<Arc<EventAggregator>>) -> Json<StatsSnapshot> {
    Json(aggregator.stats())
}

/// Processed events in insertion order, optionally for a single topic.
pub async fn get_events(
    State(aggregator): State<Arc<EventAggregator>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<DedupRecord>>, (StatusCode, Json<ErrorResponse>)> {
    let records = aggregator
        .list_events(query.topic.as_deref())
        .await
        .map_err(|error| {
            error!("failed to list events: {}", error);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "dedup store unavailable".to_owned(),
                }),
            )
        })?;

    Ok(Json(records))
}
