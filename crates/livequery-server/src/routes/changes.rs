//! Change ingest and change feed endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use livequery_proto::NewChange;
use serde::Deserialize;

use crate::error::AppError;
use crate::json::{ChangeRecordJson, ChangesResponse, NewChangeJson};
use crate::AppState;

/// Default page size of the change feed.
const DEFAULT_FEED_LIMIT: usize = 1000;

/// Largest page the change feed returns.
const MAX_FEED_LIMIT: usize = 10_000;

/// Change routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/changes", get(handle_list_changes).post(handle_append_change))
}

/// Record a committed mutation, then notify matching topics.
///
/// Append failures reach the caller; notification is best effort.
async fn handle_append_change(
    State(state): State<AppState>,
    Json(change): Json<NewChangeJson>,
) -> Result<(StatusCode, Json<ChangeRecordJson>), AppError> {
    let record = state.notifier.append_change(NewChange::from(change))?;
    state.notifier.notify(&record);
    Ok((StatusCode::CREATED, Json(ChangeRecordJson::from(&record))))
}

/// Query parameters of the change feed.
#[derive(Debug, Deserialize)]
pub struct ChangeFeedParams {
    /// First sequence to return (inclusive).
    #[serde(default)]
    pub from_sequence: u64,
    /// Maximum number of records to return.
    #[serde(default = "default_feed_limit")]
    pub limit: usize,
    /// Optional resource filter (comma-separated).
    pub resources: Option<String>,
}

fn default_feed_limit() -> usize {
    DEFAULT_FEED_LIMIT
}

/// Page through the change log for catch-up after a gap.
async fn handle_list_changes(
    State(state): State<AppState>,
    Query(params): Query<ChangeFeedParams>,
) -> Result<Json<ChangesResponse>, AppError> {
    let resources: Option<Vec<String>> = params.resources.map(|s| {
        s.split(',')
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect()
    });
    let limit = params.limit.clamp(1, MAX_FEED_LIMIT);

    let changelog = state.notifier.changelog();
    let (records, has_more) =
        changelog.scan_batch(params.from_sequence, limit, resources.as_deref())?;

    let next_sequence = records
        .last()
        .map(|record| record.sequence + 1)
        .unwrap_or(params.from_sequence);

    Ok(Json(ChangesResponse {
        changes: records.iter().map(ChangeRecordJson::from).collect(),
        next_sequence,
        has_more,
        current_sequence: changelog.current_sequence(),
    }))
}
