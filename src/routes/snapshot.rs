//! Snapshot API routes
//!
//! Analyzer feed, history browsing, annotations and comparisons.

use crate::error::{validation_error, ApiResult};
use crate::models::MessageResponse;
use crate::routes::extract::{ApiJson, ApiPath, ApiQuery};
use crate::snapshot::diff::Delta;
use crate::snapshot::models::{NewSnapshot, SnapshotDetail, SnapshotId, SnapshotSummary};
use crate::snapshot::store::SnapshotQuery;
use crate::state::SharedState;
use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

// ==================== Request/Response Types ====================

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshotsParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Cursor from a previous page
    pub after: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 500, message = "limit must be between 1 and 500"))]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendParams {
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRequest {
    #[validate(length(max = 2000, message = "note is too long"))]
    pub note: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotListResponse {
    pub success: bool,
    pub snapshots: Vec<SnapshotSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCreatedResponse {
    pub success: bool,
    pub message: String,
    pub snapshot: SnapshotSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub success: bool,
    pub snapshot: SnapshotDetail,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareResponse {
    pub success: bool,
    pub delta: Arc<Delta>,
}

// ==================== Handlers ====================

/// List snapshot summaries, oldest first
pub async fn list_snapshots(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<ListSnapshotsParams>,
) -> ApiResult<Json<SnapshotListResponse>> {
    params.validate().map_err(|e| validation_error(e.to_string()))?;

    let page = state
        .facade
        .list_snapshots(&SnapshotQuery {
            from: params.from,
            to: params.to,
            after: params.after,
            limit: params.limit,
        })
        .await?;

    Ok(Json(SnapshotListResponse {
        success: true,
        snapshots: page.items,
        next_cursor: page.next_cursor,
    }))
}

/// Append a snapshot from the analyzer
pub async fn create_snapshot(
    State(state): State<SharedState>,
    ApiQuery(params): ApiQuery<AppendParams>,
    ApiJson(payload): ApiJson<NewSnapshot>,
) -> ApiResult<(StatusCode, Json<SnapshotCreatedResponse>)> {
    let snapshot = state.facade.append_snapshot(payload, params.overwrite).await?;

    Ok((
        StatusCode::CREATED,
        Json(SnapshotCreatedResponse {
            success: true,
            message: format!("Snapshot {} recorded", snapshot.id),
            snapshot,
        }),
    ))
}

/// Fetch one snapshot with its annotation
pub async fn get_snapshot(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<u64>,
) -> ApiResult<Json<SnapshotResponse>> {
    let snapshot = state.facade.get_snapshot(SnapshotId(id)).await?;
    Ok(Json(SnapshotResponse {
        success: true,
        snapshot,
    }))
}

/// Remove a snapshot (retention)
pub async fn delete_snapshot(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<u64>,
) -> ApiResult<Json<MessageResponse>> {
    let id = SnapshotId(id);
    state.facade.delete_snapshot(id).await?;
    Ok(Json(MessageResponse::new(format!("Snapshot {} deleted", id))))
}

/// Attach a note to a snapshot; an empty note clears it
pub async fn annotate_snapshot(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(payload): ApiJson<AnnotationRequest>,
) -> ApiResult<Json<MessageResponse>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let id = SnapshotId(id);
    state.facade.annotate_snapshot(id, &payload.note).await?;
    Ok(Json(MessageResponse::new(format!("Snapshot {} annotated", id))))
}

/// Structured difference between two snapshots
pub async fn compare_snapshots(
    State(state): State<SharedState>,
    ApiPath((base, target)): ApiPath<(u64, u64)>,
) -> ApiResult<Json<CompareResponse>> {
    let delta = state.facade.compare(SnapshotId(base), SnapshotId(target)).await?;
    Ok(Json(CompareResponse { success: true, delta }))
}
