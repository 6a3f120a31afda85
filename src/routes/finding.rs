//! Finding history API routes

use crate::error::ApiResult;
use crate::snapshot::lifecycle::FindingLifecycle;
use crate::snapshot::models::FindingId;
use crate::routes::extract::ApiPath;
use crate::state::SharedState;
use axum::{
    extract::State,
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChronicFindingsResponse {
    pub success: bool,
    pub chronic_after: usize,
    pub findings: Vec<FindingLifecycle>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleResponse {
    pub success: bool,
    pub lifecycle: FindingLifecycle,
}

/// Findings that have stayed open across too many snapshots
pub async fn list_chronic(State(state): State<SharedState>) -> ApiResult<Json<ChronicFindingsResponse>> {
    let findings = state.facade.chronic_findings().await?;
    Ok(Json(ChronicFindingsResponse {
        success: true,
        chronic_after: state.facade.config().chronic_after,
        findings,
    }))
}

/// Introduced / resolved / reintroduced history of one finding
pub async fn get_lifecycle(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    let lifecycle = state.facade.finding_lifecycle(&FindingId(id)).await?;
    Ok(Json(LifecycleResponse {
        success: true,
        lifecycle,
    }))
}
