//! Shared response bodies
//!
//! Domain types live with their modules (`snapshot::models`, `trend`); this
//! holds the envelopes every route family reuses.

use serde::Serialize;

/// Message-only response (no data)
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Health check body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
    pub version: &'static str,
    pub snapshot_count: usize,
    pub persistent: bool,
}
