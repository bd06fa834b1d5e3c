//! Health check endpoints
//!
//! - `/internal/isalive`: the process is up
//! - `/internal/isready`: the database answers
//! - `/internal/version`: build info

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub git_commit_full: &'static str,
    pub build_time: &'static str,
}

pub fn is_alive() -> Response<BoxBody> {
    json_response(StatusCode::OK, &serde_json::json!({ "alive": true }))
}

pub async fn is_ready(state: Arc<AppState>) -> Response<BoxBody> {
    match state.service.store().ping().await {
        Ok(()) => json_response(
            StatusCode::OK,
            &ReadyResponse {
                ready: true,
                error: None,
            },
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &ReadyResponse {
                    ready: false,
                    error: Some(e.to_string()),
                },
            )
        }
    }
}

pub fn version_info() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &VersionInfo {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: env!("GIT_COMMIT_SHORT"),
            git_commit_full: env!("GIT_COMMIT_FULL"),
            build_time: env!("BUILD_TIMESTAMP"),
        },
    )
}
