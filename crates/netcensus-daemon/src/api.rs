//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use netcensus_core::{DeviceDiscoveryResult, NetworkSegment, SegmentState};
use netcensus_discovery::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn status_for(e: &DiscoveryError) -> StatusCode {
    match e {
        DiscoveryError::InvalidCidr(_) | DiscoveryError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
        DiscoveryError::UnknownSegment(_) => StatusCode::NOT_FOUND,
        DiscoveryError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        DiscoveryError::Identification(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: DiscoveryError) -> Response {
    (status_for(&e), Json(ApiError::new(e.to_string()))).into_response()
}

/// Discovery request body
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverRequest {
    cidr: String,
    #[serde(default)]
    auto_register: bool,
    username: Option<String>,
    password: Option<String>,
}

/// Discover an arbitrary range
pub async fn discover(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DiscoverRequest>,
) -> impl IntoResponse {
    info!(cidr = %req.cidr, auto_register = req.auto_register, "Manual discovery requested");

    match state
        .scheduler
        .discover_cidr_now(
            &req.cidr,
            req.auto_register,
            req.username.as_deref(),
            req.password.as_deref(),
            &state.run_token(),
        )
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

/// Outcome of one segment in a discover-all run
#[derive(Serialize)]
struct SegmentRun {
    segment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<DeviceDiscoveryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Discover every configured segment
pub async fn discover_all_segments(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual discovery of all segments requested");

    let runs: Vec<SegmentRun> = state
        .scheduler
        .discover_all_now(&state.run_token())
        .await
        .into_iter()
        .map(|(segment, outcome)| match outcome {
            Ok(result) => SegmentRun {
                segment,
                result: Some(result),
                error: None,
            },
            Err(e) => SegmentRun {
                segment,
                result: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    Json(runs)
}

/// Discover one configured segment
pub async fn discover_segment(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    info!(segment = %name, "Manual segment discovery requested");

    match state.scheduler.discover_segment_now(&name, &state.run_token()).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

/// Identify a single device
pub async fn identify_device(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    let options = state.engine.defaults().clone();
    match state.engine.identify_address(&ip, &options, &state.run_token()).await {
        Ok(device) => Json(device).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Serialize)]
struct Reachability {
    ip: String,
    reachable: bool,
}

/// Ping a single device
pub async fn device_reachable(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    match state.engine.is_address_reachable(&ip).await {
        Ok(reachable) => Json(Reachability { ip, reachable }).into_response(),
        Err(e) => error_response(e),
    }
}

/// A configured segment with its scheduling state
#[derive(Serialize)]
struct SegmentView {
    #[serde(flatten)]
    segment: NetworkSegment,
    state: SegmentState,
}

/// List configured segments
pub async fn list_segments(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let states = state.scheduler.state().snapshot().await;
    let segments: Vec<SegmentView> = state
        .scheduler
        .segments()
        .iter()
        .map(|segment| SegmentView {
            state: states.get(&segment.name).cloned().unwrap_or_default(),
            segment: segment.clone(),
        })
        .collect();
    Json(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&DiscoveryError::InvalidAddress("x".into())),
            StatusCode::BAD_REQUEST
        );
        let cidr_err = "10.0.0.0".parse::<netcensus_core::Cidr>().unwrap_err();
        assert_eq!(status_for(&DiscoveryError::from(cidr_err)), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&DiscoveryError::UnknownSegment("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&DiscoveryError::Identification("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
