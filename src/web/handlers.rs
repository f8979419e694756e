use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;
use crate::state::AppState;
use crate::supervisor::ProcessStatus;

/// Resource named in the `Location` header of every WHEP answer
pub const WHEP_LOCATION: &str = "/whep";

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub viewers: u32,
    pub sessions: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        viewers: state.viewers.get(),
        sessions: state.sessions.len(),
    })
}

pub async fn process_status(State(state): State<Arc<AppState>>) -> Json<Vec<ProcessStatus>> {
    Json(state.supervisor.status())
}

/// WHEP: raw SDP offer in, raw SDP answer out
pub async fn whep_offer(State(state): State<Arc<AppState>>, offer: String) -> Result<Response> {
    let answer = state.sessions.negotiate(offer).await?;

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, WHEP_LOCATION),
            (header::CONTENT_TYPE, "application/sdp"),
        ],
        answer.sdp,
    )
        .into_response())
}
