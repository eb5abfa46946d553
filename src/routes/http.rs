//! HTTP endpoint handlers. These are thin wrappers that forward to the
//! tracker. Each handler is instrumented and logs identifiers, not payloads.

use std::sync::Arc;
use axum::{extract::State, response::IntoResponse, Json};
use tracing::{info, instrument};

use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state, body), fields(%body.structure_id))]
pub async fn http_start_generation(
  State(state): State<Arc<AppState>>,
  Json(body): Json<StartIn>,
) -> impl IntoResponse {
  let job_id = state.tracker.start_generation(&body.structure_id).await;
  info!(target: "tracker", structure_id = %body.structure_id, job_id = ?job_id, "HTTP start_generation");
  Json(StartOut { job_id })
}

#[instrument(level = "info", skip(state, body), fields(%body.job_id))]
pub async fn http_track_job(
  State(state): State<Arc<AppState>>,
  Json(body): Json<TrackIn>,
) -> impl IntoResponse {
  state.tracker.track_existing_job(&body.job_id).await;
  Json(StateOut {
    state: state.tracker.snapshot().await,
    job_id: state.tracker.job_id().await,
    result: None,
  })
}

#[instrument(level = "debug", skip(state))]
pub async fn http_get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(StateOut {
    state: state.tracker.snapshot().await,
    job_id: state.tracker.job_id().await,
    result: state.tracker.result().await,
  })
}

#[instrument(level = "info", skip(state))]
pub async fn http_confirm_structure(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  match state.tracker.confirm_structure().await {
    Ok(()) => Json(AckOut { ok: true, message: None }),
    Err(message) => Json(AckOut { ok: false, message: Some(message) }),
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_reset(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  state.tracker.reset().await;
  Json(AckOut { ok: true, message: None })
}
