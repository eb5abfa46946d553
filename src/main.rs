//! examtrack-backend · Exam Generation Tracker
//!
//! - Axum HTTP + WebSocket API for thin frontends
//! - Polls the upstream generation service and owns the job state machine
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   UPSTREAM_BASE_URL   : base URL of the generation service
//!   UPSTREAM_API_KEY    : optional bearer token for the upstream
//!   TRACKER_CONFIG_PATH : path to TOML config (poll interval, limits)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use examtrack_backend::routes::build_router;
use examtrack_backend::state::AppState;
use examtrack_backend::telemetry;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (config, upstream client, tracker).
  let state = Arc::new(AppState::new()?);

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "examtrack_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
