//! Shared application state: tracker config, upstream client, and the
//! single job tracker that HTTP and WebSocket handlers operate on.

use tracing::{info, instrument};

use crate::config::{load_config_from_env, TrackerConfig};
use crate::tracker::Tracker;
use crate::upstream::{GenerationApi, UpstreamError};

#[derive(Clone)]
pub struct AppState {
    pub config: TrackerConfig,
    pub tracker: Tracker,
}

impl AppState {
    /// Build state from env: load config, construct the upstream client and
    /// the tracker. Fails only when the HTTP client cannot be constructed.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Result<Self, UpstreamError> {
        let config = load_config_from_env();
        let api = GenerationApi::new(&config)?;
        info!(
            target: "examtrack_backend",
            upstream = %api.base_url(),
            poll_interval_ms = config.poll_interval_ms,
            max_fetch_failures = config.max_fetch_failures,
            "Tracker configured"
        );
        let tracker = Tracker::new(api, config.clone());
        Ok(Self { config, tracker })
    }
}
