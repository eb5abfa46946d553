//! Client for the upstream generation service.
//!
//! Three endpoints are consumed: start a structure generation, poll job
//! status, and confirm a reviewed structure. Calls are instrumented and log
//! latencies and identifiers, never payload contents or the API key.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::TrackerConfig;
use crate::domain::{JobStatus, JobStep};
use crate::util::trunc_for_log;

/// Failures talking to the upstream. `Http` carries the message extracted
/// from a JSON error body when the upstream provides one.
#[derive(Debug, Error)]
pub enum UpstreamError {
  #[error("upstream HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("upstream transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("upstream response decode error: {0}")]
  Decode(String),
}

/// Status of one generation job as reported by the upstream.
/// `progress` is kept wide here; the state machine pins it to [0, 100].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatusResponse {
  pub job_id: String,
  pub status: JobStatus,
  pub current_step: JobStep,
  #[serde(default)]
  pub progress: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub problem_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_code: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartStructureRequest<'a> {
  structure_id: &'a str,
}

/// Response to a successful start call.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
  pub job_id: String,
}

#[derive(Clone)]
pub struct GenerationApi {
  client: reqwest::Client,
  base_url: String,
  api_key: Option<String>,
}

impl GenerationApi {
  /// Build the client from config. Fails only if reqwest cannot construct
  /// its client (effectively a startup error).
  pub fn new(cfg: &TrackerConfig) -> Result<Self, UpstreamError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.request_timeout_secs))
      .build()?;
    Ok(Self {
      client,
      base_url: cfg.upstream_base_url.trim_end_matches('/').to_string(),
      api_key: cfg.upstream_api_key.clone(),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    let req = req
      .header(USER_AGENT, "examtrack-backend/0.1")
      .header(CONTENT_TYPE, "application/json");
    match &self.api_key {
      Some(key) => req.header(AUTHORIZATION, format!("Bearer {}", key)),
      None => req,
    }
  }

  /// Kick off generation for a confirmed document structure.
  #[instrument(level = "info", skip(self), fields(%structure_id))]
  pub async fn start_structure(&self, structure_id: &str) -> Result<StartedJob, UpstreamError> {
    let url = format!("{}/generation/start-structure", self.base_url);
    let start = std::time::Instant::now();
    let res = self
      .request(self.client.post(&url))
      .json(&StartStructureRequest { structure_id })
      .send()
      .await?;
    let res = check_status(res).await?;
    let job: StartedJob = res.json().await.map_err(|e| UpstreamError::Decode(e.to_string()))?;
    info!(target: "upstream", job_id = %job.job_id, elapsed = ?start.elapsed(), "generation started");
    Ok(job)
  }

  /// Fetch the current status of a job.
  #[instrument(level = "debug", skip(self), fields(%job_id))]
  pub async fn status(&self, job_id: &str) -> Result<GenerationStatusResponse, UpstreamError> {
    let url = format!("{}/generation/status/{}", self.base_url, job_id);
    let res = self.request(self.client.get(&url)).send().await?;
    let res = check_status(res).await?;
    res
      .json::<GenerationStatusResponse>()
      .await
      .map_err(|e| UpstreamError::Decode(e.to_string()))
  }

  /// Confirm a reviewed structure so generation can proceed. Fire-and-forget
  /// from the caller's perspective; the body of the response is ignored.
  #[instrument(level = "info", skip(self), fields(%job_id))]
  pub async fn confirm(&self, job_id: &str) -> Result<(), UpstreamError> {
    let url = format!("{}/generation/confirm/{}", self.base_url, job_id);
    let res = self.request(self.client.post(&url)).send().await?;
    check_status(res).await?;
    info!(target: "upstream", %job_id, "structure confirmed");
    Ok(())
  }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
  if res.status().is_success() {
    return Ok(res);
  }
  let status = res.status().as_u16();
  let body = res.text().await.unwrap_or_default();
  let message = extract_error_message(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
  Err(UpstreamError::Http { status, message })
}

/// Try to pull a clean message out of an upstream JSON error body.
/// Accepts both `{"error": {"message": ...}}` and `{"message": ...}` shapes.
fn extract_error_message(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  #[derive(Deserialize)]
  struct EFlat { message: String }

  if let Ok(w) = serde_json::from_str::<EWrap>(body) {
    return Some(w.error.message);
  }
  serde_json::from_str::<EFlat>(body).ok().map(|f| f.message)
}
