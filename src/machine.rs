//! The pure generation state machine: status/step → phase mapping, per-phase
//! progress clamping, and the reducer that folds upstream status responses
//! into the tracked state.
//!
//! Everything here is synchronous and side-effect free except for the
//! `last_updated` timestamp. The reducer never mutates its input; feeding the
//! same response twice from the same state yields the same result.

use serde::{Deserialize, Serialize};

use crate::domain::{JobStatus, JobStep, Phase};
use crate::upstream::GenerationStatusResponse;
use crate::util::now_millis;

/// Shown to the user when the upstream reports `failed` without any message.
pub const DEFAULT_GENERATION_ERROR: &str = "問題の生成中にエラーが発生しました";

/// Client-owned snapshot of a generation job, derived from upstream responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationState {
  pub phase: Phase,
  pub current_step: JobStep,
  pub progress: u8,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub problem_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_code: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<u64>,
}

/// State before any job exists (or after a reset).
pub fn initial_state() -> GenerationState {
  GenerationState {
    phase: Phase::Queued,
    current_step: JobStep::WaitingForUpload,
    progress: 0,
    problem_id: None,
    error_code: None,
    error_message: None,
    last_updated: None,
  }
}

/// Seed state used immediately after a job was started successfully,
/// before the first poll lands.
pub fn seed_after_start() -> GenerationState {
  GenerationState {
    phase: Phase::Uploading,
    current_step: JobStep::Uploading,
    progress: 10,
    problem_id: None,
    error_code: None,
    error_message: None,
    last_updated: Some(now_millis()),
  }
}

/// Seed state used when adopting an already-running job by id.
pub fn seed_tracking() -> GenerationState {
  GenerationState {
    phase: Phase::Generating,
    current_step: JobStep::Generating,
    progress: 50,
    problem_id: None,
    error_code: None,
    error_message: None,
    last_updated: Some(now_millis()),
  }
}

/// Map an upstream (status, step) pair to the UI phase.
///
/// Terminal statuses override the step entirely. An `Unknown` step falls back
/// to `Queued` while the job is still queued, otherwise to `Generating`.
pub fn phase_for(status: JobStatus, step: JobStep) -> Phase {
  match status {
    JobStatus::Completed => return Phase::Complete,
    JobStatus::Paused => return Phase::Paused,
    JobStatus::Failed => return Phase::Error,
    JobStatus::Queued | JobStatus::Processing => {}
  }
  match step {
    JobStep::WaitingForUpload => Phase::Queued,
    JobStep::Uploading | JobStep::UploadVerifying => Phase::Uploading,
    JobStep::Extracting | JobStep::Sectioning => Phase::Analyzing,
    JobStep::StructureDetecting | JobStep::StructureReview => Phase::StructureReview,
    JobStep::WaitingForSlot | JobStep::Generating => Phase::Generating,
    JobStep::Postprocessing => Phase::Postprocessing,
    JobStep::Completed => Phase::Complete,
    JobStep::Unknown => {
      if status == JobStatus::Queued { Phase::Queued } else { Phase::Generating }
    }
  }
}

/// Clamp a raw upstream progress value into the band of the derived phase.
/// Out-of-range raw values are first pinned to [0, 100]; `Paused`/`Error`
/// pass the pinned value through unchanged.
pub fn clamp_progress(phase: Phase, raw: i64) -> u8 {
  let safe = raw.clamp(0, 100) as u8;
  match phase.band() {
    Some((min, max)) => safe.clamp(min, max),
    None => safe,
  }
}

/// Fold one upstream status response into the tracked state.
///
/// The error branch keeps the previously seen `problem_id` and guarantees a
/// non-empty `error_message` (upstream `errorMessage`, then `message`, then
/// the fixed default). The non-error branch retains `problem_id` when the
/// response omits one and clears any stale error fields.
pub fn next_state(
  current: &GenerationState,
  status: &GenerationStatusResponse,
) -> GenerationState {
  let phase = phase_for(status.status, status.current_step);
  let progress = clamp_progress(phase, status.progress);

  if phase == Phase::Error {
    let message = status
      .error_message
      .clone()
      .or_else(|| status.message.clone())
      .filter(|m| !m.is_empty())
      .unwrap_or_else(|| DEFAULT_GENERATION_ERROR.to_string());
    return GenerationState {
      phase,
      current_step: status.current_step,
      progress,
      problem_id: current.problem_id.clone(),
      error_code: status.error_code.clone(),
      error_message: Some(message),
      last_updated: Some(now_millis()),
    };
  }

  GenerationState {
    phase,
    current_step: status.current_step,
    progress,
    problem_id: status.problem_id.clone().or_else(|| current.problem_id.clone()),
    error_code: None,
    error_message: None,
    last_updated: Some(now_millis()),
  }
}
