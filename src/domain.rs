//! Domain models for generation-job tracking: upstream status/step enums,
//! the UI-facing phase, and the per-phase progress bands.

use serde::{Deserialize, Serialize};

/// Coarse job status reported by the upstream generation service.
/// This set is owned by the upstream and stable across protocol revisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Queued,
  Processing,
  Completed,
  Failed,
  Paused,
}

/// Fine-grained pipeline step reported by the upstream.
/// `Unknown` absorbs steps introduced by newer upstream versions so a status
/// poll never fails to decode on an unrecognized step name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
  WaitingForUpload,
  Uploading,
  UploadVerifying,
  Extracting,
  Sectioning,
  StructureDetecting,
  StructureReview,
  WaitingForSlot,
  Generating,
  Postprocessing,
  Completed,
  #[serde(other)]
  Unknown,
}

/// UI-facing generation stage, derived from (status, step).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
  Queued,
  Uploading,
  Analyzing,
  StructureReview,
  Generating,
  Postprocessing,
  Complete,
  Paused,
  Error,
}

impl Phase {
  /// Fixed, non-overlapping progress band for the phase, as (min, max).
  /// `Paused` and `Error` carry no band: the raw value passes through.
  pub fn band(self) -> Option<(u8, u8)> {
    match self {
      Phase::Queued => Some((0, 5)),
      Phase::Uploading => Some((5, 20)),
      Phase::Analyzing => Some((20, 40)),
      Phase::StructureReview => Some((40, 50)),
      Phase::Generating => Some((50, 85)),
      Phase::Postprocessing => Some((85, 95)),
      Phase::Complete => Some((100, 100)),
      Phase::Paused | Phase::Error => None,
    }
  }

  /// True for phases on which polling stops.
  pub fn is_terminal(self) -> bool {
    matches!(self, Phase::Complete | Phase::Error)
  }
}
