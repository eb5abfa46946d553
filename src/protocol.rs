//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable so thin frontends can evolve independently.

use serde::{Deserialize, Serialize};

use crate::machine::GenerationState;
use crate::upstream::GenerationStatusResponse;

/// Messages a frontend can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    StartGeneration {
        #[serde(rename = "structureId")]
        structure_id: String,
    },
    TrackJob {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    ConfirmStructure,
    Reset,
    GetState,
}

/// Messages the server pushes back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    State {
        state: GenerationState,
        #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
    Completed {
        result: GenerationStatusResponse,
    },
    GenerationError {
        message: String,
        #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    StatusFetchFailed {
        message: String,
    },
    Confirmed,
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct StartIn {
    #[serde(rename = "structureId")]
    pub structure_id: String,
}
#[derive(Serialize)]
pub struct StartOut {
    #[serde(rename = "jobId")]
    pub job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackIn {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

#[derive(Serialize)]
pub struct StateOut {
    pub state: GenerationState,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GenerationStatusResponse>,
}

#[derive(Serialize)]
pub struct AckOut {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
