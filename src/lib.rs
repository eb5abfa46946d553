//! examtrack-backend · Exam generation job tracker
//!
//! A small gateway that owns the client-side lifecycle of exam/problem
//! generation jobs: it starts jobs against the upstream generation service,
//! polls the status endpoint on an interval, folds every response through a
//! pure state machine, and pushes the resulting snapshots to thin frontends
//! over HTTP and WebSocket.

pub mod config;
pub mod domain;
pub mod machine;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod tracker;
pub mod upstream;
pub mod util;
