//! Polling driver that owns the generation-job lifecycle.
//!
//! The tracker holds one state container behind a lock. It is written only
//! from the poll task (via the pure reducer) or from the public methods
//! (`start_generation`, `track_existing_job`, `reset`). Every change is
//! fanned out to subscribers as a `TrackerEvent` over a broadcast channel,
//! which is what the WebSocket route forwards to connected frontends.
//!
//! Polling cadence: one `tokio::time::interval` per active job. Each tick
//! awaits a single status round-trip, so requests are never overlapped even
//! when the upstream is slower than the poll interval. Starting a new job or
//! resetting aborts the previous poll task before anything else.

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::config::TrackerConfig;
use crate::domain::{JobStatus, Phase};
use crate::machine::{
    initial_state, next_state, seed_after_start, seed_tracking, GenerationState,
    DEFAULT_GENERATION_ERROR,
};
use crate::upstream::{GenerationApi, GenerationStatusResponse};
use crate::util::now_millis;

/// Shown when the start call itself fails.
pub const START_FAILURE_MESSAGE: &str = "生成の開始に失敗しました";
/// Shown when status polling keeps failing at the transport level.
pub const STATUS_FETCH_FAILURE_MESSAGE: &str = "ステータスの取得に失敗しました";

/// Events fanned out to subscribers (one WebSocket push each).
#[derive(Clone, Debug)]
pub enum TrackerEvent {
    /// The tracked state changed (every applied poll result, seed, or reset).
    Update(GenerationState),
    /// The job reached `completed`; carries the full final response.
    Completed(GenerationStatusResponse),
    /// The job reached a terminal error (upstream `failed` or escalated
    /// transport failure).
    Failed { message: String, error_code: Option<String> },
    /// A single status fetch failed at the transport level; polling continues
    /// until the consecutive-failure limit escalates to `Failed`.
    StatusFetchFailed { message: String },
}

struct Inner {
    state: GenerationState,
    job_id: Option<String>,
    result: Option<GenerationStatusResponse>,
    fetch_failures: u32,
    poll: Option<JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // The interval task must not outlive its owner.
        if let Some(handle) = self.poll.take() {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct Tracker {
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<TrackerEvent>,
    api: GenerationApi,
    cfg: TrackerConfig,
}

impl Tracker {
    pub fn new(api: GenerationApi, cfg: TrackerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: initial_state(),
                job_id: None,
                result: None,
                fetch_failures: 0,
                poll: None,
            })),
            events,
            api,
            cfg,
        }
    }

    /// Subscribe to tracker events (used by each WebSocket connection).
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Current state snapshot.
    pub async fn snapshot(&self) -> GenerationState {
        self.inner.read().await.state.clone()
    }

    pub async fn job_id(&self) -> Option<String> {
        self.inner.read().await.job_id.clone()
    }

    /// Final response of a completed job, if any.
    pub async fn result(&self) -> Option<GenerationStatusResponse> {
        self.inner.read().await.result.clone()
    }

    /// Start generation for a confirmed structure and begin polling.
    ///
    /// Returns the new job id, or `None` when the start call failed; the
    /// failure is reflected in the tracked state and the event stream rather
    /// than propagated to the caller.
    #[instrument(level = "info", skip(self), fields(%structure_id))]
    pub async fn start_generation(&self, structure_id: &str) -> Option<String> {
        self.stop_poll().await;

        match self.api.start_structure(structure_id).await {
            Ok(job) => {
                let seed = seed_after_start();
                {
                    let mut inner = self.inner.write().await;
                    inner.job_id = Some(job.job_id.clone());
                    inner.result = None;
                    inner.fetch_failures = 0;
                    inner.state = seed.clone();
                }
                let _ = self.events.send(TrackerEvent::Update(seed));
                info!(target: "tracker", job_id = %job.job_id, "generation job started");
                self.spawn_poll(job.job_id.clone()).await;
                Some(job.job_id)
            }
            Err(e) => {
                error!(target: "tracker", error = %e, "failed to start generation");
                let next = {
                    let mut inner = self.inner.write().await;
                    inner.job_id = None;
                    inner.result = None;
                    inner.state = error_state(&inner.state, START_FAILURE_MESSAGE);
                    inner.state.clone()
                };
                let _ = self.events.send(TrackerEvent::Update(next));
                let _ = self.events.send(TrackerEvent::Failed {
                    message: START_FAILURE_MESSAGE.into(),
                    error_code: None,
                });
                None
            }
        }
    }

    /// Adopt an already-running job without calling start.
    #[instrument(level = "info", skip(self), fields(%job_id))]
    pub async fn track_existing_job(&self, job_id: &str) {
        self.stop_poll().await;

        let seed = seed_tracking();
        {
            let mut inner = self.inner.write().await;
            inner.job_id = Some(job_id.to_string());
            inner.result = None;
            inner.fetch_failures = 0;
            inner.state = seed.clone();
        }
        let _ = self.events.send(TrackerEvent::Update(seed));
        info!(target: "tracker", %job_id, "tracking existing generation job");
        self.spawn_poll(job_id.to_string()).await;
    }

    /// Forward a structure-review confirmation for the current job.
    #[instrument(level = "info", skip(self))]
    pub async fn confirm_structure(&self) -> Result<(), String> {
        let job_id = match self.job_id().await {
            Some(id) => id,
            None => return Err("アクティブなジョブがありません".into()),
        };
        self.api.confirm(&job_id).await.map_err(|e| e.to_string())
    }

    /// Clear job, result, and state back to the initial snapshot.
    #[instrument(level = "info", skip(self))]
    pub async fn reset(&self) {
        self.stop_poll().await;
        let next = {
            let mut inner = self.inner.write().await;
            inner.job_id = None;
            inner.result = None;
            inner.fetch_failures = 0;
            inner.state = initial_state();
            inner.state.clone()
        };
        let _ = self.events.send(TrackerEvent::Update(next));
        info!(target: "tracker", "tracker reset");
    }

    async fn stop_poll(&self) {
        if let Some(handle) = self.inner.write().await.poll.take() {
            handle.abort();
        }
    }

    async fn spawn_poll(&self, job_id: String) {
        let inner = self.inner.clone();
        let events = self.events.clone();
        let api = self.api.clone();
        let max_failures = self.cfg.max_fetch_failures;
        let period = Duration::from_millis(self.cfg.poll_interval_ms.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match api.status(&job_id).await {
                    Ok(resp) => {
                        let mut guard = inner.write().await;
                        // The job may have been reset or replaced while the
                        // request was in flight; this loop no longer owns it.
                        if guard.job_id.as_deref() != Some(job_id.as_str()) {
                            break;
                        }
                        guard.fetch_failures = 0;
                        let next = next_state(&guard.state, &resp);
                        guard.state = next.clone();

                        match resp.status {
                            JobStatus::Completed => {
                                guard.result = Some(resp.clone());
                                drop(guard);
                                info!(target: "tracker", %job_id, problem_id = ?resp.problem_id, "generation completed");
                                let _ = events.send(TrackerEvent::Update(next));
                                let _ = events.send(TrackerEvent::Completed(resp));
                                break;
                            }
                            JobStatus::Failed => {
                                drop(guard);
                                let message = next
                                    .error_message
                                    .clone()
                                    .unwrap_or_else(|| DEFAULT_GENERATION_ERROR.into());
                                let error_code = resp.error_code.clone();
                                warn!(target: "tracker", %job_id, error_code = ?error_code, %message, "generation failed");
                                let _ = events.send(TrackerEvent::Update(next));
                                let _ = events.send(TrackerEvent::Failed { message, error_code });
                                break;
                            }
                            _ => {
                                drop(guard);
                                let _ = events.send(TrackerEvent::Update(next));
                            }
                        }
                    }
                    Err(e) => {
                        let mut guard = inner.write().await;
                        if guard.job_id.as_deref() != Some(job_id.as_str()) {
                            break;
                        }
                        guard.fetch_failures += 1;
                        let failures = guard.fetch_failures;
                        warn!(target: "tracker", %job_id, %failures, error = %e, "status fetch failed");

                        if failures >= max_failures {
                            let next = error_state(&guard.state, STATUS_FETCH_FAILURE_MESSAGE);
                            guard.state = next.clone();
                            drop(guard);
                            error!(target: "tracker", %job_id, %failures, "status polling escalated to terminal error");
                            let _ = events.send(TrackerEvent::Update(next));
                            let _ = events.send(TrackerEvent::Failed {
                                message: STATUS_FETCH_FAILURE_MESSAGE.into(),
                                error_code: None,
                            });
                            break;
                        }
                        drop(guard);
                        let _ = events.send(TrackerEvent::StatusFetchFailed {
                            message: STATUS_FETCH_FAILURE_MESSAGE.into(),
                        });
                    }
                }
            }
        });

        self.inner.write().await.poll = Some(handle);
    }
}

/// Error-phase state for failures that originate in this service (start
/// failure, escalated transport failure) rather than in an upstream response.
fn error_state(current: &GenerationState, message: &str) -> GenerationState {
    GenerationState {
        phase: Phase::Error,
        current_step: current.current_step,
        progress: current.progress,
        problem_id: current.problem_id.clone(),
        error_code: None,
        error_message: Some(message.to_string()),
        last_updated: Some(now_millis()),
    }
}
