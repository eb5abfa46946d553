//! End-to-end tracker tests against a mocked upstream generation service.
//!
//! Each test runs the real poll loop (short interval) against wiremock and
//! observes the broadcast event stream the WebSocket route would forward.

use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use tokio::time::{sleep, timeout};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use examtrack_backend::config::TrackerConfig;
use examtrack_backend::domain::Phase;
use examtrack_backend::tracker::{
    Tracker, TrackerEvent, START_FAILURE_MESSAGE, STATUS_FETCH_FAILURE_MESSAGE,
};
use examtrack_backend::upstream::GenerationApi;

fn tracker_for(server: &MockServer, max_fetch_failures: u32) -> Tracker {
    let cfg = TrackerConfig {
        upstream_base_url: server.uri(),
        upstream_api_key: None,
        poll_interval_ms: 25,
        request_timeout_secs: 5,
        max_fetch_failures,
    };
    let api = GenerationApi::new(&cfg).expect("client construction");
    Tracker::new(api, cfg)
}

async fn mount_start(server: &MockServer, job_id: &str) {
    Mock::given(method("POST"))
        .and(path("/generation/start-structure"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobId": job_id })))
        .mount(server)
        .await;
}

async fn next_event(rx: &mut Receiver<TrackerEvent>) -> TrackerEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for tracker event")
        .expect("event stream closed")
}

/// Receive events until the predicate matches, failing on timeout.
async fn wait_for(
    rx: &mut Receiver<TrackerEvent>,
    mut pred: impl FnMut(&TrackerEvent) -> bool,
) -> TrackerEvent {
    loop {
        let ev = next_event(rx).await;
        if pred(&ev) {
            return ev;
        }
    }
}

#[tokio::test]
async fn completed_job_stops_polling_and_stores_result() {
    let server = MockServer::start().await;
    mount_start(&server, "job-1").await;

    // First poll sees extraction in flight, every later poll sees completion.
    Mock::given(method("GET"))
        .and(path("/generation/status/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-1",
            "status": "processing",
            "currentStep": "extracting",
            "progress": 25
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/generation/status/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-1",
            "status": "completed",
            "currentStep": "completed",
            "progress": 100,
            "problemId": "prob-1"
        })))
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 5);
    let mut events = tracker.subscribe();

    let job_id = tracker.start_generation("struct-1").await;
    assert_eq!(job_id.as_deref(), Some("job-1"));

    let ev = wait_for(&mut events, |ev| matches!(ev, TrackerEvent::Completed(_))).await;
    let result = match ev {
        TrackerEvent::Completed(r) => r,
        other => panic!("expected Completed, got {:?}", other),
    };
    assert_eq!(result.problem_id.as_deref(), Some("prob-1"));

    let snap = tracker.snapshot().await;
    assert_eq!(snap.phase, Phase::Complete);
    assert_eq!(snap.progress, 100);
    assert_eq!(snap.problem_id.as_deref(), Some("prob-1"));
    assert!(tracker.result().await.is_some());

    // Polling stopped: no further events after the terminal one.
    sleep(Duration::from_millis(120)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn failed_job_surfaces_error_and_stops() {
    let server = MockServer::start().await;
    mount_start(&server, "job-2").await;

    Mock::given(method("GET"))
        .and(path("/generation/status/job-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-2",
            "status": "failed",
            "currentStep": "extracting",
            "progress": 30,
            "errorCode": "ocr_timeout",
            "errorMessage": "OCR処理がタイムアウトしました"
        })))
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 5);
    let mut events = tracker.subscribe();
    tracker.start_generation("struct-2").await;

    let ev = wait_for(&mut events, |ev| matches!(ev, TrackerEvent::Failed { .. })).await;
    match ev {
        TrackerEvent::Failed { message, error_code } => {
            assert_eq!(message, "OCR処理がタイムアウトしました");
            assert_eq!(error_code.as_deref(), Some("ocr_timeout"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }

    let snap = tracker.snapshot().await;
    assert_eq!(snap.phase, Phase::Error);
    assert_eq!(snap.error_code.as_deref(), Some("ocr_timeout"));

    sleep(Duration::from_millis(120)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn sustained_transport_failures_escalate_to_terminal_error() {
    let server = MockServer::start().await;
    mount_start(&server, "job-3").await;

    Mock::given(method("GET"))
        .and(path("/generation/status/job-3"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 3);
    let mut events = tracker.subscribe();
    tracker.start_generation("struct-3").await;

    let mut fetch_failures = 0;
    let ev = wait_for(&mut events, |ev| {
        if matches!(ev, TrackerEvent::StatusFetchFailed { .. }) {
            fetch_failures += 1;
        }
        matches!(ev, TrackerEvent::Failed { .. })
    })
    .await;
    // Two non-terminal retries, then the third failure escalates.
    assert_eq!(fetch_failures, 2);
    match ev {
        TrackerEvent::Failed { message, error_code } => {
            assert_eq!(message, STATUS_FETCH_FAILURE_MESSAGE);
            assert!(error_code.is_none());
        }
        other => panic!("expected Failed, got {:?}", other),
    }

    let snap = tracker.snapshot().await;
    assert_eq!(snap.phase, Phase::Error);
    assert_eq!(snap.error_message.as_deref(), Some(STATUS_FETCH_FAILURE_MESSAGE));

    sleep(Duration::from_millis(120)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn start_failure_sets_error_state_without_propagating() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generation/start-structure"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({ "error": { "message": "no capacity" } })),
        )
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 5);
    let mut events = tracker.subscribe();

    let job_id = tracker.start_generation("struct-4").await;
    assert!(job_id.is_none());

    let ev = wait_for(&mut events, |ev| matches!(ev, TrackerEvent::Failed { .. })).await;
    match ev {
        TrackerEvent::Failed { message, .. } => assert_eq!(message, START_FAILURE_MESSAGE),
        other => panic!("expected Failed, got {:?}", other),
    }

    let snap = tracker.snapshot().await;
    assert_eq!(snap.phase, Phase::Error);
    assert_eq!(snap.error_message.as_deref(), Some(START_FAILURE_MESSAGE));
    assert!(tracker.job_id().await.is_none());
}

#[tokio::test]
async fn problem_id_survives_updates_that_omit_it() {
    let server = MockServer::start().await;
    mount_start(&server, "job-5").await;

    Mock::given(method("GET"))
        .and(path("/generation/status/job-5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-5",
            "status": "processing",
            "currentStep": "generating",
            "progress": 60,
            "problemId": "p1"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/generation/status/job-5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-5",
            "status": "processing",
            "currentStep": "postprocessing",
            "progress": 90
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/generation/status/job-5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-5",
            "status": "completed",
            "currentStep": "completed",
            "progress": 100
        })))
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 5);
    let mut events = tracker.subscribe();
    tracker.start_generation("struct-5").await;

    wait_for(&mut events, |ev| matches!(ev, TrackerEvent::Completed(_))).await;
    let snap = tracker.snapshot().await;
    assert_eq!(snap.phase, Phase::Complete);
    assert_eq!(snap.problem_id.as_deref(), Some("p1"));
}

#[tokio::test]
async fn paused_job_keeps_polling_with_raw_progress() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/generation/status/job-6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-6",
            "status": "paused",
            "currentStep": "generating",
            "progress": 60
        })))
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 5);
    let mut events = tracker.subscribe();
    tracker.track_existing_job("job-6").await;

    // Seed snapshot first, then at least two paused updates: pause is not
    // terminal, so the loop keeps going.
    let mut paused_updates = 0;
    while paused_updates < 2 {
        if let TrackerEvent::Update(s) = next_event(&mut events).await {
            if s.phase == Phase::Paused {
                assert_eq!(s.progress, 60);
                paused_updates += 1;
            }
        }
    }

    tracker.reset().await;
    let snap = tracker.snapshot().await;
    assert_eq!(snap.phase, Phase::Queued);
    assert_eq!(snap.progress, 0);
    assert!(tracker.job_id().await.is_none());
    assert!(tracker.result().await.is_none());
}

#[tokio::test]
async fn confirm_forwards_to_upstream_for_the_current_job() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/generation/status/job-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-7",
            "status": "processing",
            "currentStep": "structure_review",
            "progress": 45
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/generation/confirm/job-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 5);

    // No active job yet: confirmation is refused locally.
    assert!(tracker.confirm_structure().await.is_err());

    tracker.track_existing_job("job-7").await;
    tracker.confirm_structure().await.expect("confirm should succeed");
}

#[tokio::test]
async fn starting_a_new_job_replaces_the_previous_poll() {
    let server = MockServer::start().await;
    mount_start(&server, "job-b").await;

    // The old job would fail if it were still polled; the new one completes.
    Mock::given(method("GET"))
        .and(path("/generation/status/job-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-a",
            "status": "processing",
            "currentStep": "generating",
            "progress": 55
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/generation/status/job-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-b",
            "status": "completed",
            "currentStep": "completed",
            "progress": 100,
            "problemId": "prob-b"
        })))
        .mount(&server)
        .await;

    let tracker = tracker_for(&server, 5);
    tracker.track_existing_job("job-a").await;
    sleep(Duration::from_millis(60)).await;

    let mut events = tracker.subscribe();
    let job_id = tracker.start_generation("struct-b").await;
    assert_eq!(job_id.as_deref(), Some("job-b"));

    wait_for(&mut events, |ev| matches!(ev, TrackerEvent::Completed(_))).await;
    let snap = tracker.snapshot().await;
    assert_eq!(snap.problem_id.as_deref(), Some("prob-b"));
    assert_eq!(tracker.job_id().await.as_deref(), Some("job-b"));
}
