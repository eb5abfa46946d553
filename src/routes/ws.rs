//! WebSocket upgrade + message loop. Tracker events are pushed to the client
//! as they happen; client messages are parsed as JSON and forwarded to the
//! tracker, with a single JSON reply per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;
use crate::tracker::TrackerEvent;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "examtrack_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "examtrack_backend", "WebSocket connected");
  let mut events = state.tracker.subscribe();

  // Push the current snapshot so a late-joining client starts in sync.
  let snapshot = current_state_message(&state).await;
  if send_msg(&mut socket, &snapshot).await.is_err() {
    return;
  }

  loop {
    tokio::select! {
      incoming = socket.recv() => {
        match incoming {
          Some(Ok(Message::Text(txt))) => {
            let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
              Ok(msg) => {
                debug!(target = "examtrack_backend", "WS received: {:?}", &msg);
                handle_client_ws(msg, &state).await
              }
              Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
            };
            if send_msg(&mut socket, &reply).await.is_err() {
              break;
            }
          }
          Some(Ok(Message::Ping(payload))) => { let _ = socket.send(Message::Pong(payload)).await; }
          Some(Ok(Message::Close(_))) | None => break,
          Some(Ok(_)) => {}
          Some(Err(e)) => {
            error!(target: "examtrack_backend", error = %e, "WS receive error");
            break;
          }
        }
      }
      event = events.recv() => {
        match event {
          Ok(ev) => {
            let msg = message_for_event(ev, &state).await;
            if send_msg(&mut socket, &msg).await.is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            // Dropped intermediate updates; resync with a fresh snapshot.
            warn!(target: "examtrack_backend", %skipped, "WS event stream lagged");
            let msg = current_state_message(&state).await;
            if send_msg(&mut socket, &msg).await.is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    }
  }
  info!(target: "examtrack_backend", "WebSocket disconnected");
}

async fn send_msg(socket: &mut WebSocket, msg: &ServerWsMessage) -> Result<(), ()> {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  if let Err(e) = socket.send(Message::Text(out)).await {
    error!(target: "examtrack_backend", error = %e, "WS send error");
    return Err(());
  }
  Ok(())
}

async fn current_state_message(state: &AppState) -> ServerWsMessage {
  ServerWsMessage::State {
    state: state.tracker.snapshot().await,
    job_id: state.tracker.job_id().await,
  }
}

async fn message_for_event(ev: TrackerEvent, state: &AppState) -> ServerWsMessage {
  match ev {
    TrackerEvent::Update(s) => ServerWsMessage::State {
      state: s,
      job_id: state.tracker.job_id().await,
    },
    TrackerEvent::Completed(result) => ServerWsMessage::Completed { result },
    TrackerEvent::Failed { message, error_code } =>
      ServerWsMessage::GenerationError { message, error_code },
    TrackerEvent::StatusFetchFailed { message } =>
      ServerWsMessage::StatusFetchFailed { message },
  }
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::StartGeneration { structure_id } => {
      let job_id = state.tracker.start_generation(&structure_id).await;
      tracing::info!(target: "tracker", %structure_id, job_id = ?job_id, "WS start_generation");
      current_state_message(state).await
    }

    ClientWsMessage::TrackJob { job_id } => {
      state.tracker.track_existing_job(&job_id).await;
      tracing::info!(target: "tracker", %job_id, "WS track_job");
      current_state_message(state).await
    }

    ClientWsMessage::ConfirmStructure => match state.tracker.confirm_structure().await {
      Ok(()) => ServerWsMessage::Confirmed,
      Err(message) => ServerWsMessage::Error { message },
    },

    ClientWsMessage::Reset => {
      state.tracker.reset().await;
      current_state_message(state).await
    }

    ClientWsMessage::GetState => current_state_message(state).await,
  }
}
