//! WebSocket upgrade + message loop. Each connection owns one tutoring session.
//! Each client message is parsed as JSON and forwarded to core logic; we reply
//! with a single JSON message per request.
//!
//! While a request waits on the assistant we keep reading the socket: a close
//! cancels the wait, other messages are queued and handled afterwards.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::logic::*;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::service::CancelToken;
use crate::session::TutoringSession;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "writing_coach", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "writing_coach", "WebSocket connected");
  let mut session = state.new_session();
  let mut queued: VecDeque<Message> = VecDeque::new();

  loop {
    let msg = match queued.pop_front() {
      Some(m) => m,
      None => match socket.recv().await {
        Some(Ok(m)) => m,
        _ => break,
      },
    };

    match msg {
      Message::Text(txt) => {
        let incoming = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => incoming,
          Err(e) => {
            let reply = ServerWsMessage::Error { kind: "invalid_json".into(), message: format!("Invalid JSON: {}", e) };
            if send_json(&mut socket, &reply).await.is_err() { break; }
            continue;
          }
        };
        debug!(target: "writing_coach", msg_type = incoming.label(), "WS received");

        let (cancel_tx, mut cancel) = CancelToken::new();
        let work = handle_client_ws(incoming, &state, &mut session, &mut cancel);
        let (reply_msg, went_away) = drive_request(work, &mut socket, &cancel_tx, &mut queued).await;

        if went_away { break; }
        if let Err(e) = send_json(&mut socket, &reply_msg).await {
          error!(target: "writing_coach", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "writing_coach", "WebSocket disconnected");
}

/// Source of client frames. Lets the request driver run against a socket or a
/// plain channel.
#[async_trait]
trait Inbound: Send {
  async fn next_message(&mut self) -> Option<Result<Message, axum::Error>>;
}

#[async_trait]
impl Inbound for WebSocket {
  async fn next_message(&mut self) -> Option<Result<Message, axum::Error>> {
    self.recv().await
  }
}

/// Run `work` to completion while still reading the client. A close or read
/// error cancels the wait; anything else is queued for after the reply.
/// Returns the reply and whether the client went away.
async fn drive_request<I, F>(
  work: F,
  inbound: &mut I,
  cancel_tx: &watch::Sender<bool>,
  queued: &mut VecDeque<Message>,
) -> (ServerWsMessage, bool)
where
  I: Inbound,
  F: Future<Output = ServerWsMessage>,
{
  tokio::pin!(work);
  let mut went_away = false;
  loop {
    tokio::select! {
      reply = &mut work => return (reply, went_away),
      next = inbound.next_message(), if !went_away => match next {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
          warn!(target: "writing_coach", "Client went away mid-request; cancelling");
          went_away = true;
          let _ = cancel_tx.send(true);
        }
        Some(Ok(other)) => queued.push_back(other),
      },
    }
  }
}

async fn send_json(socket: &mut WebSocket, msg: &ServerWsMessage) -> Result<(), axum::Error> {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "kind": "serialization", "message": format!("Serialization error: {}", e) }).to_string()
  });
  socket.send(Message::Text(out)).await
}

#[instrument(level = "info", skip_all)]
async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &AppState,
  session: &mut TutoringSession,
  cancel: &mut CancelToken,
) -> ServerWsMessage {
  let result = match msg {
    ClientWsMessage::Ping => return ServerWsMessage::Pong,
    ClientWsMessage::View => Ok(session.view()),
    ClientWsMessage::Unlock { pin } => do_unlock(state, session, &pin),
    ClientWsMessage::StartActivity { kind } => {
      let r = do_start(state, session, kind, cancel).await;
      if r.is_ok() {
        info!(target: "tutor", %kind, "WS activity started");
      }
      r
    }
    ClientWsMessage::SubmitWork { text } => do_submit(state, session, &text, cancel).await,
  };

  match result {
    Ok(view) => ServerWsMessage::View { view },
    Err(e) => ServerWsMessage::from(&e),
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use tokio::sync::mpsc;

  use super::*;
  use crate::config::{default_themes, Prompts};
  use crate::domain::ActivityKind;
  use crate::service::mock::{Reply, ScriptedService};
  use crate::service::PollPolicy;
  use crate::session::{Agents, Tutor};

  #[async_trait]
  impl Inbound for mpsc::Receiver<Message> {
    async fn next_message(&mut self) -> Option<Result<Message, axum::Error>> {
      self.recv().await.map(Ok)
    }
  }

  /// Polls slowly enough that only a cancel can end a run that never finishes.
  fn patient_state(service: Arc<ScriptedService>) -> AppState {
    AppState::with_tutor(Tutor {
      service,
      prompts: Prompts::default(),
      themes: default_themes(),
      agents: Agents { writing_coach: "asst_writer".into(), puzzle_master: "asst_puzzle".into() },
      poll: PollPolicy { interval: Duration::from_secs(30), max_attempts: 100, max_wait: Duration::from_secs(600) },
      access_pin: None,
    })
  }

  #[tokio::test]
  async fn close_during_start_cancels_the_wait_and_leaves_the_session_untouched() {
    let svc = Arc::new(ScriptedService::new());
    svc.push(Reply::Never);
    let state = patient_state(svc);
    let mut session = state.new_session();

    let (tx, mut rx) = mpsc::channel(4);
    tx.send(Message::Text(r#"{"type":"view"}"#.into())).await.unwrap();
    tx.send(Message::Close(None)).await.unwrap();

    let (cancel_tx, mut cancel) = CancelToken::new();
    let mut queued = VecDeque::new();
    let work = handle_client_ws(
      ClientWsMessage::StartActivity { kind: ActivityKind::Puzzle },
      &state,
      &mut session,
      &mut cancel,
    );
    let (reply, went_away) = tokio::time::timeout(
      Duration::from_secs(5),
      drive_request(work, &mut rx, &cancel_tx, &mut queued),
    )
    .await
    .expect("cancel should end the wait");

    assert!(went_away);
    assert!(matches!(reply, ServerWsMessage::Error { ref kind, .. } if kind == "cancelled"));
    assert_eq!(queued.len(), 1);
    assert_eq!(session.active_kind(), ActivityKind::None);
    assert!(session.handle(ActivityKind::Puzzle).is_none());
    assert_eq!(session.view().prompt, None);
  }

  #[tokio::test]
  async fn reply_is_returned_while_the_client_stays_connected() {
    let svc = Arc::new(ScriptedService::with_replies(["riddle"]));
    let state = patient_state(svc);
    let mut session = state.new_session();

    let (_tx, mut rx) = mpsc::channel::<Message>(4);
    let (cancel_tx, mut cancel) = CancelToken::new();
    let mut queued = VecDeque::new();
    let work = handle_client_ws(
      ClientWsMessage::StartActivity { kind: ActivityKind::Puzzle },
      &state,
      &mut session,
      &mut cancel,
    );
    let (reply, went_away) = drive_request(work, &mut rx, &cancel_tx, &mut queued).await;

    assert!(!went_away);
    assert!(matches!(reply, ServerWsMessage::View { ref view } if view.prompt.as_deref() == Some("riddle")));
    assert!(queued.is_empty());
  }
}
