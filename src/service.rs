//! Generation service seam and the run-completion waiter.
//!
//! A message sent on a conversation triggers an asynchronous run on the remote
//! service. `await_completion` starts the run, polls it at a fixed interval
//! until it is terminal, then reads the newest assistant message.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::domain::{last_assistant_text, ConversationHandle, ConversationMessage, Role, RunHandle, RunStatus};
use crate::error::{Result, TutorError};

/// Remote assistant API: conversations, messages and runs.
#[async_trait]
pub trait GenerationService: Send + Sync {
  async fn open_conversation(&self) -> Result<ConversationHandle>;

  async fn send_message(&self, conversation: &ConversationHandle, role: Role, text: &str) -> Result<()>;

  async fn start_run(&self, conversation: &ConversationHandle, agent_id: &str) -> Result<RunHandle>;

  async fn poll_run(&self, run: &RunHandle) -> Result<RunStatus>;

  /// Stop a run that is still going. While a run is active the conversation
  /// accepts no new messages.
  async fn cancel_run(&self, run: &RunHandle) -> Result<()>;

  /// Messages in chronological order (oldest first).
  async fn list_messages(&self, conversation: &ConversationHandle) -> Result<Vec<ConversationMessage>>;
}

/// Bounds on the polling loop.
#[derive(Clone, Debug)]
pub struct PollPolicy {
  pub interval: Duration,
  pub max_attempts: u32,
  pub max_wait: Duration,
}

impl Default for PollPolicy {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(1),
      max_attempts: 120,
      max_wait: Duration::from_secs(120),
    }
  }
}

/// Cancellation signal for a wait. `never()` is used where no caller can abandon
/// the request.
#[derive(Clone, Debug)]
pub struct CancelToken(Option<watch::Receiver<bool>>);

impl CancelToken {
  pub fn new() -> (watch::Sender<bool>, Self) {
    let (tx, rx) = watch::channel(false);
    (tx, Self(Some(rx)))
  }

  pub fn never() -> Self {
    Self(None)
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
  }

  /// Resolves once cancellation is requested. A dropped sender never cancels.
  async fn cancelled(&mut self) {
    if let Some(rx) = &mut self.0 {
      loop {
        if *rx.borrow_and_update() {
          return;
        }
        if rx.changed().await.is_err() {
          break;
        }
      }
    }
    std::future::pending::<()>().await
  }
}

/// Start a run for `agent_id` on `conversation`, wait for it, return the reply.
#[instrument(level = "info", skip_all, fields(conversation = %conversation, %agent_id))]
pub async fn await_completion(
  service: &dyn GenerationService,
  conversation: &ConversationHandle,
  agent_id: &str,
  policy: &PollPolicy,
  cancel: &mut CancelToken,
) -> Result<String> {
  if cancel.is_cancelled() {
    return Err(TutorError::Cancelled);
  }

  let run = service.start_run(conversation, agent_id).await?;
  match wait_for_run(service, &run, policy, cancel).await {
    Ok(RunStatus::Failed(reason)) => {
      return Err(TutorError::service(format!("run {} failed: {}", run.id, reason)));
    }
    Ok(_) => {}
    Err(e) => {
      // The run may still hold the conversation; release it so a retry can post.
      abandon_run(service, &run).await;
      return Err(e);
    }
  }

  let messages = service.list_messages(conversation).await?;
  last_assistant_text(&messages)
    .map(str::to_string)
    .ok_or_else(|| TutorError::service("the assistant did not reply"))
}

/// Poll `run` until it reaches a terminal status (`Completed` or `Failed`).
async fn wait_for_run(
  service: &dyn GenerationService,
  run: &RunHandle,
  policy: &PollPolicy,
  cancel: &mut CancelToken,
) -> Result<RunStatus> {
  let started = Instant::now();
  let mut attempts: u32 = 0;

  loop {
    if cancel.is_cancelled() {
      warn!(target: "tutor", run_id = %run.id, attempts, "Wait cancelled");
      return Err(TutorError::Cancelled);
    }

    attempts += 1;
    match service.poll_run(run).await? {
      RunStatus::Pending => {}
      RunStatus::Completed => {
        debug!(target: "tutor", run_id = %run.id, attempts, elapsed = ?started.elapsed(), "Run completed");
        return Ok(RunStatus::Completed);
      }
      failed => return Ok(failed),
    }

    let waited = started.elapsed();
    if attempts >= policy.max_attempts || waited + policy.interval > policy.max_wait {
      warn!(target: "tutor", run_id = %run.id, attempts, ?waited, "Run did not finish in time");
      return Err(TutorError::Timeout { attempts, waited });
    }

    tokio::select! {
      _ = tokio::time::sleep(policy.interval) => {}
      _ = cancel.cancelled() => {
        warn!(target: "tutor", run_id = %run.id, attempts, "Wait cancelled");
        return Err(TutorError::Cancelled);
      }
    }
  }
}

/// Best-effort cancel of a run we stopped waiting for.
async fn abandon_run(service: &dyn GenerationService, run: &RunHandle) {
  match service.cancel_run(run).await {
    Ok(()) => info!(target: "tutor", run_id = %run.id, "Abandoned run cancelled"),
    Err(e) => warn!(target: "tutor", run_id = %run.id, error = %e, "Could not cancel abandoned run"),
  }
}

/// Stand-in used when no API key is configured: every call fails with a
/// service error so the UI can show what is missing.
pub struct UnavailableService {
  pub reason: String,
}

#[async_trait]
impl GenerationService for UnavailableService {
  async fn open_conversation(&self) -> Result<ConversationHandle> {
    Err(TutorError::service(self.reason.clone()))
  }

  async fn send_message(&self, _: &ConversationHandle, _: Role, _: &str) -> Result<()> {
    Err(TutorError::service(self.reason.clone()))
  }

  async fn start_run(&self, _: &ConversationHandle, _: &str) -> Result<RunHandle> {
    Err(TutorError::service(self.reason.clone()))
  }

  async fn poll_run(&self, _: &RunHandle) -> Result<RunStatus> {
    Err(TutorError::service(self.reason.clone()))
  }

  async fn cancel_run(&self, _: &RunHandle) -> Result<()> {
    Err(TutorError::service(self.reason.clone()))
  }

  async fn list_messages(&self, _: &ConversationHandle) -> Result<Vec<ConversationMessage>> {
    Err(TutorError::service(self.reason.clone()))
  }
}


#[cfg(test)]
mod tests {
  use super::mock::{Reply, ScriptedService};
  use super::*;

  fn fast_policy() -> PollPolicy {
    PollPolicy { interval: Duration::from_millis(1), max_attempts: 5, max_wait: Duration::from_secs(5) }
  }

  #[tokio::test]
  async fn polls_until_completed_then_reads_last_assistant_message() {
    let svc = ScriptedService::with_replies(["hello there"]);
    svc.set_pending_polls(3);
    let conv = svc.open_conversation().await.unwrap();
    svc.send_message(&conv, Role::User, "hi").await.unwrap();

    let reply = await_completion(&svc, &conv, "asst_1", &fast_policy(), &mut CancelToken::never())
      .await
      .unwrap();
    assert_eq!(reply, "hello there");
    assert_eq!(svc.agents(), vec!["asst_1".to_string()]);
    assert!(svc.cancelled_runs().is_empty());
  }

  #[tokio::test]
  async fn failed_run_is_a_service_error() {
    let svc = ScriptedService::new();
    svc.push(Reply::Fail("rate_limit_exceeded".into()));
    let conv = svc.open_conversation().await.unwrap();

    let err = await_completion(&svc, &conv, "a", &fast_policy(), &mut CancelToken::never())
      .await
      .unwrap_err();
    assert!(matches!(err, TutorError::Service(ref m) if m.contains("rate_limit_exceeded")));
  }

  #[tokio::test]
  async fn run_that_never_finishes_times_out_after_max_attempts() {
    let svc = ScriptedService::new();
    svc.push(Reply::Never);
    let conv = svc.open_conversation().await.unwrap();

    let err = await_completion(&svc, &conv, "a", &fast_policy(), &mut CancelToken::never())
      .await
      .unwrap_err();
    assert!(matches!(err, TutorError::Timeout { attempts: 5, .. }));
  }

  #[tokio::test]
  async fn timed_out_run_is_cancelled_so_the_conversation_accepts_messages_again() {
    let svc = ScriptedService::new();
    svc.push(Reply::Never);
    let conv = svc.open_conversation().await.unwrap();
    svc.send_message(&conv, Role::User, "first try").await.unwrap();

    let err = await_completion(&svc, &conv, "a", &fast_policy(), &mut CancelToken::never())
      .await
      .unwrap_err();
    assert!(matches!(err, TutorError::Timeout { .. }));
    assert_eq!(svc.cancelled_runs().len(), 1);

    svc.push(Reply::Text("got it".into()));
    svc.send_message(&conv, Role::User, "second try").await.unwrap();
    let reply = await_completion(&svc, &conv, "a", &fast_policy(), &mut CancelToken::never())
      .await
      .unwrap();
    assert_eq!(reply, "got it");
  }

  #[tokio::test]
  async fn active_run_blocks_new_messages() {
    let svc = ScriptedService::new();
    svc.push(Reply::Never);
    let conv = svc.open_conversation().await.unwrap();
    let run = svc.start_run(&conv, "a").await.unwrap();

    assert!(svc.send_message(&conv, Role::User, "too early").await.is_err());
    svc.cancel_run(&run).await.unwrap();
    svc.send_message(&conv, Role::User, "now").await.unwrap();
    assert!(svc.cancel_run(&run).await.is_err());
  }

  #[tokio::test]
  async fn max_wait_bounds_the_loop() {
    let svc = ScriptedService::new();
    svc.push(Reply::Never);
    let conv = svc.open_conversation().await.unwrap();
    let policy = PollPolicy {
      interval: Duration::from_millis(20),
      max_attempts: u32::MAX,
      max_wait: Duration::from_millis(50),
    };

    let err = await_completion(&svc, &conv, "a", &policy, &mut CancelToken::never())
      .await
      .unwrap_err();
    assert!(matches!(err, TutorError::Timeout { .. }));
  }

  #[tokio::test]
  async fn cancellation_interrupts_the_wait() {
    let svc = ScriptedService::new();
    svc.push(Reply::Never);
    let conv = svc.open_conversation().await.unwrap();
    let policy = PollPolicy {
      interval: Duration::from_secs(30),
      max_attempts: 100,
      max_wait: Duration::from_secs(600),
    };
    let (tx, mut token) = CancelToken::new();

    let cancel = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      let _ = tx.send(true);
      tx
    });
    let err = await_completion(&svc, &conv, "a", &policy, &mut token).await.unwrap_err();
    assert!(matches!(err, TutorError::Cancelled));
    assert_eq!(svc.cancelled_runs().len(), 1);
    let _ = cancel.await;
  }

  #[tokio::test]
  async fn missing_assistant_reply_is_a_service_error() {
    struct Silent;
    #[async_trait]
    impl GenerationService for Silent {
      async fn open_conversation(&self) -> Result<ConversationHandle> {
        Ok(ConversationHandle("t".into()))
      }
      async fn send_message(&self, _: &ConversationHandle, _: Role, _: &str) -> Result<()> {
        Ok(())
      }
      async fn start_run(&self, c: &ConversationHandle, _: &str) -> Result<RunHandle> {
        Ok(RunHandle { conversation: c.clone(), id: "r".into() })
      }
      async fn poll_run(&self, _: &RunHandle) -> Result<RunStatus> {
        Ok(RunStatus::Completed)
      }
      async fn cancel_run(&self, _: &RunHandle) -> Result<()> {
        Ok(())
      }
      async fn list_messages(&self, _: &ConversationHandle) -> Result<Vec<ConversationMessage>> {
        Ok(vec![ConversationMessage { role: Role::User, text: "only me".into() }])
      }
    }

    let conv = ConversationHandle("t".into());
    let err = await_completion(&Silent, &conv, "a", &fast_policy(), &mut CancelToken::never())
      .await
      .unwrap_err();
    assert!(matches!(err, TutorError::Service(_)));
  }
}
