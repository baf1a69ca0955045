//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - the session gate check in front of every activity operation
//!   - picking a topic (random theme for challenges) and starting an activity
//!   - submitting work for feedback
//!
//! Each returns the refreshed view on success.

use rand::thread_rng;
use tracing::{info, instrument, warn};

use crate::domain::ActivityKind;
use crate::error::{Result, TutorError};
use crate::service::CancelToken;
use crate::session::{select_topic, SessionView, TutoringSession};
use crate::state::AppState;

fn ensure_unlocked(session: &TutoringSession) -> Result<()> {
  if session.is_unlocked() { Ok(()) } else { Err(TutorError::GateRejected) }
}

#[instrument(level = "info", skip_all)]
pub fn do_unlock(state: &AppState, session: &mut TutoringSession, pin: &str) -> Result<SessionView> {
  session.unlock(pin, state.tutor.access_pin.as_deref())?;
  Ok(session.view())
}

#[instrument(level = "info", skip_all, fields(%kind))]
pub async fn do_start(
  state: &AppState,
  session: &mut TutoringSession,
  kind: ActivityKind,
  cancel: &mut CancelToken,
) -> Result<SessionView> {
  ensure_unlocked(session)?;
  let tutor = state.tutor.as_ref();
  let topic = select_topic(kind, &tutor.prompts, &tutor.themes, &mut thread_rng())?;
  let theme = topic.theme.as_ref().map(|t| t.name.clone()).unwrap_or_default();

  match session.start_activity(tutor, topic, cancel).await {
    Ok(()) => {
      let conversation = session.handle(kind).map(|h| h.0.clone()).unwrap_or_default();
      info!(target: "tutor", %kind, %theme, %conversation, "Activity ready");
      Ok(session.view())
    }
    Err(e) => {
      warn!(target: "tutor", %kind, error = %e, "Starting activity failed");
      Err(e)
    }
  }
}

#[instrument(level = "info", skip_all, fields(text_len = text.len()))]
pub async fn do_submit(
  state: &AppState,
  session: &mut TutoringSession,
  text: &str,
  cancel: &mut CancelToken,
) -> Result<SessionView> {
  ensure_unlocked(session)?;
  match session.submit_work(state.tutor.as_ref(), text, cancel).await {
    Ok(()) => {
      let kind = session.active_kind();
      info!(
        target: "tutor",
        %kind,
        reply_len = session.last_output(kind).map(str::len).unwrap_or(0),
        has_rubric = session.feedback().map(|f| !f.rubric.is_empty()).unwrap_or(false),
        "Feedback ready"
      );
      Ok(session.view())
    }
    Err(e) if e.is_warning() => {
      info!(target: "tutor", kind = e.kind(), "Submission rejected");
      Err(e)
    }
    Err(e) => {
      warn!(target: "tutor", error = %e, "Submitting work failed");
      Err(e)
    }
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use std::sync::Arc;
  use std::time::Duration;

  use crate::config::{default_themes, Prompts};
  use crate::service::mock::ScriptedService;
  use crate::service::PollPolicy;
  use crate::session::{Agents, Tutor};
  use crate::state::AppState;

  pub fn app_state(service: Arc<ScriptedService>, pin: Option<&str>) -> AppState {
    AppState::with_tutor(Tutor {
      service,
      prompts: Prompts::default(),
      themes: default_themes(),
      agents: Agents { writing_coach: "asst_writer".into(), puzzle_master: "asst_puzzle".into() },
      poll: PollPolicy { interval: Duration::from_millis(1), max_attempts: 10, max_wait: Duration::from_secs(5) },
      access_pin: pin.map(str::to_string),
    })
  }
}
