//! Tutoring session controller: the turn protocol.
//!
//! A session tracks which activity is active (challenge or puzzle), owns one
//! conversation per activity kind, and turns "submit work" into a feedback
//! request on the active conversation.
//!
//! Restart semantics: a new conversation replaces the old one for that kind only
//! after open + send + run all succeeded. On failure the previous handle, the
//! active kind and every stored output are left as they were.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::Prompts;
use crate::domain::{split_feedback, ActivityKind, ConversationHandle, FeedbackSplit, Role, Theme};
use crate::error::{Result, TutorError};
use crate::service::{await_completion, CancelToken, GenerationService, PollPolicy};
use crate::util::{constant_time_eq, fill_template};

/// Assistant ids for the two personas.
#[derive(Clone, Debug, Default)]
pub struct Agents {
  pub writing_coach: String,
  pub puzzle_master: String,
}

impl Agents {
  pub fn for_kind(&self, kind: ActivityKind) -> &str {
    match kind {
      ActivityKind::Puzzle => &self.puzzle_master,
      _ => &self.writing_coach,
    }
  }
}

/// Everything a session needs that is shared process-wide and read-only.
pub struct Tutor {
  pub service: Arc<dyn GenerationService>,
  pub prompts: Prompts,
  pub themes: Vec<Theme>,
  pub agents: Agents,
  pub poll: PollPolicy,
  pub access_pin: Option<String>,
}

/// The opening prompt of an activity, chosen before any network call.
#[derive(Clone, Debug)]
pub struct Topic {
  pub kind: ActivityKind,
  pub prompt: String,
  pub theme: Option<Theme>,
}

/// Build the opening prompt for `kind`. Challenges draw one theme uniformly at random.
pub fn select_topic<R: Rng + ?Sized>(
  kind: ActivityKind,
  prompts: &Prompts,
  themes: &[Theme],
  rng: &mut R,
) -> Result<Topic> {
  match kind {
    ActivityKind::Challenge => {
      let theme = themes
        .choose(rng)
        .cloned()
        .ok_or_else(|| TutorError::InvalidActivity("challenge (no themes configured)".into()))?;
      let prompt = fill_template(
        &prompts.challenge_template,
        &[("theme", &theme.name), ("theme_description", &theme.description)],
      );
      Ok(Topic { kind, prompt, theme: Some(theme) })
    }
    ActivityKind::Puzzle => Ok(Topic { kind, prompt: prompts.puzzle_template.clone(), theme: None }),
    ActivityKind::None => Err(TutorError::InvalidActivity(kind.to_string())),
  }
}

/// What the page shows for a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
  pub unlocked: bool,
  pub active_kind: ActivityKind,
  pub theme: Option<String>,
  /// Opening output of the active activity (challenge text or puzzle).
  pub prompt: Option<String>,
  pub feedback: Option<FeedbackSplit>,
  /// Latest raw reply to a puzzle answer.
  pub reply: Option<String>,
}

#[derive(Debug, Default)]
pub struct TutoringSession {
  unlocked: bool,
  active_kind: ActivityKind,
  handles: HashMap<ActivityKind, ConversationHandle>,
  /// Output of the turn that opened each activity.
  openings: HashMap<ActivityKind, String>,
  /// Latest completion to a submission, per kind.
  replies: HashMap<ActivityKind, String>,
  feedback: Option<FeedbackSplit>,
  selected_theme: Option<Theme>,
}

impl TutoringSession {
  /// A fresh session. The gate starts open when no PIN is configured.
  pub fn new(access_pin: Option<&str>) -> Self {
    Self { unlocked: access_pin.is_none(), ..Default::default() }
  }

  pub fn is_unlocked(&self) -> bool {
    self.unlocked
  }

  pub fn active_kind(&self) -> ActivityKind {
    self.active_kind
  }

  pub fn handle(&self, kind: ActivityKind) -> Option<&ConversationHandle> {
    self.handles.get(&kind)
  }

  /// Most recent completion for `kind`, whichever turn produced it.
  pub fn last_output(&self, kind: ActivityKind) -> Option<&str> {
    self.replies.get(&kind).or_else(|| self.openings.get(&kind)).map(String::as_str)
  }

  pub fn feedback(&self) -> Option<&FeedbackSplit> {
    self.feedback.as_ref()
  }

  /// Compare `pin` against the shared secret. Once open, the gate stays open.
  pub fn unlock(&mut self, pin: &str, expected: Option<&str>) -> Result<()> {
    if self.unlocked {
      return Ok(());
    }
    match expected {
      Some(secret) if constant_time_eq(pin.trim(), secret) => {
        self.unlocked = true;
        info!(target: "tutor", "Session unlocked");
        Ok(())
      }
      Some(_) => {
        warn!(target: "tutor", "Wrong PIN");
        Err(TutorError::GateRejected)
      }
      None => {
        self.unlocked = true;
        Ok(())
      }
    }
  }

  /// Open a fresh conversation for `topic.kind`, send the opening prompt and wait
  /// for the assistant's reply.
  #[instrument(level = "info", skip_all, fields(kind = %topic.kind, theme = topic.theme.as_ref().map(|t| t.name.as_str()).unwrap_or("")))]
  pub async fn start_activity(&mut self, tutor: &Tutor, topic: Topic, cancel: &mut CancelToken) -> Result<()> {
    let kind = topic.kind;
    if kind == ActivityKind::None {
      return Err(TutorError::InvalidActivity(kind.to_string()));
    }

    let service = tutor.service.as_ref();
    let conversation = service.open_conversation().await?;
    service.send_message(&conversation, Role::User, &topic.prompt).await?;
    let completion =
      await_completion(service, &conversation, tutor.agents.for_kind(kind), &tutor.poll, cancel).await?;

    let opening = match &topic.theme {
      Some(theme) => format!("{}{}", fill_template(&tutor.prompts.theme_banner, &[("theme", &theme.name)]), completion),
      None => completion,
    };

    if let Some(old) = self.handles.insert(kind, conversation.clone()) {
      info!(target: "tutor", %kind, old = %old, new = %conversation, "Replaced conversation");
    }
    self.active_kind = kind;
    self.openings.insert(kind, opening);
    self.replies.remove(&kind);
    if let Some(other) = kind.other() {
      self.openings.remove(&other);
      self.replies.remove(&other);
    }
    self.feedback = None;
    self.selected_theme = topic.theme;

    info!(target: "tutor", %kind, conversation = %conversation, "Activity started");
    Ok(())
  }

  /// Send the student's work on the active conversation and store the feedback.
  #[instrument(level = "info", skip_all, fields(kind = %self.active_kind, text_len = user_text.len()))]
  pub async fn submit_work(&mut self, tutor: &Tutor, user_text: &str, cancel: &mut CancelToken) -> Result<()> {
    if user_text.trim().is_empty() {
      return Err(TutorError::EmptySubmission);
    }

    let kind = self.active_kind;
    let conversation = match self.handles.get(&kind) {
      Some(h) if kind != ActivityKind::None => h.clone(),
      _ => return Err(TutorError::NoActiveActivity),
    };

    let template = match kind {
      ActivityKind::Puzzle => &tutor.prompts.puzzle_feedback_template,
      _ => &tutor.prompts.writing_feedback_template,
    };
    let message = fill_template(template, &[("work", user_text)]);

    let service = tutor.service.as_ref();
    service.send_message(&conversation, Role::User, &message).await?;
    let completion =
      await_completion(service, &conversation, tutor.agents.for_kind(kind), &tutor.poll, cancel).await?;

    if kind == ActivityKind::Challenge {
      let split = split_feedback(&completion);
      info!(target: "tutor", has_rubric = !split.rubric.is_empty(), "Writing feedback received");
      self.feedback = Some(split);
    }
    self.replies.insert(kind, completion);
    Ok(())
  }

  pub fn view(&self) -> SessionView {
    if !self.unlocked {
      return SessionView::default();
    }
    let kind = self.active_kind;
    SessionView {
      unlocked: true,
      active_kind: kind,
      theme: match kind {
        ActivityKind::Challenge => self.selected_theme.as_ref().map(|t| t.name.clone()),
        _ => None,
      },
      prompt: self.openings.get(&kind).cloned(),
      feedback: match kind {
        ActivityKind::Challenge => self.feedback.clone(),
        _ => None,
      },
      reply: match kind {
        ActivityKind::Puzzle => self.replies.get(&kind).cloned(),
        _ => None,
      },
    }
  }
}
