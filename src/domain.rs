//! Domain models: activity kinds, themes, conversation/run handles, messages
//! and the feedback split applied to writing feedback.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Literal marker separating the narrative feedback from the scored rubric.
pub const SCORE_MARKER: &str = "Score:";

/// Which activity is currently running in a session?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
  /// Nothing started yet.
  #[default]
  None,
  /// Writing challenge, coached by the writing agent.
  Challenge,
  /// Puzzle, run by the puzzle master agent.
  Puzzle,
}

impl ActivityKind {
  /// The kind whose output must be hidden while `self` is active.
  pub fn other(self) -> Option<ActivityKind> {
    match self {
      ActivityKind::Challenge => Some(ActivityKind::Puzzle),
      ActivityKind::Puzzle => Some(ActivityKind::Challenge),
      ActivityKind::None => None,
    }
  }
}

impl fmt::Display for ActivityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ActivityKind::None => write!(f, "none"),
      ActivityKind::Challenge => write!(f, "challenge"),
      ActivityKind::Puzzle => write!(f, "puzzle"),
    }
  }
}

/// A writing theme a challenge is drawn from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
  pub name: String,
  pub description: String,
}

/// Opaque id of an open conversation (an assistants "thread").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationHandle(pub String);

/// Opaque id of one generation run on a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunHandle {
  pub conversation: ConversationHandle,
  pub id: String,
}

impl fmt::Display for ConversationHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Observed state of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
  Pending,
  Completed,
  Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  User,
  Assistant,
}

impl Role {
  pub fn as_str(self) -> &'static str {
    match self {
      Role::User => "user",
      Role::Assistant => "assistant",
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationMessage {
  pub role: Role,
  pub text: String,
}

/// Writing feedback split into the narrative part and the scored rubric.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackSplit {
  pub narrative: String,
  pub rubric: String,
}

/// Split a completion at the first `Score:` (case-sensitive).
/// Without the marker the whole text is narrative and the rubric is empty.
pub fn split_feedback(completion: &str) -> FeedbackSplit {
  match completion.split_once(SCORE_MARKER) {
    Some((narrative, scores)) => FeedbackSplit {
      narrative: narrative.trim().to_string(),
      rubric: format!("{}\n{}", SCORE_MARKER, scores.trim()),
    },
    None => FeedbackSplit { narrative: completion.trim().to_string(), rubric: String::new() },
  }
}

/// Text of the last assistant message, in chronological order.
pub fn last_assistant_text(messages: &[ConversationMessage]) -> Option<&str> {
  messages
    .iter()
    .rev()
    .find(|m| m.role == Role::Assistant)
    .map(|m| m.text.as_str())
}
