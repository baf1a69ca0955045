//! Error taxonomy for tutoring sessions.
//!
//! Every variant is recoverable: the user can retry the action that produced it.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, TutorError>;

#[derive(Debug, thiserror::Error)]
pub enum TutorError {
  /// Wrong PIN on the session gate.
  #[error("Wrong PIN. Please try again.")]
  GateRejected,

  /// Blank or whitespace-only submission.
  #[error("Please write something before submitting.")]
  EmptySubmission,

  /// Submit before any activity was started.
  #[error("Please start a challenge or a puzzle first.")]
  NoActiveActivity,

  /// StartActivity called with a kind that cannot be started.
  #[error("Cannot start activity '{0}'")]
  InvalidActivity(String),

  #[error("Unknown session: {0}")]
  UnknownSession(String),

  /// Network/API failure while opening, sending, polling or fetching.
  #[error("Generation service error: {0}")]
  Service(String),

  /// The run did not reach a terminal state within the polling bounds.
  #[error("Timed out waiting for a reply after {attempts} polls ({waited:?})")]
  Timeout { attempts: u32, waited: Duration },

  /// The wait was abandoned by the caller (e.g. the page was closed).
  #[error("Request cancelled")]
  Cancelled,
}

impl TutorError {
  pub fn service(message: impl Into<String>) -> Self {
    Self::Service(message.into())
  }

  /// Rejections of user input, shown as warnings rather than error banners.
  pub const fn is_warning(&self) -> bool {
    matches!(self, Self::EmptySubmission | Self::NoActiveActivity)
  }

  /// Stable machine-readable kind for the wire protocol.
  pub const fn kind(&self) -> &'static str {
    match self {
      Self::GateRejected => "gate_rejected",
      Self::EmptySubmission => "empty_submission",
      Self::NoActiveActivity => "no_active_activity",
      Self::InvalidActivity(_) => "invalid_activity",
      Self::UnknownSession(_) => "unknown_session",
      Self::Service(_) => "service_error",
      Self::Timeout { .. } => "timeout",
      Self::Cancelled => "cancelled",
    }
  }
}

impl From<reqwest::Error> for TutorError {
  fn from(e: reqwest::Error) -> Self {
    Self::Service(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn warnings_are_only_input_rejections() {
    assert!(TutorError::EmptySubmission.is_warning());
    assert!(TutorError::NoActiveActivity.is_warning());
    assert!(!TutorError::GateRejected.is_warning());
    assert!(!TutorError::service("boom").is_warning());
    assert!(!TutorError::Cancelled.is_warning());
  }

  #[test]
  fn timeout_is_distinct_from_service_error() {
    let t = TutorError::Timeout { attempts: 3, waited: Duration::from_secs(3) };
    assert_eq!(t.kind(), "timeout");
    assert!(t.to_string().contains("3 polls"));
    assert_eq!(TutorError::service("x").kind(), "service_error");
  }

  #[test]
  fn service_message_is_surfaced_verbatim() {
    let e = TutorError::service("OpenAI HTTP 401: Incorrect API key");
    assert!(e.to_string().ends_with("OpenAI HTTP 401: Incorrect API key"));
  }
}
