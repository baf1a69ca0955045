//! Minimal OpenAI Assistants (v2) client: threads, messages and runs.
//!
//! Calls are instrumented and log thread/run ids, latencies and response sizes
//! (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::domain::{ConversationHandle, ConversationMessage, Role, RunHandle, RunStatus};
use crate::error::{Result, TutorError};
use crate::service::GenerationService;
use crate::util::trunc_for_log;

const ASSISTANTS_BETA: &str = "assistants=v2";

/// After asking for a cancel, how long we wait for the run to let go of its thread.
const CANCEL_SETTLE_POLLS: u32 = 10;
const CANCEL_SETTLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string() })
  }

  fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
    self.client
      .request(method, format!("{}{}", self.base_url, path))
      .header(USER_AGENT, "writing-coach-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .header("OpenAI-Beta", ASSISTANTS_BETA)
  }

  /// Send and decode, mapping non-2xx into a readable error.
  async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
    let start = Instant::now();
    let res = req.send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      warn!(target: "writing_coach", %status, error = %trunc_for_log(&msg, 200), "OpenAI request failed");
      return Err(TutorError::service(format!("OpenAI HTTP {}: {}", status, msg)));
    }

    let bytes = res.bytes().await?;
    debug!(target: "writing_coach", elapsed = ?start.elapsed(), bytes = bytes.len(), "OpenAI response");
    serde_json::from_slice::<T>(&bytes).map_err(|e| TutorError::service(format!("JSON parse error: {}", e)))
  }
}

#[async_trait]
impl GenerationService for OpenAI {
  #[instrument(level = "info", skip(self))]
  async fn open_conversation(&self) -> Result<ConversationHandle> {
    let thread: IdOnly = self
      .send_json(self.request(reqwest::Method::POST, "/threads").json(&serde_json::json!({})))
      .await?;
    info!(target: "writing_coach", thread_id = %thread.id, "Thread created");
    Ok(ConversationHandle(thread.id))
  }

  #[instrument(level = "info", skip_all, fields(thread_id = %conversation, role = role.as_str(), text_len = text.len()))]
  async fn send_message(&self, conversation: &ConversationHandle, role: Role, text: &str) -> Result<()> {
    let body = MessageCreate { role: role.as_str(), content: text };
    let _: IdOnly = self
      .send_json(self.request(reqwest::Method::POST, &format!("/threads/{}/messages", conversation.0)).json(&body))
      .await?;
    Ok(())
  }

  #[instrument(level = "info", skip(self), fields(thread_id = %conversation))]
  async fn start_run(&self, conversation: &ConversationHandle, agent_id: &str) -> Result<RunHandle> {
    if agent_id.is_empty() {
      return Err(TutorError::service("assistant id not configured"));
    }
    let body = RunCreate { assistant_id: agent_id };
    let run: RunObject = self
      .send_json(self.request(reqwest::Method::POST, &format!("/threads/{}/runs", conversation.0)).json(&body))
      .await?;
    info!(target: "writing_coach", run_id = %run.id, status = %run.status, "Run started");
    Ok(RunHandle { conversation: conversation.clone(), id: run.id })
  }

  #[instrument(level = "debug", skip(self), fields(thread_id = %run.conversation, run_id = %run.id))]
  async fn poll_run(&self, run: &RunHandle) -> Result<RunStatus> {
    let obj: RunObject = self
      .send_json(self.request(reqwest::Method::GET, &format!("/threads/{}/runs/{}", run.conversation.0, run.id)))
      .await?;
    debug!(target: "writing_coach", status = %obj.status, "Run polled");
    Ok(map_run_status(&obj))
  }

  #[instrument(level = "info", skip(self), fields(thread_id = %run.conversation, run_id = %run.id))]
  async fn cancel_run(&self, run: &RunHandle) -> Result<()> {
    let path = format!("/threads/{}/runs/{}", run.conversation.0, run.id);
    let mut obj: RunObject = self
      .send_json(self.request(reqwest::Method::POST, &format!("{}/cancel", path)))
      .await?;
    info!(target: "writing_coach", status = %obj.status, "Run cancel requested");

    // A cancelling run still blocks new messages on the thread.
    let mut polls = 0;
    while holds_thread(&obj.status) && polls < CANCEL_SETTLE_POLLS {
      tokio::time::sleep(CANCEL_SETTLE_INTERVAL).await;
      obj = self.send_json(self.request(reqwest::Method::GET, &path)).await?;
      polls += 1;
    }
    if holds_thread(&obj.status) {
      warn!(target: "writing_coach", status = %obj.status, "Run still active after cancel");
    }
    Ok(())
  }

  #[instrument(level = "info", skip(self), fields(thread_id = %conversation))]
  async fn list_messages(&self, conversation: &ConversationHandle) -> Result<Vec<ConversationMessage>> {
    let list: MessageList = self
      .send_json(self.request(
        reqwest::Method::GET,
        &format!("/threads/{}/messages?order=desc&limit=20", conversation.0),
      ))
      .await?;
    // Newest first on the wire; callers expect chronological order.
    let mut messages = list.into_messages();
    messages.reverse();
    Ok(messages)
  }
}

/// Map a remote run status onto pending / completed / failed.
fn map_run_status(run: &RunObject) -> RunStatus {
  match run.status.as_str() {
    "queued" | "in_progress" | "cancelling" => RunStatus::Pending,
    "completed" => RunStatus::Completed,
    other => {
      let detail = run
        .last_error
        .as_ref()
        .map(|e| format!("{}: {}", e.code, e.message))
        .unwrap_or_else(|| other.to_string());
      RunStatus::Failed(detail)
    }
  }
}

/// Statuses during which the thread rejects new messages and runs.
fn holds_thread(status: &str) -> bool {
  matches!(status, "queued" | "in_progress" | "cancelling" | "requires_action")
}

// --- Assistants DTOs ---

#[derive(Deserialize)]
struct IdOnly { id: String }

#[derive(Serialize)]
struct MessageCreate<'a> { role: &'a str, content: &'a str }

#[derive(Serialize)]
struct RunCreate<'a> { assistant_id: &'a str }

#[derive(Deserialize)]
struct RunObject {
  id: String,
  status: String,
  #[serde(default)] last_error: Option<RunError>,
}
#[derive(Deserialize)]
struct RunError {
  #[serde(default)] code: String,
  #[serde(default)] message: String,
}

#[derive(Deserialize)]
struct MessageList { data: Vec<MessageObject> }
#[derive(Deserialize)]
struct MessageObject {
  role: String,
  #[serde(default)] content: Vec<ContentPart>,
}
#[derive(Deserialize)]
struct ContentPart {
  #[serde(rename = "type")] kind: String,
  #[serde(default)] text: Option<TextValue>,
}
#[derive(Deserialize)]
struct TextValue { value: String }

impl MessageList {
  /// Keep text parts only; unknown roles are skipped.
  fn into_messages(self) -> Vec<ConversationMessage> {
    self
      .data
      .into_iter()
      .filter_map(|m| {
        let role = match m.role.as_str() {
          "user" => Role::User,
          "assistant" => Role::Assistant,
          _ => return None,
        };
        let text = m
          .content
          .into_iter()
          .filter(|p| p.kind == "text")
          .filter_map(|p| p.text.map(|t| t.value))
          .collect::<Vec<_>>()
          .join("\n");
        Some(ConversationMessage { role, text })
      })
      .collect()
  }
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
