//! Loading configuration: prompts + themes from TOML, runtime settings from env.
//!
//! See `AgentConfig`, `Prompts` and `Settings` for the expected schema.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::domain::Theme;
use crate::service::PollPolicy;
use crate::state::SessionLimits;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub themes: Vec<Theme>,
}

/// Prompt templates sent to the assistants. `{placeholders}` are filled with
/// `util::fill_template`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// Placeholders: {theme}, {theme_description}
  pub challenge_template: String,
  pub puzzle_template: String,
  /// Placeholder: {work}
  pub writing_feedback_template: String,
  /// Placeholder: {work}
  pub puzzle_feedback_template: String,
  /// Placeholder: {theme}
  pub theme_banner: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      challenge_template: r#"You are a kind writing coach helping a 12-year-old student.

Today's selected writing theme is: **{theme}** ({theme_description})

Please create a unique, age-appropriate challenge in this theme. Avoid repeating topics like "animals talking" or "magical pets".

The challenge should:
- Encourage creativity and good values
- Include 2–3 simple writing goals (like use WOW words, a strong opening, full sentences)
- Be short and motivating
- End with a cheerful sentence encouraging the student to submit their writing

Only give **one** challenge. Do not give options."#.into(),
      puzzle_template: r#"You are a friendly puzzle master for a 12-year-old student.

Please give **one** age-appropriate puzzle: a riddle, a logic puzzle or a short math brain-teaser.

The puzzle should:
- Be solvable in a few minutes without a calculator
- Be clearly worded, with everything needed to solve it
- End with a short sentence inviting the student to send their answer and explain their thinking

Do NOT reveal the answer."#.into(),
      writing_feedback_template: r#"Here is the student's writing:

{work}

Please give kind and constructive feedback in this format:
- Two things they did well
- Two gentle suggestions for improvement
- One bonus tip
- One ASCII art sticker
- Then end with this labeled section:

Score:

Vocabulary:
Sentence Structure:
Punctuation:
Creativity:
Focus & Clarity:
"#.into(),
      puzzle_feedback_template: r#"Here is the student's answer to the puzzle:

{work}

Please reply kindly:
- Say whether the answer is correct
- Explain the reasoning step by step (if the answer is wrong, guide them without shaming)
- End with one encouraging sentence"#.into(),
      theme_banner: "📝 **Theme: {theme}**\n\n".into(),
    }
  }
}

/// Built-in writing themes, used when the TOML config provides none.
pub fn default_themes() -> Vec<Theme> {
  [
    ("Fiction", "a fun or imaginative story (e.g., magic, adventure, mystery)"),
    ("Non-fiction", "a real story, opinion, or personal reflection"),
    ("Creative Writing", "something like a poem, comic scene, diary entry, or what-if idea"),
  ]
  .into_iter()
  .map(|(name, description)| Theme { name: name.into(), description: description.into() })
  .collect()
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_agent_config(&s) {
      Ok(cfg) => {
        info!(target: "writing_coach", %path, themes = cfg.themes.len(), "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "writing_coach", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "writing_coach", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_agent_config(s: &str) -> Result<AgentConfig, toml::de::Error> {
  toml::from_str::<AgentConfig>(s)
}

/// Themes from config, or the defaults if the configured set is empty.
pub fn themes_or_default(cfg: Option<&AgentConfig>) -> Vec<Theme> {
  match cfg {
    Some(c) if !c.themes.is_empty() => c.themes.clone(),
    Some(_) => {
      warn!(target: "writing_coach", "Config has no themes; using built-in themes");
      default_themes()
    }
    None => default_themes(),
  }
}

/// Runtime settings read from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
  pub writing_coach_id: String,
  pub puzzle_master_id: String,
  pub access_pin: Option<String>,
  pub poll: PollPolicy,
  pub sessions: SessionLimits,
}

impl Settings {
  pub fn from_env() -> Self {
    let env_nonempty = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
    let env_num = |k: &str| std::env::var(k).ok().and_then(|v| v.trim().parse::<u64>().ok());

    let defaults = PollPolicy::default();
    let poll = PollPolicy {
      interval: env_num("POLL_INTERVAL_MS").map(Duration::from_millis).unwrap_or(defaults.interval),
      max_attempts: env_num("POLL_MAX_ATTEMPTS")
        .map(|n| n.clamp(1, u32::MAX as u64) as u32)
        .unwrap_or(defaults.max_attempts),
      max_wait: env_num("POLL_MAX_WAIT_SECS").map(Duration::from_secs).unwrap_or(defaults.max_wait),
    };

    let session_defaults = SessionLimits::default();
    let sessions = SessionLimits {
      idle_ttl: env_num("SESSION_IDLE_TTL_SECS").map(Duration::from_secs).unwrap_or(session_defaults.idle_ttl),
      max_sessions: env_num("MAX_SESSIONS")
        .map(|n| n.max(1) as usize)
        .unwrap_or(session_defaults.max_sessions),
    };

    let writing_coach_id = env_nonempty("WRITING_COACH_ASSISTANT_ID").unwrap_or_default();
    let puzzle_master_id = env_nonempty("PUZZLE_MASTER_ASSISTANT_ID").unwrap_or_default();
    if writing_coach_id.is_empty() || puzzle_master_id.is_empty() {
      warn!(target: "writing_coach", "WRITING_COACH_ASSISTANT_ID / PUZZLE_MASTER_ASSISTANT_ID not fully set; runs will fail");
    }

    let access_pin = env_nonempty("ACCESS_PIN");
    if access_pin.is_none() {
      warn!(target: "writing_coach", "ACCESS_PIN not set; sessions start unlocked");
    }

    Self { writing_coach_id, puzzle_master_id, access_pin, poll, sessions }
  }
}
