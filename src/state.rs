//! Application state: the shared tutor (service client, prompts, themes,
//! agent ids, poll policy, PIN) and the per-session store.
//!
//! Sessions are isolated from each other. Each one sits behind its own mutex so
//! requests for the same session run one at a time and the messages on each
//! conversation stay strictly ordered.
//!
//! Sessions idle for longer than `SessionLimits::idle_ttl` are dropped, and the
//! store never grows past `SessionLimits::max_sessions` idle entries.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{load_agent_config_from_env, themes_or_default, Settings};
use crate::error::{Result, TutorError};
use crate::openai::OpenAI;
use crate::service::{GenerationService, UnavailableService};
use crate::session::{Agents, Tutor, TutoringSession};

pub type SharedSession = Arc<Mutex<TutoringSession>>;

/// Bounds on the in-memory session store.
#[derive(Clone, Debug)]
pub struct SessionLimits {
    pub idle_ttl: Duration,
    pub max_sessions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(60 * 60),
            max_sessions: 10_000,
        }
    }
}

struct SessionSlot {
    session: SharedSession,
    last_seen: Instant,
}

impl SessionSlot {
    /// A handler still holds a clone of the session.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.session) > 1
    }
}

type SessionMap = HashMap<String, SessionSlot>;

#[derive(Clone)]
pub struct AppState {
    pub tutor: Arc<Tutor>,
    sessions: Arc<RwLock<SessionMap>>,
    limits: SessionLimits,
}

impl AppState {
    /// Build state from env: load config, themes, settings, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg_opt = load_agent_config_from_env();
        let prompts = cfg_opt
            .as_ref()
            .map(|c| c.prompts.clone())
            .unwrap_or_default();
        let themes = themes_or_default(cfg_opt.as_ref());
        let settings = Settings::from_env();
        let limits = settings.sessions.clone();

        let service: Arc<dyn GenerationService> = match OpenAI::from_env() {
            Some(oa) => {
                info!(target: "writing_coach", base_url = %oa.base_url, "OpenAI enabled.");
                Arc::new(oa)
            }
            None => {
                warn!(target: "writing_coach", "OpenAI disabled (no OPENAI_API_KEY). Every activity will fail until it is set.");
                Arc::new(UnavailableService {
                    reason: "OPENAI_API_KEY is not configured on the server".into(),
                })
            }
        };

        info!(
            target: "writing_coach",
            themes = themes.len(),
            poll_interval = ?settings.poll.interval,
            poll_max_attempts = settings.poll.max_attempts,
            poll_max_wait = ?settings.poll.max_wait,
            session_ttl = ?limits.idle_ttl,
            max_sessions = limits.max_sessions,
            gated = settings.access_pin.is_some(),
            "Tutor configured"
        );

        Self::with_tutor(Tutor {
            service,
            prompts,
            themes,
            agents: Agents {
                writing_coach: settings.writing_coach_id,
                puzzle_master: settings.puzzle_master_id,
            },
            poll: settings.poll,
            access_pin: settings.access_pin,
        })
        .with_limits(limits)
    }

    pub fn with_tutor(tutor: Tutor) -> Self {
        Self {
            tutor: Arc::new(tutor),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            limits: SessionLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// A fresh session, gated when a PIN is configured.
    pub fn new_session(&self) -> TutoringSession {
        TutoringSession::new(self.tutor.access_pin.as_deref())
    }

    /// Create and register a session; returns its id.
    #[instrument(level = "debug", skip(self))]
    pub async fn create_session(&self) -> (String, SharedSession) {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(self.new_session()));
        let now = Instant::now();

        let mut sessions = self.sessions.write().await;
        evict_idle(&mut sessions, now, self.limits.idle_ttl);
        while sessions.len() >= self.limits.max_sessions {
            if !evict_oldest(&mut sessions) {
                warn!(target: "tutor", live = sessions.len(), "Session store full of busy sessions");
                break;
            }
        }
        sessions.insert(id.clone(), SessionSlot { session: session.clone(), last_seen: now });
        drop(sessions);

        info!(target: "tutor", session_id = %id, "Session created");
        (id, session)
    }

    /// Look up a session and mark it as seen.
    #[instrument(level = "debug", skip_all, fields(%id))]
    pub async fn get_session(&self, id: &str) -> Result<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(id)
            .ok_or_else(|| TutorError::UnknownSession(id.to_string()))?;
        slot.last_seen = Instant::now();
        Ok(slot.session.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions not seen within the idle TTL as of `now`; returns how many.
    pub async fn evict_idle(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write().await;
        evict_idle(&mut sessions, now, self.limits.idle_ttl)
    }

    /// Sweep idle sessions in the background for the life of the process.
    pub fn spawn_session_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::clone(self);
        let period = state.limits.idle_ttl.clamp(Duration::from_secs(1), Duration::from_secs(60));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                state.evict_idle(Instant::now()).await;
            }
        })
    }
}

fn evict_idle(sessions: &mut SessionMap, now: Instant, ttl: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|_, slot| slot.in_use() || now.saturating_duration_since(slot.last_seen) <= ttl);
    let evicted = before - sessions.len();
    if evicted > 0 {
        info!(target: "tutor", evicted, live = sessions.len(), "Evicted idle sessions");
    }
    evicted
}

/// Remove the least recently seen session that is not in use.
fn evict_oldest(sessions: &mut SessionMap) -> bool {
    let oldest = sessions
        .iter()
        .filter(|(_, slot)| !slot.in_use())
        .min_by_key(|(_, slot)| slot.last_seen)
        .map(|(id, _)| id.clone());
    match oldest {
        Some(id) => {
            sessions.remove(&id);
            debug!(target: "tutor", session_id = %id, "Evicted oldest session (store full)");
            true
        }
        None => false,
    }
}
