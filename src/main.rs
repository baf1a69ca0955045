//! Writing Coach · Tutoring Session Backend
//!
//! - Axum HTTP + WebSocket API around a turn-based tutoring session
//!   (writing challenges and puzzles) backed by OpenAI Assistants
//! - Static single page form (./static/index.html)
//!
//! Important env variables:
//!   PORT                        : u16 (default 3000)
//!   OPENAI_API_KEY              : required for any activity to work
//!   OPENAI_BASE_URL             : default "https://api.openai.com/v1"
//!   WRITING_COACH_ASSISTANT_ID  : assistant used for writing challenges
//!   PUZZLE_MASTER_ASSISTANT_ID  : assistant used for puzzles
//!   ACCESS_PIN                  : shared PIN gating each session (unset = open)
//!   POLL_INTERVAL_MS            : run polling interval (default 1000)
//!   POLL_MAX_ATTEMPTS           : max polls per run (default 120)
//!   POLL_MAX_WAIT_SECS          : max wait per run (default 120)
//!   SESSION_IDLE_TTL_SECS       : drop sessions idle this long (default 3600)
//!   MAX_SESSIONS                : cap on live sessions (default 10000)
//!   AGENT_CONFIG_PATH           : path to TOML config (prompts + themes)
//!   LOG_LEVEL                   : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT                  : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod service;
mod openai;
mod session;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: tutor (service client, prompts, themes) + session store.
  let state = Arc::new(AppState::new());
  let _sweeper = state.spawn_session_sweeper();

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "writing_coach", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "writing_coach", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "writing_coach", "Shutdown signal received");
}
