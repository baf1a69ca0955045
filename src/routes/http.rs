//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs the session id and basic result info.

use std::sync::Arc;
use axum::{
  extract::{Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument};

use crate::error::TutorError;
use crate::logic::*;
use crate::protocol::*;
use crate::service::CancelToken;
use crate::state::AppState;

impl IntoResponse for TutorError {
  fn into_response(self) -> Response {
    let status = match &self {
      TutorError::GateRejected => StatusCode::FORBIDDEN,
      TutorError::EmptySubmission => StatusCode::UNPROCESSABLE_ENTITY,
      TutorError::NoActiveActivity => StatusCode::CONFLICT,
      TutorError::InvalidActivity(_) => StatusCode::BAD_REQUEST,
      TutorError::UnknownSession(_) => StatusCode::NOT_FOUND,
      TutorError::Service(_) => StatusCode::BAD_GATEWAY,
      TutorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
      TutorError::Cancelled => StatusCode::REQUEST_TIMEOUT,
    };
    let body = ErrorOut { error: self.kind().to_string(), message: self.to_string(), warning: self.is_warning() };
    (status, Json(body)).into_response()
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let (session_id, session) = state.create_session().await;
  let view = session.lock().await.view();
  Json(SessionOut { session_id, view })
}

#[instrument(level = "info", skip(state), fields(session_id = %q.session_id))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Query(q): Query<SessionQuery>,
) -> Result<Json<ViewOut>, TutorError> {
  let session = state.get_session(&q.session_id).await?;
  let view = session.lock().await.view();
  Ok(Json(ViewOut { view }))
}

#[instrument(level = "info", skip(state, body), fields(session_id = %body.session_id))]
pub async fn http_post_unlock(
  State(state): State<Arc<AppState>>,
  Json(body): Json<UnlockIn>,
) -> Result<Json<ViewOut>, TutorError> {
  let session = state.get_session(&body.session_id).await?;
  let mut session = session.lock().await;
  let view = do_unlock(&state, &mut session, &body.pin)?;
  Ok(Json(ViewOut { view }))
}

#[instrument(level = "info", skip(state, body), fields(session_id = %body.session_id, kind = %body.kind))]
pub async fn http_post_start(
  State(state): State<Arc<AppState>>,
  Json(body): Json<StartIn>,
) -> Result<Json<ViewOut>, TutorError> {
  let session = state.get_session(&body.session_id).await?;
  let mut session = session.lock().await;
  let view = do_start(&state, &mut session, body.kind, &mut CancelToken::never()).await?;
  info!(target: "tutor", session_id = %body.session_id, kind = %body.kind, "HTTP activity started");
  Ok(Json(ViewOut { view }))
}

#[instrument(level = "info", skip(state, body), fields(session_id = %body.session_id, text_len = body.text.len()))]
pub async fn http_post_submit(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SubmitIn>,
) -> Result<Json<ViewOut>, TutorError> {
  let session = state.get_session(&body.session_id).await?;
  let mut session = session.lock().await;
  let view = do_submit(&state, &mut session, &body.text, &mut CancelToken::never()).await?;
  info!(target: "tutor", session_id = %body.session_id, "HTTP work submitted");
  Ok(Json(ViewOut { view }))
}
