//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws` (one session per connection)
/// - REST-ish API under `/api/v1/...` (sessions addressed by `sessionId`)
/// - Static single page form from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route(
            "/api/v1/session",
            get(http::http_get_session).post(http::http_create_session),
        )
        .route("/api/v1/unlock", post(http::http_post_unlock))
        .route("/api/v1/start", post(http::http_post_start))
        .route("/api/v1/submit", post(http::http_post_submit))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::Value;
    use tower::util::ServiceExt;

    use super::*;
    use crate::logic::test_support::app_state;
    use crate::service::mock::ScriptedService;

    async fn call(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = router.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, json)
    }

    async fn new_session(router: &Router) -> String {
        let (status, body) = call(router.clone(), Method::POST, "/api/v1/session", None).await;
        assert_eq!(status, StatusCode::OK);
        body["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let router = build_router(Arc::new(app_state(Arc::new(ScriptedService::new()), None)));
        let (status, body) = call(router, Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn full_writing_turn_over_http() {
        let svc = Arc::new(ScriptedService::with_replies([
            "Write a mystery!",
            "Lovely detail. Score:\nVocabulary: 9",
        ]));
        let router = build_router(Arc::new(app_state(svc, Some("1234"))));
        let id = new_session(&router).await;

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/api/v1/start",
            Some(serde_json::json!({ "sessionId": id, "kind": "challenge" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "gate_rejected");

        let (status, _) = call(
            router.clone(),
            Method::POST,
            "/api/v1/unlock",
            Some(serde_json::json!({ "sessionId": id, "pin": "1234" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/api/v1/start",
            Some(serde_json::json!({ "sessionId": id, "kind": "challenge" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["view"]["activeKind"], "challenge");
        assert!(body["view"]["prompt"].as_str().unwrap().ends_with("Write a mystery!"));

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/api/v1/submit",
            Some(serde_json::json!({ "sessionId": id, "text": "It was a dark night..." })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["view"]["feedback"]["narrative"], "Lovely detail.");
        assert_eq!(body["view"]["feedback"]["rubric"], "Score:\nVocabulary: 9");

        let (status, body) =
            call(router, Method::GET, &format!("/api/v1/session?sessionId={}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["view"]["theme"].is_string());
    }

    #[tokio::test]
    async fn submit_rejections_map_to_warnings() {
        let router = build_router(Arc::new(app_state(Arc::new(ScriptedService::new()), None)));
        let id = new_session(&router).await;

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/api/v1/submit",
            Some(serde_json::json!({ "sessionId": id, "text": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "empty_submission");
        assert_eq!(body["warning"], true);

        let (status, body) = call(
            router,
            Method::POST,
            "/api/v1/submit",
            Some(serde_json::json!({ "sessionId": id, "text": "my answer" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "no_active_activity");
    }

    #[tokio::test]
    async fn service_failure_is_bad_gateway_and_unknown_session_is_404() {
        let svc = Arc::new(ScriptedService::new());
        svc.set_fail_open(true);
        let router = build_router(Arc::new(app_state(svc, None)));
        let id = new_session(&router).await;

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/api/v1/start",
            Some(serde_json::json!({ "sessionId": id, "kind": "puzzle" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "service_error");
        assert!(body["message"].as_str().unwrap().contains("connection refused"));

        let (status, _) = call(router, Method::GET, "/api/v1/session?sessionId=nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
