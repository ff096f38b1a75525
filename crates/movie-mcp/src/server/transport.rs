//! HTTP transport.
//!
//! - `POST /mcp` carries JSON-RPC requests, notifications and client responses
//! - `GET /mcp` is an SSE stream of server-initiated messages, with Last-Event-ID replay
//! - `DELETE /mcp` ends a session
//! - `/health` and `/ready` are never authenticated

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::dispatcher::{McpDispatcher, RequestContext};
use super::session::{BufferedEvent, Outbound, Session, SessionManager};
use crate::auth::{AuthGate, Authenticated, require_bearer};
use crate::error::codes;

/// Header carrying the transport session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Query parameters for the MCP endpoint.
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Shared state for HTTP handlers.
pub struct HttpState {
    pub dispatcher: Arc<McpDispatcher>,
    pub sessions: Arc<SessionManager>,
}

/// Create the HTTP router for MCP.
///
/// `allowed_hosts` is the CORS origin allow-list; empty or `*` allows any origin.
pub fn create_router(
    dispatcher: Arc<McpDispatcher>,
    gate: Arc<AuthGate>,
    sessions: Arc<SessionManager>,
    allowed_hosts: &[String],
) -> Router {
    // Start background cleanup task
    Arc::clone(&sessions).start_cleanup_task();

    let state = Arc::new(HttpState {
        dispatcher,
        sessions,
    });

    let mcp = Router::new()
        .route(
            "/mcp",
            post(handle_mcp_post)
                .get(handle_mcp_get)
                .delete(handle_mcp_delete),
        )
        .route_layer(middleware::from_fn_with_state(gate, require_bearer));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .merge(mcp)
        .layer(cors_layer(allowed_hosts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_hosts: &[String]) -> CorsLayer {
    if allowed_hosts.is_empty() || allowed_hosts.iter().any(|h| h == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_hosts
        .iter()
        .filter_map(|host| match HeaderValue::from_str(host) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(host = %host, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)])
}

async fn health_check() -> &'static str {
    "OK"
}

async fn readiness_check(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.session_count().await,
        "tools": state.dispatcher.registry().len(),
        "pendingElicitations": state.dispatcher.elicitation().pending_count()
    }))
}

fn requested_session<'a>(headers: &'a HeaderMap, query: &'a SessionQuery) -> Option<&'a str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.session_id.as_deref())
}

fn with_session_header(mut response: Response, session: &Session) -> Response {
    if let Some(value) = session.header_value() {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Handle POST requests to /mcp.
async fn handle_mcp_post(
    State(state): State<Arc<HttpState>>,
    Extension(Authenticated(principal)): Extension<Authenticated>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let requested = requested_session(&headers, &query);
    let session = state.sessions.get_or_create_session(requested).await;
    session.touch().await;

    let outbound: Arc<dyn Outbound> = Arc::clone(&session) as Arc<dyn Outbound>;
    let ctx = RequestContext::new(principal, Some(outbound));

    let response = match state.dispatcher.handle_bytes(&body, &ctx).await {
        None => StatusCode::ACCEPTED.into_response(),
        Some(rpc) => {
            let status = match rpc.error.as_ref().map(|e| e.code) {
                Some(codes::PARSE_ERROR | codes::INVALID_REQUEST) => StatusCode::BAD_REQUEST,
                _ => StatusCode::OK,
            };
            (status, Json(rpc)).into_response()
        }
    };

    with_session_header(response, &session)
}

/// Handle GET requests to /mcp (SSE stream for server-initiated messages).
async fn handle_mcp_get(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Response {
    // Parse Last-Event-ID header for replay
    let last_event_id: u64 = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let requested = requested_session(&headers, &query);
    let session = state.sessions.get_or_create_session(requested).await;

    tracing::info!(session_id = %session.id, last_event_id, "New SSE stream connection");

    let stream = build_sse_stream(Arc::clone(&session), last_event_id).await;
    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("ping");

    let response = (
        [
            ("X-Accel-Buffering", "no"),
            ("Cache-Control", "no-cache, no-store, must-revalidate"),
        ],
        Sse::new(stream).keep_alive(keep_alive),
    )
        .into_response();

    with_session_header(response, &session)
}

/// Handle DELETE requests to /mcp (explicit session termination).
async fn handle_mcp_delete(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> StatusCode {
    let Some(id) = requested_session(&headers, &query) else {
        return StatusCode::BAD_REQUEST;
    };

    if state.sessions.remove_session(id).await {
        tracing::info!(session_id = %id, "Session terminated by client");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Build SSE stream with replay and live events.
async fn build_sse_stream(
    session: Arc<Session>,
    last_event_id: u64,
) -> impl Stream<Item = Result<Event, Infallible>> {
    // Subscribe before reading the buffer so nothing pushed in between is lost.
    let receiver = session.subscribe();

    let missed_events = session.get_events_after(last_event_id).await;
    let replayed_up_to = missed_events.last().map_or(last_event_id, |e| e.id);
    let replay_stream = stream::iter(missed_events.into_iter().map(|e| {
        tracing::debug!(event_id = e.id, "Replaying missed event");
        Ok::<_, Infallible>(e.to_sse_event())
    }));

    let live_stream =
        BroadcastStream::new(receiver).filter_map(move |result: Result<BufferedEvent, _>| {
            async move {
                match result {
                    Ok(event) if event.id > replayed_up_to => Some(Ok(event.to_sse_event())),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::debug!(error = %e, "Broadcast lag, client will catch up");
                        None
                    }
                }
            }
        });

    replay_stream.chain(live_stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_header_preferred_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("from-header"));
        let query = SessionQuery {
            session_id: Some("from-query".into()),
        };
        assert_eq!(requested_session(&headers, &query), Some("from-header"));

        let empty = HeaderMap::new();
        assert_eq!(requested_session(&empty, &query), Some("from-query"));
    }

    #[test]
    fn test_cors_layer_builds_for_lists() {
        let _ = cors_layer(&[]);
        let _ = cors_layer(&["*".to_string()]);
        let _ = cors_layer(&[
            "https://app.example.com".to_string(),
            "bad\nvalue".to_string(),
        ]);
    }
}
