//! End-to-end tests of the HTTP transport using axum's Router.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{SECRET, hs256_config, hs256_token, now, valid_claims};
use movie_mcp::config::{Config, Environment};
use movie_mcp::error::codes;
use movie_mcp::server::McpServer;
use movie_mcp::server::transport::SESSION_HEADER;

fn router(config: Config) -> Router {
    McpServer::new(config).unwrap().router()
}

fn rpc(token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::post("/mcp").header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn tool_call(name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 42,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
}

fn ping(id: i64) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": "ping" })
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_authenticated_tool_call() {
    let app = router(hs256_config());
    let token = hs256_token(SECRET, &valid_claims("alice"));

    let response = app
        .oneshot(rpc(Some(&token), &tool_call("suggest_movie", json!({ "genre": "Action" }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(SESSION_HEADER));

    let body = json_body(response).await;
    assert_eq!(body["id"], 42);
    assert_eq!(body["result"]["isError"], false);
    assert!(body["result"]["content"][0]["text"].as_str().unwrap().contains("Action"));
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let app = router(hs256_config());
    let token = hs256_token(SECRET, &json!({ "sub": "alice", "exp": now() - 3600 }));

    let response = app
        .oneshot(rpc(Some(&token), &tool_call("suggest_movie", json!({ "genre": "Action" }))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let body = json_body(response).await;
    assert_eq!(body["id"], 42);
    assert_eq!(body["error"]["code"], codes::AUTHENTICATION_FAILED);
    assert_eq!(body["error"]["data"]["kind"], "expired_or_not_yet_valid");
}

#[tokio::test]
async fn test_unknown_tool_with_valid_token() {
    let app = router(hs256_config());
    let token = hs256_token(SECRET, &valid_claims("alice"));

    let request = rpc(Some(&token), &tool_call("nonexistent", json!({})));
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], codes::INVALID_PARAMS);
}

#[tokio::test]
async fn test_missing_token() {
    let app = router(hs256_config());
    let response = app.oneshot(rpc(None, &tool_call("suggest_movie", json!({})))).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], codes::AUTHENTICATION_FAILED);
    assert_eq!(body["error"]["data"]["kind"], "malformed");
}

#[tokio::test]
async fn test_non_bearer_scheme() {
    let app = router(hs256_config());
    let request = Request::post("/mcp")
        .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .body(Body::from(ping(1).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unsigned_token_is_rejected() {
    let app = router(hs256_config());
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(valid_claims("mallory").to_string());
    let token = format!("{header}.{claims}.");

    let response = app.oneshot(rpc(Some(&token), &ping(1))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["error"]["data"]["kind"], "algorithm_not_allowed");
}

#[tokio::test]
async fn test_production_hides_detail() {
    let mut config = hs256_config();
    config.environment = Environment::Prod;
    let app = router(config);
    let token = hs256_token("wrong-secret-wrong-secret-wrong-secret", &valid_claims("alice"));

    let response = app.oneshot(rpc(Some(&token), &ping(1))).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["data"], json!({ "kind": "invalid_signature" }));
}

#[tokio::test]
async fn test_health_is_public() {
    let app = router(hs256_config());
    let response = app.oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_readiness_reports_tools() {
    let app = router(hs256_config());
    let response = app.oneshot(Request::get("/ready").body(Body::empty()).unwrap()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["tools"], 6);
    assert_eq!(body["pendingElicitations"], 0);
}

#[tokio::test]
async fn test_notification_is_accepted_without_body() {
    let app = router(Config::for_testing());
    let response = app
        .oneshot(rpc(None, &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_parse_error_is_bad_request() {
    let app = router(Config::for_testing());
    let request = Request::post("/mcp").body(Body::from("{not json")).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], codes::PARSE_ERROR);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let app = router(Config::for_testing());

    let response = app
        .clone()
        .oneshot(rpc(
            None,
            &json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();

    let body = json_body(response).await;
    assert_eq!(body["result"]["serverInfo"]["name"], "movie-mcp");
    assert!(body["result"]["capabilities"]["elicitation"].is_object());

    // The session is reused when presented.
    let request = Request::post("/mcp")
        .header(SESSION_HEADER, &session)
        .body(Body::from(ping(2).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()[SESSION_HEADER], session.as_str());

    let delete = || {
        Request::delete("/mcp")
            .header(SESSION_HEADER, &session)
            .body(Body::empty())
            .unwrap()
    };
    let response = app.clone().oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.oneshot(delete()).await.unwrap().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tools_list_over_http() {
    let app = router(Config::for_testing());
    let response = app
        .oneshot(rpc(None, &json!({ "jsonrpc": "2.0", "id": "list", "method": "tools/list" })))
        .await
        .unwrap();

    let body = json_body(response).await;
    assert_eq!(body["id"], "list");
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"suggest_movie"));
    assert!(names.contains(&"compare_movies_elicitation"));
}
