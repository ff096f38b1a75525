//! Elicitation lifecycle tests, from the coordinator up through the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use movie_mcp::catalog::MovieCatalog;
use movie_mcp::config::Config;
use movie_mcp::error::{ElicitationError, ToolResult, codes};
use movie_mcp::server::dispatcher::{McpDispatcher, RequestContext};
use movie_mcp::server::elicitation::{ElicitationCoordinator, SessionState};
use movie_mcp::server::session::Outbound;
use movie_mcp::server::stdio::LineOutbound;
use movie_mcp::tools::{self, McpTool, ToolCallResult, ToolContext, ToolRegistry};

fn config() -> Config {
    let mut config = Config::for_testing();
    config.enable_elicitation = true;
    config.max_invalid_submissions = 3;
    config
}

fn name_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "name": { "type": "string", "minLength": 1 } },
        "required": ["name"]
    })
}

#[tokio::test]
async fn test_valid_submission_resumes_handler() {
    let coordinator = ElicitationCoordinator::new(&config());
    let pending = coordinator.create(name_schema(), "Your name?", None, None).unwrap();
    let id = pending.id().to_string();

    let waiter = tokio::spawn(pending.wait());
    coordinator.submit(&id, json!({ "name": "Ada" })).unwrap();

    assert_eq!(waiter.await.unwrap().unwrap(), json!({ "name": "Ada" }));
    assert_eq!(coordinator.session(&id).unwrap().state, SessionState::Fulfilled);
    assert_eq!(coordinator.pending_count(), 0);
}

#[tokio::test]
async fn test_second_submission_is_rejected() {
    let coordinator = ElicitationCoordinator::new(&config());
    let pending = coordinator.create(name_schema(), "Your name?", None, None).unwrap();
    let id = pending.id().to_string();

    coordinator.submit(&id, json!({ "name": "Ada" })).unwrap();
    let err = coordinator.submit(&id, json!({ "name": "Grace" })).unwrap_err();
    assert!(matches!(
        err,
        ElicitationError::AlreadyResolved {
            state: SessionState::Fulfilled,
            ..
        }
    ));

    // The handler sees the first answer only.
    assert_eq!(pending.wait().await.unwrap(), json!({ "name": "Ada" }));
}

#[tokio::test]
async fn test_invalid_submission_keeps_session_pending() {
    let coordinator = ElicitationCoordinator::new(&config());
    let pending = coordinator.create(name_schema(), "Your name?", None, None).unwrap();
    let id = pending.id().to_string();

    let err = coordinator.submit(&id, json!({ "name": 42 })).unwrap_err();
    assert!(matches!(err, ElicitationError::SchemaMismatch(_)));
    assert_eq!(coordinator.session(&id).unwrap().state, SessionState::Pending);

    coordinator.submit(&id, json!({ "name": "Ada" })).unwrap();
    assert!(pending.wait().await.is_ok());
}

#[tokio::test]
async fn test_too_many_invalid_submissions_cancel() {
    let coordinator = ElicitationCoordinator::new(&config());
    let pending = coordinator.create(name_schema(), "Your name?", None, None).unwrap();
    let id = pending.id().to_string();

    assert!(matches!(coordinator.submit(&id, json!({})), Err(ElicitationError::SchemaMismatch(_))));
    assert!(matches!(coordinator.submit(&id, json!({})), Err(ElicitationError::SchemaMismatch(_))));
    assert_eq!(
        coordinator.submit(&id, json!({})),
        Err(ElicitationError::TooManyInvalidSubmissions(3))
    );

    assert_eq!(pending.wait().await, Err(ElicitationError::TooManyInvalidSubmissions(3)));
    assert_eq!(coordinator.session(&id).unwrap().state, SessionState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expires_session() {
    let coordinator = ElicitationCoordinator::new(&config());
    let pending = coordinator
        .create(name_schema(), "Your name?", Some(Duration::from_secs(60)), None)
        .unwrap();
    let id = pending.id().to_string();

    // Paused time auto-advances to the deadline.
    assert_eq!(pending.wait().await, Err(ElicitationError::Expired));
    assert_eq!(coordinator.session(&id).unwrap().state, SessionState::Expired);

    let late = coordinator.submit(&id, json!({ "name": "Ada" })).unwrap_err();
    assert!(matches!(late, ElicitationError::AlreadyResolved { state: SessionState::Expired, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_submission_before_deadline_wins() {
    let coordinator = ElicitationCoordinator::new(&config());
    let pending = coordinator
        .create(name_schema(), "Your name?", Some(Duration::from_secs(60)), None)
        .unwrap();
    let id = pending.id().to_string();

    tokio::time::advance(Duration::from_secs(59)).await;
    coordinator.submit(&id, json!({ "name": "Ada" })).unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;

    assert!(pending.wait().await.is_ok());
    assert_eq!(coordinator.session(&id).unwrap().state, SessionState::Fulfilled);
}

#[tokio::test]
async fn test_cancel_and_decline() {
    let coordinator = ElicitationCoordinator::new(&config());

    let cancelled = coordinator.create(name_schema(), "a", None, None).unwrap();
    coordinator.cancel(cancelled.id()).unwrap();
    assert_eq!(cancelled.wait().await, Err(ElicitationError::Cancelled));

    let declined = coordinator.create(name_schema(), "b", None, None).unwrap();
    coordinator.decline(declined.id()).unwrap();
    assert_eq!(declined.wait().await, Err(ElicitationError::Declined));

    assert!(matches!(coordinator.cancel("missing"), Err(ElicitationError::UnknownSession(_))));
}

#[tokio::test]
async fn test_dropped_handler_cancels_session() {
    let coordinator = ElicitationCoordinator::new(&config());
    let pending = coordinator.create(name_schema(), "Your name?", None, None).unwrap();
    let id = pending.id().to_string();

    drop(pending);

    assert_eq!(coordinator.session(&id).unwrap().state, SessionState::Cancelled);
    assert_eq!(coordinator.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolution_happens_once() {
    let coordinator = ElicitationCoordinator::new(&config());
    let pending = coordinator.create(name_schema(), "Your name?", None, None).unwrap();
    let id = pending.id().to_string();

    let mut handles = Vec::new();
    for i in 0..16 {
        let coordinator = Arc::clone(&coordinator);
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                coordinator.submit(&id, json!({ "name": format!("user-{i}") }))
            } else {
                coordinator.cancel(&id)
            }
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let state = coordinator.session(&id).unwrap().state;
    let outcome = pending.wait().await;
    match state {
        SessionState::Fulfilled => assert!(outcome.is_ok()),
        SessionState::Cancelled => assert_eq!(outcome, Err(ElicitationError::Cancelled)),
        other => panic!("unexpected state {other:?}"),
    }
}

#[tokio::test]
async fn test_disabled_coordinator_refuses_sessions() {
    let mut config = config();
    config.enable_elicitation = false;
    let coordinator = ElicitationCoordinator::new(&config);

    assert!(matches!(
        coordinator.create(name_schema(), "Your name?", None, None),
        Err(ElicitationError::Disabled)
    ));
}

/// Asks for a name and never gets past its own timeout.
struct AskingTool;

#[async_trait]
impl McpTool for AskingTool {
    fn name(&self) -> &'static str {
        "ask"
    }

    fn description(&self) -> &'static str {
        "Asks the user for a name"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(200))
    }

    async fn execute(&self, ctx: &ToolContext, _input: Value) -> ToolResult<ToolCallResult> {
        let answer = ctx.elicit("Your name?", name_schema()).await?;
        Ok(ToolCallResult::text(answer["name"].as_str().unwrap_or_default()))
    }
}

fn channel() -> (Arc<dyn Outbound>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(LineOutbound::new(tx)), rx)
}

async fn next_request(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let line = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("elicitation request in time")
        .expect("channel open");
    serde_json::from_str(&line).unwrap()
}

fn tool_call(name: &str) -> Vec<u8> {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": name, "arguments": {} }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn test_tool_timeout_cancels_owned_sessions() {
    let config = config();
    let mut registry = ToolRegistry::new(config.page_size);
    registry.register(Arc::new(AskingTool)).unwrap();
    let dispatcher = McpDispatcher::new(
        &config,
        registry,
        Arc::new(MovieCatalog::bundled().unwrap()),
        ElicitationCoordinator::new(&config),
    );

    let (outbound, mut rx) = channel();
    let ctx = RequestContext::new(None, Some(outbound));
    let response = dispatcher.handle_bytes(&tool_call("ask"), &ctx).await.unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"].as_str().unwrap().contains("timed out"));

    let request = next_request(&mut rx).await;
    assert_eq!(request["method"], "elicitation/create");
    let session_id = request["params"]["sessionId"].as_str().unwrap();

    let session = dispatcher.elicitation().session(session_id).unwrap();
    assert_eq!(session.state, SessionState::Cancelled);
    assert_eq!(dispatcher.elicitation().pending_count(), 0);

    // A late answer gets a precise rejection.
    let submit = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "elicitation/submit",
        "params": { "sessionId": session_id, "content": { "name": "Ada" } }
    });
    let response = dispatcher.handle_bytes(submit.to_string().as_bytes(), &ctx).await.unwrap();
    assert_eq!(response.error.unwrap().code, codes::ELICITATION_ERROR);
}

#[tokio::test]
async fn test_elicitation_round_trip_through_client_responses() {
    let config = config();
    let dispatcher = Arc::new(McpDispatcher::new(
        &config,
        tools::register_all_tools(&config).unwrap(),
        Arc::new(MovieCatalog::bundled().unwrap()),
        ElicitationCoordinator::new(&config),
    ));

    let (outbound, mut rx) = channel();
    let ctx = RequestContext::new(None, Some(outbound));

    let call = {
        let dispatcher = Arc::clone(&dispatcher);
        let ctx = ctx.clone();
        let request = tool_call("suggest_movie_elicitation");
        tokio::spawn(async move { dispatcher.handle_bytes(&request, &ctx).await })
    };

    let preferences = next_request(&mut rx).await;
    assert_eq!(preferences["method"], "elicitation/create");
    assert_eq!(preferences["params"]["requestedSchema"]["required"], json!(["preferred_genres"]));
    let answer = json!({
        "jsonrpc": "2.0",
        "id": preferences["id"],
        "result": {
            "action": "accept",
            "content": { "preferred_genres": "Fantasy", "preferred_decade": "1990s" }
        }
    });
    assert!(dispatcher.handle_bytes(answer.to_string().as_bytes(), &ctx).await.is_none());

    let feedback = next_request(&mut rx).await;
    let declined = json!({
        "jsonrpc": "2.0",
        "id": feedback["id"],
        "result": { "action": "decline" }
    });
    assert!(dispatcher.handle_bytes(declined.to_string().as_bytes(), &ctx).await.is_none());

    let response = call.await.unwrap().unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["isError"], false);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("Toy Story"), "{text}");
    assert!(!text.contains("Spirited Away"), "{text}");
}

#[tokio::test]
async fn test_declined_preferences_fall_back_to_top_movies() {
    let config = config();
    let dispatcher = Arc::new(McpDispatcher::new(
        &config,
        tools::register_all_tools(&config).unwrap(),
        Arc::new(MovieCatalog::bundled().unwrap()),
        ElicitationCoordinator::new(&config),
    ));

    let (outbound, mut rx) = channel();
    let ctx = RequestContext::new(None, Some(outbound));

    let call = {
        let dispatcher = Arc::clone(&dispatcher);
        let ctx = ctx.clone();
        let request = tool_call("suggest_movie_elicitation");
        tokio::spawn(async move { dispatcher.handle_bytes(&request, &ctx).await })
    };

    let request = next_request(&mut rx).await;
    let submit = json!({
        "jsonrpc": "2.0",
        "id": 9,
        "method": "elicitation/submit",
        "params": { "sessionId": request["params"]["sessionId"], "action": "decline" }
    });
    let ack = dispatcher.handle_bytes(submit.to_string().as_bytes(), &ctx).await.unwrap();
    assert_eq!(ack.result.unwrap()["state"], "cancelled");

    let response = call.await.unwrap().unwrap();
    let text = response.result.unwrap()["content"][0]["text"].as_str().unwrap().to_string();
    assert!(text.contains("general recommendations"), "{text}");
    assert!(text.contains("The Dark Knight"), "{text}");
}

#[tokio::test]
async fn test_elicitation_without_client_channel_reports_error() {
    let config = config();
    let dispatcher = McpDispatcher::new(
        &config,
        tools::register_all_tools(&config).unwrap(),
        Arc::new(MovieCatalog::bundled().unwrap()),
        ElicitationCoordinator::new(&config),
    );

    let response = dispatcher
        .handle_bytes(&tool_call("build_personalized_watchlist"), &RequestContext::default())
        .await
        .unwrap();

    assert_eq!(response.result.unwrap()["isError"], true);
    assert_eq!(dispatcher.elicitation().pending_count(), 0);
}
