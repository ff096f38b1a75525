//! JSON-RPC method routing and tool invocation.
//!
//! Transport problems (bad envelope, unknown method or tool, schema-invalid
//! arguments) become JSON-RPC error objects. Anything that goes wrong once a
//! handler is running (failure, panic, timeout) becomes a successful response
//! whose result has `isError: true`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use super::elicitation::ElicitationCoordinator;
use super::jsonrpc::{IncomingMessage, JsonRpcResponse, parse_message};
use super::session::Outbound;
use crate::auth::Principal;
use crate::catalog::MovieCatalog;
use crate::config::Config;
use crate::error::{ElicitationError, ProtocolError, ProtocolResult, ToolError};
use crate::tools::{ToolCallResult, ToolContext, ToolDescriptor, ToolRegistry};

/// Protocol version assumed when the client does not send one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Per-request state supplied by the transport.
#[derive(Clone, Default)]
pub struct RequestContext {
    /// Authenticated caller.
    pub principal: Option<Principal>,
    /// Channel for server-initiated requests to this caller.
    pub outbound: Option<Arc<dyn Outbound>>,
}

impl RequestContext {
    #[must_use]
    pub fn new(principal: Option<Principal>, outbound: Option<Arc<dyn Outbound>>) -> Self {
        Self {
            principal,
            outbound,
        }
    }
}

/// One `tools/call` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// JSON-RPC id of the call.
    pub id: Value,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    /// Extract name and arguments from `tools/call` params.
    pub fn from_params(id: Value, params: &Value) -> ProtocolResult<Self> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::invalid_params("Missing 'name' parameter"))?
            .to_string();

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(arguments @ Value::Object(_)) => arguments.clone(),
            Some(_) => {
                return Err(ProtocolError::invalid_params("'arguments' must be an object"));
            }
        };

        Ok(Self {
            id,
            name,
            arguments,
        })
    }
}

/// Routes JSON-RPC messages to the tool registry and the elicitation coordinator.
pub struct McpDispatcher {
    registry: Arc<ToolRegistry>,
    elicitation: Arc<ElicitationCoordinator>,
    catalog: Arc<MovieCatalog>,
    default_timeout: Duration,
    dev_mode: bool,
}

impl McpDispatcher {
    #[must_use]
    pub fn new(
        config: &Config,
        registry: ToolRegistry,
        catalog: Arc<MovieCatalog>,
        elicitation: Arc<ElicitationCoordinator>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            elicitation,
            catalog,
            default_timeout: config.tool_timeout,
            dev_mode: config.dev_mode(),
        }
    }

    /// Registered tools.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Elicitation sessions.
    #[must_use]
    pub fn elicitation(&self) -> &Arc<ElicitationCoordinator> {
        &self.elicitation
    }

    /// Whether error responses carry internal detail.
    #[must_use]
    pub const fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Handle one raw message. Returns `None` when no response is owed.
    pub async fn handle_bytes(
        &self,
        bytes: &[u8],
        ctx: &RequestContext,
    ) -> Option<JsonRpcResponse> {
        match parse_message(bytes) {
            Ok(message) => self.handle_message(message, ctx).await,
            Err(rejected) => {
                tracing::debug!(error = %rejected.error, "Rejected envelope");
                Some(rejected.error.to_response(rejected.id, self.dev_mode))
            }
        }
    }

    /// Handle one classified message. Returns `None` when no response is owed.
    pub async fn handle_message(
        &self,
        message: IncomingMessage,
        ctx: &RequestContext,
    ) -> Option<JsonRpcResponse> {
        match message {
            IncomingMessage::Request { id, method, params } => {
                tracing::debug!(method = %method, "Handling request");
                let response = match self.route(&id, &method, &params, ctx).await {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(err) => {
                        tracing::debug!(
                            method = %method,
                            code = err.code(),
                            error = %err,
                            "Request failed"
                        );
                        err.to_response(id, self.dev_mode)
                    }
                };
                Some(response)
            }
            IncomingMessage::Notification { method, .. } => {
                tracing::debug!(method = %method, "Received notification");
                None
            }
            IncomingMessage::Response { id, result, error } => {
                self.route_client_response(&id, result, error);
                None
            }
        }
    }

    async fn route(
        &self,
        id: &Value,
        method: &str,
        params: &Value,
        ctx: &RequestContext,
    ) -> ProtocolResult<Value> {
        match method {
            "initialize" => Ok(self.initialize(params)),
            "notifications/initialized"
            | "initialized"
            | "notifications/cancelled"
            | "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(params),
            "tools/call" => {
                let request = ToolCallRequest::from_params(id.clone(), params)?;
                let result = self.call_tool(request, ctx).await?;
                serde_json::to_value(result).map_err(|e| ProtocolError::internal(e.to_string()))
            }
            "resources/list" => Ok(json!({ "resources": [] })),
            "resources/templates/list" => Ok(json!({ "resourceTemplates": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            "elicitation/submit" if self.elicitation.is_enabled() => {
                self.submit_elicitation(params)
            }
            "elicitation/cancel" if self.elicitation.is_enabled() => {
                self.cancel_elicitation(params)
            }
            _ => Err(ProtocolError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        tracing::info!("MCP initialize: protocol version {}", protocol_version);

        let mut capabilities = json!({
            "tools": { "listChanged": false },
            "resources": {},
            "prompts": {}
        });
        if self.elicitation.is_enabled() {
            capabilities["elicitation"] = json!({});
        }

        json!({
            "protocolVersion": protocol_version,
            "capabilities": capabilities,
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn list_tools(&self, params: &Value) -> ProtocolResult<Value> {
        let cursor = match params.get("cursor") {
            None | Some(Value::Null) => None,
            Some(Value::String(cursor)) => Some(cursor.as_str()),
            Some(_) => return Err(ProtocolError::invalid_params("'cursor' must be a string")),
        };

        let page = self.registry.list(cursor).map_err(|e| {
            ProtocolError::invalid_params_with_detail("Invalid cursor", e.to_string())
        })?;

        let tools: Vec<_> = page.tools.iter().map(|t| t.info()).collect();
        let mut result = json!({ "tools": tools });
        if let Some(next) = page.next_cursor {
            result["nextCursor"] = Value::String(next);
        }
        Ok(result)
    }

    /// Validate and run one tool call.
    ///
    /// Protocol errors are returned only for unknown tools and schema-invalid
    /// arguments; every handler outcome is an `Ok` result.
    pub async fn call_tool(
        &self,
        request: ToolCallRequest,
        ctx: &RequestContext,
    ) -> ProtocolResult<ToolCallResult> {
        let descriptor = self.registry.lookup(&request.name).map_err(|_| {
            ProtocolError::invalid_params(format!("Unknown tool: {}", request.name))
        })?;

        descriptor.validate_arguments(&request.arguments).map_err(|violations| {
            ProtocolError::invalid_params_with_detail(
                format!("Invalid arguments for tool '{}'", request.name),
                violations.join("; "),
            )
        })?;

        let limit = descriptor.timeout.unwrap_or(self.default_timeout);
        let cancellation = CancellationToken::new();
        let tool_ctx = ToolContext::new(Arc::clone(&self.catalog), Arc::clone(&self.elicitation))
            .with_principal(ctx.principal.clone())
            .with_outbound(ctx.outbound.clone())
            .with_cancellation(cancellation.clone());
        let call_id = tool_ctx.call_id().to_string();

        tracing::info!(tool = %request.name, call_id = %call_id, "Executing tool");

        let handler = Arc::clone(&descriptor.handler);
        let arguments = request.arguments;
        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            handler.execute(&tool_ctx, arguments).await
        }));

        let outcome = match tokio::time::timeout(limit, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    "handler panicked"
                } else {
                    "handler was cancelled"
                };
                Err(ToolError::Aborted(reason.to_string()))
            }
            Err(_elapsed) => {
                cancellation.cancel();
                let cancelled = self.elicitation.cancel_owned_by(&call_id);
                tracing::warn!(
                    tool = %request.name,
                    timeout_secs = limit.as_secs(),
                    cancelled_elicitations = cancelled,
                    "Tool execution timed out"
                );
                Err(ToolError::Timeout(limit))
            }
        };

        Ok(Self::finish(&descriptor, outcome))
    }

    fn finish(
        descriptor: &ToolDescriptor,
        outcome: Result<ToolCallResult, ToolError>,
    ) -> ToolCallResult {
        match outcome {
            Ok(result) => {
                if let Some(structured) = &result.structured_content {
                    if let Err(violations) = descriptor.validate_output(structured) {
                        tracing::error!(
                            tool = %descriptor.name,
                            violations = %violations.join("; "),
                            "Tool output does not match its output schema"
                        );
                        return ToolCallResult::error(
                            "Tool produced output that does not match its declared schema.",
                        );
                    }
                }
                result
            }
            Err(e) => {
                match &e {
                    ToolError::Timeout(_)
                    | ToolError::Validation { .. }
                    | ToolError::Elicitation(_) => {
                        tracing::warn!(
                            tool = %descriptor.name,
                            error = %e,
                            "Tool reported failure"
                        );
                    }
                    _ => {
                        tracing::error!(
                            tool = %descriptor.name,
                            error = %e,
                            "Tool execution failed"
                        );
                    }
                }
                ToolCallResult::error(e.to_user_message())
            }
        }
    }

    fn session_id(params: &Value) -> ProtocolResult<&str> {
        params
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::invalid_params("Missing 'sessionId' parameter"))
    }

    /// `elicitation/submit {sessionId, content, action?}`.
    fn submit_elicitation(&self, params: &Value) -> ProtocolResult<Value> {
        let id = Self::session_id(params)?;
        let action = params.get("action").and_then(Value::as_str).unwrap_or("accept");

        match action {
            "accept" => {
                let content = params
                    .get("content")
                    .cloned()
                    .ok_or_else(|| ProtocolError::invalid_params("Missing 'content' parameter"))?;
                self.elicitation.submit(id, content)?;
            }
            "decline" => self.elicitation.decline(id)?,
            "cancel" => self.elicitation.cancel(id)?,
            other => {
                return Err(ProtocolError::invalid_params(format!(
                    "Unknown action: {other}"
                )));
            }
        }

        Ok(self.session_state(id))
    }

    /// `elicitation/cancel {sessionId}`.
    fn cancel_elicitation(&self, params: &Value) -> ProtocolResult<Value> {
        let id = Self::session_id(params)?;
        self.elicitation.cancel(id)?;
        Ok(self.session_state(id))
    }

    fn session_state(&self, id: &str) -> Value {
        let state = self.elicitation.session(id).map(|s| s.state.to_string());
        json!({ "sessionId": id, "state": state })
    }

    /// A client answer to an `elicitation/create` request we sent.
    fn route_client_response(&self, id: &Value, result: Option<Value>, error: Option<Value>) {
        let Some(session_id) = id.as_str() else {
            tracing::debug!(id = %id, "Ignoring client response with non-string id");
            return;
        };

        let outcome = match (result, error) {
            (_, Some(error)) => {
                tracing::debug!(session_id, error = %error, "Client rejected elicitation");
                self.elicitation.cancel(session_id)
            }
            (Some(result), None) => match result.get("action").and_then(Value::as_str) {
                Some("accept") => {
                    let content = result.get("content").cloned().unwrap_or_else(|| json!({}));
                    self.elicitation.submit(session_id, content)
                }
                Some("decline") => self.elicitation.decline(session_id),
                _ => self.elicitation.cancel(session_id),
            },
            (None, None) => Err(ElicitationError::Cancelled),
        };

        if let Err(e) = outcome {
            tracing::debug!(session_id, error = %e, "Client response not applied");
        }
    }
}

impl std::fmt::Debug for McpDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpDispatcher")
            .field("tools", &self.registry.len())
            .field("default_timeout", &self.default_timeout)
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}
