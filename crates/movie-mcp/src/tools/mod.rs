//! MCP tool implementations.
//!
//! Each tool:
//! 1. Deserializes its already schema-validated arguments
//! 2. Queries the movie catalogue, optionally eliciting more input from the user
//! 3. Formats the answer as text, with structured output where declared

mod interactive;
mod movies;
pub mod registry;

pub use interactive::*;
pub use movies::*;
pub use registry::{McpToolInfo, RegistryError, ToolDescriptor, ToolPage, ToolRegistry};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::auth::Principal;
use crate::catalog::MovieCatalog;
use crate::config::Config;
use crate::error::{ElicitationError, ToolResult};
use crate::models::ElicitationForm;
use crate::server::elicitation::ElicitationCoordinator;
use crate::server::jsonrpc::JSONRPC_VERSION;
use crate::server::session::Outbound;

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// Block body
        text: String,
    },
}

/// Outcome of a tool invocation.
///
/// `is_error` marks a business-level failure; the JSON-RPC response itself still succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolCallResult {
    /// Successful result with one text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
            structured_content: None,
        }
    }

    /// Failed result with one text block.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }

    /// Attach structured output.
    #[must_use]
    pub fn with_structured(mut self, structured: Value) -> Self {
        self.structured_content = Some(structured);
        self
    }

    /// Concatenated text of all blocks.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Tool execution context.
///
/// Built per call by the dispatcher; handlers never share one.
pub struct ToolContext {
    /// Movie dataset.
    pub catalog: Arc<MovieCatalog>,

    /// Authenticated caller, when authentication is enabled.
    pub principal: Option<Principal>,

    cancellation: CancellationToken,
    elicitation: Arc<ElicitationCoordinator>,
    outbound: Option<Arc<dyn Outbound>>,
    call_id: String,
}

impl ToolContext {
    /// Create a context with no caller channel.
    #[must_use]
    pub fn new(catalog: Arc<MovieCatalog>, elicitation: Arc<ElicitationCoordinator>) -> Self {
        Self {
            catalog,
            principal: None,
            cancellation: CancellationToken::new(),
            elicitation,
            outbound: None,
            call_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Option<Principal>) -> Self {
        self.principal = principal;
        self
    }

    /// Channel used to deliver `elicitation/create` requests.
    #[must_use]
    pub fn with_outbound(mut self, outbound: Option<Arc<dyn Outbound>>) -> Self {
        self.outbound = outbound;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Identifier grouping the elicitation sessions this call opens.
    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Signal triggered when the call is abandoned.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the call has been abandoned.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Ask the caller for input matching `schema` and suspend until it arrives.
    ///
    /// Resolves with the validated response, or with the reason the session ended.
    pub async fn elicit(&self, message: &str, schema: Value) -> Result<Value, ElicitationError> {
        let pending = self
            .elicitation
            .create(schema.clone(), message, None, Some(&self.call_id))?;

        let Some(outbound) = &self.outbound else {
            return Err(ElicitationError::Undeliverable);
        };

        let request = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": pending.id(),
            "method": "elicitation/create",
            "params": {
                "message": message,
                "requestedSchema": schema,
                "sessionId": pending.id(),
            }
        });
        outbound.send(request).await?;
        tracing::debug!(
            session_id = %pending.id(),
            call_id = %self.call_id,
            "Elicitation requested"
        );

        tokio::select! {
            outcome = pending.wait() => outcome,
            () = self.cancellation.cancelled() => Err(ElicitationError::Cancelled),
        }
    }

    /// Elicit a typed form.
    pub async fn elicit_form<T: ElicitationForm>(&self, message: &str) -> ToolResult<T> {
        let value = self.elicit(message, T::schema()).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("call_id", &self.call_id)
            .field("principal", &self.principal.as_ref().map(|p| &p.subject))
            .field("has_outbound", &self.outbound.is_some())
            .finish_non_exhaustive()
    }
}

/// Trait for MCP tools.
#[async_trait::async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "suggest_movie").
    fn name(&self) -> &'static str;

    /// Tool description for LLM.
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// JSON Schema for `structuredContent`, if the tool returns any.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Per-tool override of the default call timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the tool with arguments that already passed `input_schema`.
    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult<ToolCallResult>;
}

/// Register all tools.
///
/// Elicitation-backed tools are only registered when elicitation is enabled.
pub fn register_all_tools(config: &Config) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new(config.page_size);

    // Catalogue tools (3)
    registry.register(Arc::new(movies::SuggestMovieTool))?;
    registry.register(Arc::new(movies::TopMoviesTool))?;
    registry.register(Arc::new(movies::SearchMoviesTool))?;

    // Elicitation tools (3)
    if config.enable_elicitation {
        registry.register(Arc::new(interactive::SuggestMovieElicitationTool))?;
        registry.register(Arc::new(interactive::PersonalizedWatchlistTool))?;
        registry.register(Arc::new(interactive::CompareMoviesTool))?;
    }

    Ok(registry)
}
