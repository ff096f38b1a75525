//! Startup-populated tool registry.
//!
//! Tools are registered once while the registry is still owned mutably. After it is
//! wrapped in an `Arc` and shared, it is read-only and needs no locking.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use jsonschema::Validator;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::McpTool;
use crate::schema;

static TOOL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,128}$").expect("valid tool name pattern"));

/// Whether `name` is a legal tool name.
#[must_use]
pub fn is_valid_tool_name(name: &str) -> bool {
    TOOL_NAME.is_match(name)
}

/// Registration failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with this name is already registered.
    #[error("tool '{0}' is already registered")]
    DuplicateName(String),

    /// Name does not match `^[A-Za-z0-9_.-]{1,128}$`.
    #[error("tool name '{0}' must be 1-128 characters of A-Z, a-z, 0-9, '_', '-' or '.'")]
    InvalidNamePattern(String),

    /// Input or output schema failed to compile.
    #[error("tool '{name}' has an invalid schema: {reason}")]
    InvalidSchema {
        /// Tool name
        name: String,
        /// Compiler message
        reason: String,
    },

    /// Lookup miss.
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// Cursor is not a position in the listing.
    #[error("invalid cursor '{0}'")]
    InvalidCursor(String),
}

/// A registered tool with its compiled schemas.
pub struct ToolDescriptor {
    /// Unique name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Input JSON schema as advertised.
    pub input_schema: Value,
    /// Output JSON schema, if the tool returns structured content.
    pub output_schema: Option<Value>,
    /// Per-tool timeout override.
    pub timeout: Option<Duration>,
    /// Handler.
    pub handler: Arc<dyn McpTool>,
    input_validator: Validator,
    output_validator: Option<Validator>,
}

impl ToolDescriptor {
    /// Build a descriptor, compiling the tool's schemas.
    pub fn new(handler: Arc<dyn McpTool>) -> Result<Self, RegistryError> {
        let name = handler.name().to_string();
        if !is_valid_tool_name(&name) {
            return Err(RegistryError::InvalidNamePattern(name));
        }

        let invalid = |reason: String| RegistryError::InvalidSchema {
            name: name.clone(),
            reason,
        };

        let input_schema = handler.input_schema();
        let input_validator = schema::compile(&input_schema).map_err(invalid)?;

        let output_schema = handler.output_schema();
        let output_validator = output_schema
            .as_ref()
            .map(schema::compile)
            .transpose()
            .map_err(invalid)?;

        Ok(Self {
            description: handler.description().to_string(),
            timeout: handler.timeout(),
            name,
            input_schema,
            output_schema,
            handler,
            input_validator,
            output_validator,
        })
    }

    /// Check call arguments against the input schema.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), Vec<String>> {
        let errors = schema::violations(&self.input_validator, arguments);
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Check structured output against the output schema, if one is declared.
    pub fn validate_output(&self, structured: &Value) -> Result<(), Vec<String>> {
        let Some(validator) = &self.output_validator else {
            return Ok(());
        };
        let errors = schema::violations(validator, structured);
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Wire representation for `tools/list`.
    #[must_use]
    pub fn info(&self) -> McpToolInfo<'_> {
        McpToolInfo {
            name: &self.name,
            description: &self.description,
            input_schema: &self.input_schema,
            output_schema: self.output_schema.as_ref(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("has_output_schema", &self.output_schema.is_some())
            .finish()
    }
}

/// MCP tool info for tools/list response.
#[derive(Debug, Serialize)]
pub struct McpToolInfo<'a> {
    pub name: &'a str,
    pub description: &'a str,
    #[serde(rename = "inputSchema")]
    pub input_schema: &'a Value,
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<&'a Value>,
}

/// One page of `tools/list`.
#[derive(Debug)]
pub struct ToolPage<'a> {
    /// Descriptors in registration order.
    pub tools: Vec<&'a ToolDescriptor>,
    /// Cursor for the next page, absent on the last page.
    pub next_cursor: Option<String>,
}

/// Registered tools in registration order.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDescriptor>>,
    index: HashMap<String, usize>,
    page_size: usize,
}

impl ToolRegistry {
    /// Create an empty registry listing `page_size` tools per page.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            page_size: page_size.max(1),
        }
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, tool: Arc<dyn McpTool>) -> Result<(), RegistryError> {
        if self.index.contains_key(tool.name()) {
            return Err(RegistryError::DuplicateName(tool.name().to_string()));
        }

        let descriptor = ToolDescriptor::new(tool)?;
        tracing::debug!(tool = %descriptor.name, "Registered tool");

        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(Arc::new(descriptor));
        Ok(())
    }

    /// Find a tool by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<ToolDescriptor>, RegistryError> {
        self.index
            .get(name)
            .and_then(|&i| self.tools.get(i))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// A page of tools starting at `cursor`.
    ///
    /// Cursors are opaque to clients; internally they are the decimal offset of the
    /// first tool on the page.
    pub fn list(&self, cursor: Option<&str>) -> Result<ToolPage<'_>, RegistryError> {
        let start = match cursor {
            None => 0,
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|&offset| offset <= self.tools.len())
                .ok_or_else(|| RegistryError::InvalidCursor(raw.to_string()))?,
        };

        let end = start.saturating_add(self.page_size).min(self.tools.len());
        let tools = self.tools[start..end].iter().map(AsRef::as_ref).collect();
        let next_cursor = (end < self.tools.len()).then(|| end.to_string());

        Ok(ToolPage {
            tools,
            next_cursor,
        })
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}
