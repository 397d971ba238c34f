//! The `Tool` trait and its result/error types.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ToolContext;
use crate::error::{IntegrationError, LlmError};
use crate::llm::ToolDefinition;

/// Which integration a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolDomain {
    Voice,
    Email,
    Documents,
    General,
}

/// Errors raised by tools and the registry.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool {0} not found")]
    NotFound(String),

    #[error("Invalid schema for tool {name}: {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("Tool {0} is registered more than once")]
    Duplicate(String),

    #[error("No tools are registered")]
    Empty,

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Json(Value),
    Binary(Vec<u8>),
}

/// Output of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub result: ToolPayload,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: Value, duration: Duration) -> Self {
        Self {
            result: ToolPayload::Json(result),
            duration,
        }
    }

    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self::success(Value::String(text.into()), duration)
    }

    pub fn binary(bytes: Vec<u8>, duration: Duration) -> Self {
        Self {
            result: ToolPayload::Binary(bytes),
            duration,
        }
    }

    /// Text handed back to the model as the tool result.
    pub fn to_model_content(&self) -> String {
        match &self.result {
            ToolPayload::Json(Value::String(s)) => s.clone(),
            ToolPayload::Json(value) => value.to_string(),
            ToolPayload::Binary(_) => "[Binary data]".to_string(),
        }
    }
}

/// A function the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema (`type: object`) describing the parameters.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;

    fn domain(&self) -> ToolDomain {
        ToolDomain::General
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Required non-empty string parameter.
pub fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    optional_str(params, key)
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing required parameter '{key}'")))
}

/// Optional string parameter; blank strings count as absent.
pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Optional unsigned integer parameter. Accepts numeric strings too, since models send both.
pub fn optional_u64(params: &Value, key: &str) -> Result<Option<u64>, ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| ToolError::InvalidParameters(format!("'{key}' must be a non-negative integer"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ToolError::InvalidParameters(format!("'{key}' must be a non-negative integer"))),
        Some(_) => Err(ToolError::InvalidParameters(format!(
            "'{key}' must be a non-negative integer"
        ))),
    }
}

/// Optional float parameter.
pub fn optional_f64(params: &Value, key: &str) -> Result<Option<f64>, ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ToolError::InvalidParameters(format!("'{key}' must be a number"))),
        Some(_) => Err(ToolError::InvalidParameters(format!("'{key}' must be a number"))),
    }
}

/// Optional list of strings; a single comma-separated string is split.
pub fn optional_str_list(params: &Value, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
