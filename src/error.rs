//! Error types for AI Secretary.

use std::time::Duration;

use serde::Serialize;

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),

    #[error("Integration error: {0}")]
    Integration(#[from] IntegrationError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the external services (speech, mailbox, document workspace).
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error("{service} is not configured: {hint}")]
    NotConfigured { service: String, hint: String },

    #[error("{service} request failed: {reason}")]
    Http { service: String, reason: String },

    #[error("{service} API returned {status}: {message}")]
    Api {
        service: String,
        status: u16,
        message: String,
    },

    #[error("{service} rate limited, retry after {retry_after:?}")]
    RateLimited {
        service: String,
        retry_after: Option<Duration>,
    },

    #[error("{service} protocol error: {reason}")]
    Protocol { service: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How loudly an agent failure should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Errors raised while agents handle tasks and messages.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Validation failed{}: {message}", field_suffix(.field))]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("{api} API error{}: {message}", status_suffix(.status))]
    Api {
        api: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{api} rate limit exceeded")]
    RateLimited {
        api: String,
        retry_after: Option<Duration>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Agent {0} not found")]
    UnknownAgent(String),

    #[error("Agent type {0} is not registered")]
    UnknownAgentType(String),

    #[error("Agent {0} already exists")]
    DuplicateAgent(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn field_suffix(field: &Option<String>) -> String {
    field
        .as_deref()
        .map(|f| format!(" for '{f}'"))
        .unwrap_or_default()
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl AgentError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Api { .. } => "API_ERROR",
            Self::RateLimited { .. } => "API_RATE_LIMIT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::UnknownAgent(_) | Self::UnknownAgentType(_) | Self::DuplicateAgent(_) => {
                "AGENT_ERROR"
            }
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation { .. } => ErrorSeverity::Low,
            Self::Network(_) | Self::Api { .. } | Self::RateLimited { .. } => ErrorSeverity::Medium,
            Self::UnknownAgent(_) | Self::UnknownAgentType(_) | Self::DuplicateAgent(_) => {
                ErrorSeverity::Medium
            }
            Self::Config(_) | Self::Internal(_) => ErrorSeverity::High,
        }
    }

    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Api { .. } | Self::RateLimited { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<IntegrationError> for AgentError {
    fn from(err: IntegrationError) -> Self {
        match err {
            IntegrationError::NotConfigured { service, hint } => {
                Self::Config(format!("{service}: {hint}"))
            }
            IntegrationError::Http { service, reason } => {
                Self::Network(format!("{service}: {reason}"))
            }
            IntegrationError::Api {
                service,
                status,
                message,
            } => Self::Api {
                api: service,
                status: Some(status),
                message,
            },
            IntegrationError::RateLimited {
                service,
                retry_after,
            } => Self::RateLimited {
                api: service,
                retry_after,
            },
            IntegrationError::Protocol { service, reason } => Self::Api {
                api: service,
                status: None,
                message: reason,
            },
            IntegrationError::InvalidInput(message) => Self::Validation {
                field: None,
                message,
            },
            IntegrationError::NotFound(what) => Self::Validation {
                field: None,
                message: format!("not found: {what}"),
            },
            IntegrationError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited {
                provider,
                retry_after,
            } => Self::RateLimited {
                api: provider,
                retry_after,
            },
            LlmError::RequestFailed { provider, reason } => Self::Api {
                api: provider,
                status: None,
                message: reason,
            },
            LlmError::AuthFailed { provider } => {
                Self::Config(format!("authentication failed for {provider}"))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result type alias for the assistant.
pub type Result<T> = std::result::Result<T, Error>;
