//! Per-request context handed to tools.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::persona::Persona;

/// Context for a tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolContext {
    /// Unique id of the dispatcher turn (or agent task) that triggered the call.
    pub request_id: Uuid,
    /// Chat session, when the call originates from the web API.
    pub session_id: Option<String>,
    /// Persona active for this request.
    pub persona: Option<Persona>,
    pub started_at: DateTime<Utc>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            session_id: None,
            persona: None,
            started_at: Utc::now(),
        }
    }
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_persona(mut self, persona: Option<Persona>) -> Self {
        self.persona = persona;
        self
    }
}
