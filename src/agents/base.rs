//! The `Agent` trait and the state every agent carries.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::protocol::{AgentMessage, MessageType};
use super::recovery::ErrorReport;
use crate::error::AgentError;

/// Identity plus the mutable bookkeeping shared by all agents.
#[derive(Debug)]
pub struct AgentCore {
    pub id: String,
    pub name: String,
    pub specialization: String,
    pub created_at: DateTime<Utc>,
    tools: Mutex<Vec<String>>,
    memory: Mutex<HashMap<String, Value>>,
    history: Mutex<Vec<AgentMessage>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AgentCore {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        specialization: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            specialization: specialization.into(),
            created_at: Utc::now(),
            tools: Mutex::new(Vec::new()),
            memory: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Register a tool name. Returns false if it was already there.
    pub fn add_tool(&self, tool: impl Into<String>) -> bool {
        let tool = tool.into();
        let mut tools = lock(&self.tools);
        if tools.contains(&tool) {
            return false;
        }
        tools.push(tool);
        true
    }

    pub fn tools(&self) -> Vec<String> {
        lock(&self.tools).clone()
    }

    pub fn remember(&self, key: impl Into<String>, value: Value) {
        lock(&self.memory).insert(key.into(), value);
    }

    pub fn recall(&self, key: &str) -> Option<Value> {
        lock(&self.memory).get(key).cloned()
    }

    pub fn record(&self, message: AgentMessage) {
        lock(&self.history).push(message);
    }

    pub fn history(&self) -> Vec<AgentMessage> {
        lock(&self.history).clone()
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            agent_id: self.id.clone(),
            name: self.name.clone(),
            specialization: self.specialization.clone(),
            tools: self.tools(),
            created_at: self.created_at,
            conversation_count: lock(&self.history).len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub name: String,
    pub specialization: String,
    pub tools: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub conversation_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Error,
    Received,
    NotImplemented,
}

/// What an agent sends back for a delivered message.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AgentReply {
    fn with_status(status: ReplyStatus) -> Self {
        Self {
            status,
            task_id: None,
            result: None,
            error: None,
            message: None,
        }
    }

    pub fn success(task_id: Option<String>, result: Value) -> Self {
        Self {
            task_id,
            result: Some(result),
            ..Self::with_status(ReplyStatus::Success)
        }
    }

    pub fn failure(task_id: Option<String>, report: ErrorReport) -> Self {
        Self {
            task_id,
            message: Some(report.message.clone()),
            error: Some(report),
            ..Self::with_status(ReplyStatus::Error)
        }
    }

    pub fn received() -> Self {
        Self {
            message: Some("Message received".into()),
            ..Self::with_status(ReplyStatus::Received)
        }
    }

    pub fn not_implemented(task_id: Option<String>) -> Self {
        Self {
            task_id,
            message: Some("Task processing is not implemented for this agent".into()),
            ..Self::with_status(ReplyStatus::NotImplemented)
        }
    }

    /// Wrap a task outcome, turning errors into an [`ErrorReport`].
    pub fn from_result(
        task_id: Option<String>,
        result: Result<Value, AgentError>,
        context: Value,
    ) -> Self {
        match result {
            Ok(value) => Self::success(task_id, value),
            Err(e) => Self::failure(task_id, ErrorReport::from_error(&e, context)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }
}

/// A task request unpacked from `{"task_id": .., "task_data": {"type": .., ..}}`.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task_id: Option<String>,
    pub task_type: String,
    pub data: Map<String, Value>,
}

impl TaskRequest {
    /// Unpack a message; `aliases` maps short task names to canonical ones.
    pub fn from_message(
        message: &AgentMessage,
        aliases: &[(&str, &str)],
    ) -> Result<Self, AgentError> {
        let task_id = message.content_str("task_id").map(str::to_string);
        let data = message
            .content
            .get("task_data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let raw = data
            .get("type")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if raw.is_empty() {
            return Err(AgentError::validation("type", "Task type is not specified"));
        }
        let lowered = raw.to_lowercase();
        let task_type = aliases
            .iter()
            .find(|(alias, _)| *alias == lowered)
            .map(|(_, canonical)| canonical.to_string())
            .unwrap_or_else(|| raw.to_string());

        Ok(Self {
            task_id,
            task_type,
            data,
        })
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn require_str(&self, key: &str) -> Result<&str, AgentError> {
        self.str(key)
            .ok_or_else(|| AgentError::validation(key, format!("'{key}' is required")))
    }

    pub fn unsupported(&self) -> AgentError {
        AgentError::validation("type", format!("Unsupported task type: {}", self.task_type))
    }
}

/// Default query answer: tool listing or agent info, plus capabilities.
pub fn answer_query(core: &AgentCore, message: &AgentMessage, capabilities: &[&str]) -> AgentReply {
    let query = message.content_str("query").unwrap_or_default().trim();
    let context = json!({ "agent_id": core.id, "message_id": message.message_id });
    if query.is_empty() {
        return AgentReply::from_result(
            None,
            Err(AgentError::validation("query", "No query was provided")),
            context,
        );
    }

    let lowered = query.to_lowercase();
    let result = if lowered.contains("tools") || lowered.contains("capabilities") {
        json!({ "tools": core.tools(), "capabilities": capabilities })
    } else {
        json!({ "agent_info": core.info(), "capabilities": capabilities })
    };
    AgentReply::success(None, result)
}

/// An agent that can receive messages.
#[async_trait]
pub trait Agent: Send + Sync {
    fn core(&self) -> &AgentCore;

    fn id(&self) -> &str {
        &self.core().id
    }

    fn info(&self) -> AgentInfo {
        self.core().info()
    }

    async fn process_task(&self, message: &AgentMessage) -> AgentReply {
        AgentReply::not_implemented(message.content_str("task_id").map(str::to_string))
    }

    async fn handle_query(&self, _message: &AgentMessage) -> AgentReply {
        AgentReply::received()
    }

    /// Record the message, then dispatch it by type.
    async fn receive_message(&self, message: AgentMessage) -> AgentReply {
        tracing::debug!(
            agent_id = %self.id(),
            message_type = %message.message_type,
            sender = %message.sender_id,
            "Agent received message"
        );
        self.core().record(message.clone());
        match message.message_type {
            MessageType::TaskRequest => self.process_task(&message).await,
            MessageType::Query => self.handle_query(&message).await,
            _ => AgentReply::received(),
        }
    }
}

/// Agent with no specialization; acknowledges everything.
pub struct BasicAgent {
    core: AgentCore,
}

impl BasicAgent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            core: AgentCore::new(id, name, "general"),
        }
    }
}

#[async_trait]
impl Agent for BasicAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }
}
