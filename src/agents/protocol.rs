//! Messages exchanged between agents and the per-conversation log.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of an inter-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskRequest,
    TaskResponse,
    Query,
    Info,
    StatusUpdate,
    Error,
    System,
    Feedback,
    Clarification,
    Completion,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskRequest => "task_request",
            Self::TaskResponse => "task_response",
            Self::Query => "query",
            Self::Info => "info",
            Self::StatusUpdate => "status_update",
            Self::Error => "error",
            Self::System => "system",
            Self::Feedback => "feedback",
            Self::Clarification => "clarification",
            Self::Completion => "completion",
        }
    }

    /// Type used for a reply when the caller does not pick one.
    pub fn reply_type(&self) -> MessageType {
        match self {
            Self::TaskRequest => Self::TaskResponse,
            Self::Query | Self::Clarification => Self::Info,
            _ => Self::Feedback,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_request" => Ok(Self::TaskRequest),
            "task_response" => Ok(Self::TaskResponse),
            "query" => Ok(Self::Query),
            "info" => Ok(Self::Info),
            "status_update" => Ok(Self::StatusUpdate),
            "error" => Ok(Self::Error),
            "system" => Ok(Self::System),
            "feedback" => Ok(Self::Feedback),
            "clarification" => Ok(Self::Clarification),
            "completion" => Ok(Self::Completion),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// One message between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message_type: MessageType,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl AgentMessage {
    /// New message opening a fresh conversation.
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        message_type: MessageType,
        content: Value,
    ) -> Self {
        Self {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            conversation_id: format!("conv_{}", Uuid::new_v4().simple()),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            message_type,
            content,
            timestamp: Utc::now(),
            in_reply_to: None,
            priority: TaskPriority::default(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Reply in the same conversation, addressed back to the sender.
    pub fn create_reply(&self, content: Value, message_type: Option<MessageType>) -> AgentMessage {
        let mut reply = AgentMessage::new(
            self.receiver_id.clone(),
            self.sender_id.clone(),
            message_type.unwrap_or_else(|| self.message_type.reply_type()),
            content,
        );
        reply.conversation_id = self.conversation_id.clone();
        reply.in_reply_to = Some(self.message_id.clone());
        reply.priority = self.priority;
        reply.metadata = self.metadata.clone();
        reply
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// String field of an object-shaped content, if present.
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }
}

/// Shape returned by [`ConversationManager::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub message_count: usize,
    pub recent_messages: Vec<AgentMessage>,
    pub participants: BTreeSet<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Conversations kept before the oldest is dropped.
pub const MAX_CONVERSATIONS: usize = 500;

/// Messages grouped by conversation id, in arrival order.
///
/// At most `capacity` conversations are kept; starting one more evicts the
/// conversation that was started first.
#[derive(Debug)]
pub struct ConversationManager {
    conversations: HashMap<String, Vec<AgentMessage>>,
    started: VecDeque<String>,
    capacity: usize,
}

impl Default for ConversationManager {
    fn default() -> Self {
        Self::with_capacity(MAX_CONVERSATIONS)
    }
}

impl ConversationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            conversations: HashMap::new(),
            started: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn add_message(&mut self, message: AgentMessage) {
        tracing::debug!(
            conversation_id = %message.conversation_id,
            message_id = %message.message_id,
            "Recorded agent message"
        );
        if !self.conversations.contains_key(&message.conversation_id) {
            while self.conversations.len() >= self.capacity {
                let Some(oldest) = self.started.pop_front() else {
                    break;
                };
                if self.conversations.remove(&oldest).is_some() {
                    tracing::debug!(conversation_id = %oldest, "Evicted oldest conversation");
                }
            }
            self.started.push_back(message.conversation_id.clone());
        }
        self.conversations
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    pub fn get_conversation(&self, conversation_id: &str) -> &[AgentMessage] {
        self.conversations
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get_message_by_id(&self, message_id: &str) -> Option<&AgentMessage> {
        self.conversations
            .values()
            .flatten()
            .find(|m| m.message_id == message_id)
    }

    /// Count, participants and the last `limit` messages of a conversation.
    pub fn summary(&self, conversation_id: &str, limit: usize) -> ConversationSummary {
        let messages = self.get_conversation(conversation_id);
        let participants = messages
            .iter()
            .flat_map(|m| [m.sender_id.clone(), m.receiver_id.clone()])
            .collect();
        let start = messages.len().saturating_sub(limit);

        ConversationSummary {
            conversation_id: conversation_id.to_string(),
            message_count: messages.len(),
            recent_messages: messages[start..].to_vec(),
            participants,
            started_at: messages.first().map(|m| m.timestamp),
            last_updated: messages.last().map(|m| m.timestamp),
        }
    }

    /// Pretty-printed JSON dump of a conversation.
    pub fn export(&self, conversation_id: &str) -> serde_json::Result<String> {
        let messages = self.get_conversation(conversation_id);
        serde_json::to_string_pretty(&serde_json::json!({
            "conversation_id": conversation_id,
            "message_count": messages.len(),
            "messages": messages,
            "exported_at": Utc::now(),
        }))
    }

    /// Drop a conversation. Returns whether it existed.
    pub fn clear(&mut self, conversation_id: &str) -> bool {
        let removed = self.conversations.remove(conversation_id).is_some();
        if removed {
            self.started.retain(|id| id != conversation_id);
            tracing::info!(conversation_id, "Conversation cleared");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_message_keeps_given_fields() {
        let msg = AgentMessage::new("user", "voice_1", MessageType::Query, json!({"query": "tools"}));
        assert_eq!(msg.sender_id, "user");
        assert_eq!(msg.receiver_id, "voice_1");
        assert_eq!(msg.message_type, MessageType::Query);
        assert_eq!(msg.content, json!({"query": "tools"}));
        assert!(msg.message_id.starts_with("msg_"));
        assert!(msg.conversation_id.starts_with("conv_"));
        assert_eq!(msg.priority, TaskPriority::Medium);
        assert!(msg.in_reply_to.is_none());
    }

    #[test]
    fn reply_swaps_parties_and_keeps_conversation() {
        let mut meta = serde_json::Map::new();
        meta.insert("trace".into(), json!("t-1"));
        let msg = AgentMessage::new("a", "b", MessageType::TaskRequest, json!({}))
            .with_priority(TaskPriority::High)
            .with_metadata(meta.clone());

        let reply = msg.create_reply(json!({"status": "success"}), None);
        assert_eq!(reply.sender_id, "b");
        assert_eq!(reply.receiver_id, "a");
        assert_eq!(reply.conversation_id, msg.conversation_id);
        assert_eq!(reply.in_reply_to.as_deref(), Some(msg.message_id.as_str()));
        assert_eq!(reply.message_type, MessageType::TaskResponse);
        assert_eq!(reply.metadata, meta);
        assert_ne!(reply.message_id, msg.message_id);

        let explicit = msg.create_reply(json!(null), Some(MessageType::Error));
        assert_eq!(explicit.message_type, MessageType::Error);
    }

    #[test]
    fn default_reply_types() {
        assert_eq!(MessageType::TaskRequest.reply_type(), MessageType::TaskResponse);
        assert_eq!(MessageType::Query.reply_type(), MessageType::Info);
        assert_eq!(MessageType::Clarification.reply_type(), MessageType::Info);
        assert_eq!(MessageType::Info.reply_type(), MessageType::Feedback);
        assert_eq!(MessageType::StatusUpdate.reply_type(), MessageType::Feedback);
    }

    #[test]
    fn message_type_parses_wire_names() {
        assert_eq!("status_update".parse::<MessageType>().unwrap(), MessageType::StatusUpdate);
        assert_eq!(MessageType::TaskRequest.to_string(), "task_request");
        assert!("shout".parse::<MessageType>().is_err());
        assert_eq!(
            serde_json::to_value(MessageType::Clarification).unwrap(),
            json!("clarification")
        );
    }

    #[test]
    fn json_round_trip() {
        let msg = AgentMessage::new("a", "b", MessageType::Info, json!({"k": [1, 2]}));
        let back = AgentMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn conversation_summary_export_and_clear() {
        let mut conversations = ConversationManager::new();
        let first = AgentMessage::new("user", "email_1", MessageType::TaskRequest, json!({}));
        let conv = first.conversation_id.clone();
        let first_id = first.message_id.clone();
        let reply = first.create_reply(json!({"status": "success"}), None);
        conversations.add_message(first);
        conversations.add_message(reply);
        for i in 0..5 {
            conversations.add_message(
                AgentMessage::new("user", "voice_1", MessageType::Info, json!(i)).with_conversation(&conv),
            );
        }

        assert_eq!(conversations.get_conversation(&conv).len(), 7);
        assert!(conversations.get_message_by_id(&first_id).is_some());
        assert!(conversations.get_message_by_id("msg_nope").is_none());

        let summary = conversations.summary(&conv, 5);
        assert_eq!(summary.message_count, 7);
        assert_eq!(summary.recent_messages.len(), 5);
        assert_eq!(summary.recent_messages[4].content, json!(4));
        assert_eq!(
            summary.participants.into_iter().collect::<Vec<_>>(),
            vec!["email_1", "user", "voice_1"]
        );
        assert!(summary.started_at <= summary.last_updated);

        let exported: Value = serde_json::from_str(&conversations.export(&conv).unwrap()).unwrap();
        assert_eq!(exported["message_count"], 7);
        assert!(exported["exported_at"].is_string());

        assert!(conversations.clear(&conv));
        assert!(!conversations.clear(&conv));
        let empty = conversations.summary(&conv, 5);
        assert_eq!(empty.message_count, 0);
        assert!(empty.started_at.is_none());
    }

    #[test]
    fn oldest_conversation_is_evicted_at_capacity() {
        let mut conversations = ConversationManager::with_capacity(2);
        let first = AgentMessage::new("user", "email_1", MessageType::Query, json!(1));
        let second = AgentMessage::new("user", "email_1", MessageType::Query, json!(2));
        let first_conv = first.conversation_id.clone();
        let second_conv = second.conversation_id.clone();
        conversations.add_message(first);
        conversations.add_message(second);
        conversations.add_message(
            AgentMessage::new("email_1", "user", MessageType::Info, json!(1.5))
                .with_conversation(&first_conv),
        );
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations.get_conversation(&first_conv).len(), 2);

        let third = AgentMessage::new("user", "voice_1", MessageType::Query, json!(3));
        let third_conv = third.conversation_id.clone();
        conversations.add_message(third);

        assert_eq!(conversations.len(), 2);
        assert!(conversations.get_conversation(&first_conv).is_empty());
        assert_eq!(conversations.get_conversation(&second_conv).len(), 1);
        assert_eq!(conversations.get_conversation(&third_conv).len(), 1);
    }

    #[test]
    fn cleared_conversations_free_their_slot() {
        let mut conversations = ConversationManager::with_capacity(2);
        let first = AgentMessage::new("user", "a", MessageType::Query, json!(1));
        let second = AgentMessage::new("user", "b", MessageType::Query, json!(2));
        let first_conv = first.conversation_id.clone();
        let second_conv = second.conversation_id.clone();
        conversations.add_message(first);
        conversations.add_message(second);

        assert!(conversations.clear(&second_conv));
        conversations.add_message(AgentMessage::new("user", "c", MessageType::Query, json!(3)));
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations.get_conversation(&first_conv).len(), 1);
    }
}
