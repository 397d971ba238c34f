//! Specialized agents that exchange typed messages through a manager.

pub mod base;
pub mod email;
pub mod manager;
pub mod protocol;
pub mod recovery;
pub mod voice;

pub use base::{Agent, AgentCore, AgentInfo, AgentReply, BasicAgent, ReplyStatus};
pub use email::{EMAIL_AGENT_TYPE, EmailAgent};
pub use manager::{AgentEvent, AgentFactory, AgentManager, Workflow};
pub use protocol::{AgentMessage, ConversationManager, MessageType, TaskPriority};
pub use recovery::{ErrorReport, RetryPolicy, retry_with_backoff};
pub use voice::{VOICE_AGENT_TYPE, VoiceAgent};

/// Type name of the plain agent that stands in for the human user.
pub const GENERAL_AGENT_TYPE: &str = "general";

/// Id of the agent web requests are sent from by default.
pub const USER_AGENT_ID: &str = "user";
