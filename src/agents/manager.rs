//! Registry of live agents, message routing, events and workflows.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock, broadcast};
use uuid::Uuid;

use super::base::{Agent, AgentInfo, AgentReply};
use super::protocol::{AgentMessage, ConversationManager, MessageType};
use crate::error::AgentError;

/// Builds an agent from `(id, name)`.
pub type AgentFactory = Arc<dyn Fn(String, String) -> Arc<dyn Agent> + Send + Sync>;

const EVENT_CAPACITY: usize = 256;

/// Lifecycle and traffic events pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentCreated {
        agent_id: String,
        agent_type: String,
        name: String,
    },
    AgentRemoved {
        agent_id: String,
    },
    MessageSent {
        message_id: String,
        conversation_id: String,
        sender_id: String,
        receiver_id: String,
        message_type: MessageType,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowMember {
    pub agent_id: String,
    pub role: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub agents: Vec<WorkflowMember>,
}

pub struct AgentManager {
    factories: RwLock<HashMap<String, AgentFactory>>,
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
    conversations: Mutex<ConversationManager>,
    workflows: RwLock<HashMap<String, Workflow>>,
    events: broadcast::Sender<AgentEvent>,
}

impl Default for AgentManager {
    fn default() -> Self {
        Self::new()
    }
}

fn short_hex() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl AgentManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            factories: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            conversations: Mutex::new(ConversationManager::new()),
            workflows: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Register a factory for an agent type. Returns false if the type exists.
    pub async fn register_agent_type(&self, agent_type: &str, factory: AgentFactory) -> bool {
        let mut factories = self.factories.write().await;
        if factories.contains_key(agent_type) {
            tracing::warn!(agent_type, "Agent type already registered");
            return false;
        }
        factories.insert(agent_type.to_string(), factory);
        tracing::info!(agent_type, "Registered agent type");
        true
    }

    pub async fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    /// Create an agent. The id defaults to `<type>_<8 hex>`, the name to the
    /// capitalized type.
    pub async fn create_agent(
        &self,
        agent_type: &str,
        agent_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<Arc<dyn Agent>, AgentError> {
        let factory = self
            .factories
            .read()
            .await
            .get(agent_type)
            .cloned()
            .ok_or_else(|| AgentError::UnknownAgentType(agent_type.to_string()))?;

        let id = agent_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("{agent_type}_{}", short_hex()));
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| capitalize(agent_type));

        let mut agents = self.agents.write().await;
        if agents.contains_key(&id) {
            return Err(AgentError::DuplicateAgent(id));
        }
        let agent = factory(id.clone(), name.clone());
        agents.insert(id.clone(), agent.clone());
        drop(agents);

        tracing::info!(agent_id = %id, agent_type, "Agent created");
        self.emit(AgentEvent::AgentCreated {
            agent_id: id,
            agent_type: agent_type.to_string(),
            name,
        });
        Ok(agent)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// Info for every agent, sorted by id.
    pub async fn list_agents(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self
            .agents
            .read()
            .await
            .values()
            .map(|a| a.info())
            .collect();
        infos.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        infos
    }

    pub async fn remove_agent(&self, agent_id: &str) -> bool {
        let removed = self.agents.write().await.remove(agent_id).is_some();
        if removed {
            tracing::info!(agent_id, "Agent removed");
            self.emit(AgentEvent::AgentRemoved {
                agent_id: agent_id.to_string(),
            });
        }
        removed
    }

    /// Deliver a message from one agent to another and return the receiver's reply.
    pub async fn send_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        message_type: MessageType,
        content: Value,
        metadata: Option<Map<String, Value>>,
    ) -> Result<AgentReply, AgentError> {
        if self.get_agent(sender_id).await.is_none() {
            return Err(AgentError::UnknownAgent(sender_id.to_string()));
        }
        let receiver = self
            .get_agent(receiver_id)
            .await
            .ok_or_else(|| AgentError::UnknownAgent(receiver_id.to_string()))?;

        let mut message = AgentMessage::new(sender_id, receiver_id, message_type, content);
        if let Some(metadata) = metadata {
            message = message.with_metadata(metadata);
        }
        self.conversations.lock().await.add_message(message.clone());
        self.emit(AgentEvent::MessageSent {
            message_id: message.message_id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            message_type,
        });

        let reply = receiver.receive_message(message.clone()).await;
        match serde_json::to_value(&reply) {
            Ok(content) => {
                let reply_message = message.create_reply(content, None);
                self.conversations.lock().await.add_message(reply_message);
            }
            Err(e) => tracing::warn!(error = %e, "Could not record agent reply"),
        }
        Ok(reply)
    }

    /// Run `f` with read access to the conversation log.
    pub async fn with_conversations<R>(&self, f: impl FnOnce(&ConversationManager) -> R) -> R {
        f(&*self.conversations.lock().await)
    }

    /// Forget a finished conversation. Returns whether it was recorded.
    pub async fn clear_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.lock().await.clear(conversation_id)
    }

    pub async fn create_workflow(&self, name: &str, description: &str) -> Workflow {
        let workflow = Workflow {
            id: format!("workflow_{}", short_hex()),
            name: name.to_string(),
            description: description.to_string(),
            status: "created".to_string(),
            created_at: Utc::now(),
            agents: Vec::new(),
        };
        tracing::info!(workflow_id = %workflow.id, name, "Workflow created");
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        workflow
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// Add an agent to a workflow. Adding a member twice is a no-op.
    pub async fn add_agent_to_workflow(
        &self,
        workflow_id: &str,
        agent_id: &str,
        role: Option<&str>,
    ) -> Result<(), AgentError> {
        if self.get_agent(agent_id).await.is_none() {
            return Err(AgentError::UnknownAgent(agent_id.to_string()));
        }
        let mut workflows = self.workflows.write().await;
        let workflow = workflows.get_mut(workflow_id).ok_or_else(|| {
            AgentError::validation("workflow_id", format!("Unknown workflow: {workflow_id}"))
        })?;

        if workflow.agents.iter().any(|m| m.agent_id == agent_id) {
            tracing::debug!(workflow_id, agent_id, "Agent already in workflow");
            return Ok(());
        }
        workflow.agents.push(WorkflowMember {
            agent_id: agent_id.to_string(),
            role: role.unwrap_or("participant").to_string(),
            added_at: Utc::now(),
        });
        tracing::info!(workflow_id, agent_id, "Agent added to workflow");
        Ok(())
    }
}
