//! Agent handling mailbox tasks and drafting replies with the LLM.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::base::{Agent, AgentCore, AgentReply, TaskRequest, answer_query};
use super::protocol::AgentMessage;
use super::recovery::{RetryPolicy, retry_with_backoff};
use crate::error::AgentError;
use crate::integrations::Mailbox;
use crate::integrations::mailbox::DEFAULT_SUMMARY_RESULTS;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::persona::{Persona, build_personalized_prompt};
use crate::prompts::PromptLibrary;
use crate::tools::builtin::email::search_query_from_params;

pub const EMAIL_AGENT_TYPE: &str = "email";

const CAPABILITIES: &[&str] = &[
    "search_emails",
    "get_email_details",
    "generate_reply",
    "send_reply",
    "save_attachments",
    "get_daily_email_summary",
];

const REPLY_MAX_TOKENS: u32 = 500;
const REPLY_TEMPERATURE: f64 = 0.7;

pub struct EmailAgent {
    core: AgentCore,
    mailbox: Arc<dyn Mailbox>,
    llm: Arc<dyn LlmProvider>,
    prompts: PromptLibrary,
    retry: RetryPolicy,
}

impl EmailAgent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mailbox: Arc<dyn Mailbox>,
        llm: Arc<dyn LlmProvider>,
        prompts: PromptLibrary,
    ) -> Self {
        let core = AgentCore::new(id, name, "email_management");
        for tool in CAPABILITIES {
            core.add_tool(*tool);
        }
        Self {
            core,
            mailbox,
            llm,
            prompts,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn run(&self, task: &TaskRequest) -> Result<Value, AgentError> {
        let mailbox = &self.mailbox;
        match task.task_type.as_str() {
            "search_emails" => {
                let query = search_query_from_params(&Value::Object(task.data.clone()))
                    .map_err(|e| AgentError::validation("task_data", e.to_string()))?;
                let emails = retry_with_backoff(&self.retry, "search_emails", || {
                    let query = query.clone();
                    async move { Ok(mailbox.search(query).await?) }
                })
                .await?;
                Ok(json!({ "count": emails.len(), "emails": emails }))
            }
            "get_email_details" => {
                let email_id = task.require_str("email_id")?;
                let email = retry_with_backoff(&self.retry, "get_email_details", || async move {
                    Ok(mailbox.fetch(email_id).await?)
                })
                .await?;
                Ok(json!(email))
            }
            "generate_reply" => self.generate_reply(task).await,
            "send_reply" => {
                let email_id = task.require_str("email_id")?;
                let body = task.require_str("reply_body")?;
                retry_with_backoff(&self.retry, "send_reply", || async move {
                    Ok(mailbox.reply(email_id, body).await?)
                })
                .await?;
                Ok(json!({ "message": "Reply sent successfully.", "email_id": email_id }))
            }
            "save_attachments" => {
                let email_id = task.require_str("email_id")?;
                let dir = PathBuf::from(task.require_str("save_path")?);
                let dir = dir.as_path();
                let saved = retry_with_backoff(&self.retry, "save_attachments", || async move {
                    Ok(mailbox.save_attachments(email_id, dir).await?)
                })
                .await?;
                Ok(json!({
                    "message": format!("Saved {} attachment(s)", saved.len()),
                    "saved": saved,
                }))
            }
            "get_daily_email_summary" => {
                let days_ago = match task.data.get("days_ago") {
                    None | Some(Value::Null) => 0,
                    Some(v) => v.as_i64().ok_or_else(|| {
                        AgentError::validation("days_ago", "days_ago must be an integer")
                    })?,
                };
                let max_results = task
                    .data
                    .get("max_results")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_SUMMARY_RESULTS);
                let summary = retry_with_backoff(&self.retry, "get_daily_email_summary", || async move {
                    Ok(mailbox.daily_summary(days_ago, max_results).await?)
                })
                .await?;
                Ok(json!({
                    "message": summary.message(),
                    "date": summary.date,
                    "emails": summary.emails,
                }))
            }
            _ => Err(task.unsupported()),
        }
    }

    /// Draft a reply. The original email comes from the task fields, or is
    /// fetched when only `email_id` is given.
    async fn generate_reply(&self, task: &TaskRequest) -> Result<Value, AgentError> {
        let mut subject = task.str("subject").unwrap_or_default().to_string();
        let mut body = task.str("body").unwrap_or_default().to_string();
        let mut sender = task.str("from").unwrap_or_default().to_string();

        if body.is_empty() {
            let email_id = task.str("email_id").ok_or_else(|| {
                AgentError::validation("body", "Provide the original email body or an email_id")
            })?;
            let mailbox = &self.mailbox;
            let email = retry_with_backoff(&self.retry, "get_email_details", || async move {
                Ok(mailbox.fetch(email_id).await?)
            })
            .await?;
            subject = email.summary.subject;
            body = email.body;
            sender = email.summary.from;
        }

        let persona: Option<Persona> = task
            .data
            .get("persona")
            .filter(|p| !p.is_null())
            .and_then(|p| serde_json::from_value(p.clone()).ok());

        let base = format!(
            "{preamble}\n\n[Requested tone]: {tone}\n[Original subject]: {subject}\n\
             [Original body]: {body}\n[Sender]: {sender}\n[History]: {history}\n\
             [Extra instructions]: {extra}",
            preamble = self.prompts.email_reply_preamble,
            tone = task.str("tone").unwrap_or_default(),
            history = task.str("history").unwrap_or_default(),
            extra = task.str("extra_instruction").unwrap_or_default(),
        );
        let prompt = build_personalized_prompt(&base, persona.as_ref());

        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)])
            .with_max_tokens(REPLY_MAX_TOKENS)
            .with_temperature(REPLY_TEMPERATURE);
        let response = self.llm.complete(request).await?;
        let cost = self
            .llm
            .calculate_cost(response.input_tokens, response.output_tokens);
        tracing::info!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost = %cost,
            "Generated email reply draft"
        );

        Ok(json!({ "reply": response.content.trim() }))
    }
}

#[async_trait]
impl Agent for EmailAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn process_task(&self, message: &AgentMessage) -> AgentReply {
        let context = json!({ "agent_id": self.core.id, "message_id": message.message_id });
        let task = match TaskRequest::from_message(message, &[]) {
            Ok(task) => task,
            Err(e) => {
                let task_id = message.content_str("task_id").map(str::to_string);
                return AgentReply::from_result(task_id, Err(e), context);
            }
        };

        tracing::info!(agent_id = %self.core.id, task_type = %task.task_type, "Processing email task");
        let result = self.run(&task).await;
        AgentReply::from_result(task.task_id.clone(), result, context)
    }

    async fn handle_query(&self, message: &AgentMessage) -> AgentReply {
        answer_query(&self.core, message, CAPABILITIES)
    }
}
