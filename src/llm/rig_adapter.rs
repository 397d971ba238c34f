//! Bridge from rig-core's `CompletionModel` to our `LlmProvider`.

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::{
    AssistantContent, CompletionError, CompletionModel, Message as RigMessage,
    ToolDefinition as RigToolDefinition,
};
use rig::message::{ToolResultContent, UserContent};
use rust_decimal::Decimal;

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
    ToolCall, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

/// Wraps any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: String,
    cost: (Decimal, Decimal),
}

impl<M> RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: "openai".to_string(),
            cost: costs::model_cost(model_name),
        }
    }

    /// Label used in errors and logs.
    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        max_tokens: Option<u32>,
        temperature: Option<f64>,
    ) -> Result<(Vec<String>, Vec<ToolCall>, u32, u32), LlmError> {
        let (preamble, mut history) = convert_messages(messages, &self.provider)?;
        let prompt = history.pop().ok_or_else(|| LlmError::InvalidResponse {
            provider: self.provider.clone(),
            reason: "conversation has no user or tool message to answer".to_string(),
        })?;

        let rig_tools: Vec<RigToolDefinition> = tools
            .iter()
            .map(|t| RigToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect();

        let mut builder = self
            .model
            .completion_request(prompt)
            .messages(history)
            .tools(rig_tools);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(max_tokens) = max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }
        if let Some(temperature) = temperature {
            builder = builder.temperature(temperature);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_completion_error(&self.provider, e))?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for item in response.choice.into_iter() {
            match item {
                AssistantContent::Text(text) => texts.push(text.text),
                AssistantContent::ToolCall(call) => tool_calls.push(ToolCall {
                    id: call.id,
                    call_id: call.call_id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                }),
                _ => {}
            }
        }

        let input = u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX);
        let output = u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX);
        Ok((texts, tool_calls, input, output))
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.cost
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (texts, _, input_tokens, output_tokens) = self
            .send(
                &request.messages,
                &[],
                request.max_tokens,
                request.temperature,
            )
            .await?;

        Ok(CompletionResponse {
            content: texts.join("\n"),
            input_tokens,
            output_tokens,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let (texts, tool_calls, input_tokens, output_tokens) = self
            .send(
                &request.messages,
                &request.tools,
                request.max_tokens,
                request.temperature,
            )
            .await?;

        let content = if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        };
        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };

        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens,
            output_tokens,
            finish_reason,
        })
    }
}

/// Split our message list into a preamble (all system messages) and rig history.
fn convert_messages(
    messages: &[ChatMessage],
    provider: &str,
) -> Result<(Option<String>, Vec<RigMessage>), LlmError> {
    let mut system_parts = Vec::new();
    let mut history = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.clone()),
            Role::User => history.push(RigMessage::user(msg.content.clone())),
            Role::Assistant if msg.tool_calls.is_empty() => {
                history.push(RigMessage::assistant(msg.content.clone()));
            }
            Role::Assistant => {
                let mut items = Vec::with_capacity(msg.tool_calls.len() + 1);
                if !msg.content.is_empty() {
                    items.push(AssistantContent::text(msg.content.clone()));
                }
                for call in &msg.tool_calls {
                    items.push(AssistantContent::tool_call_with_call_id(
                        call.id.clone(),
                        call.call_id.clone().unwrap_or_else(|| call.id.clone()),
                        call.name.clone(),
                        call.arguments.clone(),
                    ));
                }
                let content = OneOrMany::many(items).map_err(|e| LlmError::InvalidResponse {
                    provider: provider.to_string(),
                    reason: format!("empty assistant turn: {e}"),
                })?;
                history.push(RigMessage::Assistant { id: None, content });
            }
            Role::Tool => {
                let call_id = msg.tool_call_id.clone().unwrap_or_default();
                let result = UserContent::tool_result_with_call_id(
                    call_id.clone(),
                    call_id,
                    OneOrMany::one(ToolResultContent::text(msg.content.clone())),
                );
                history.push(RigMessage::User {
                    content: OneOrMany::one(result),
                });
            }
        }
    }

    let preamble = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    Ok((preamble, history))
}

fn map_completion_error(provider: &str, err: CompletionError) -> LlmError {
    let reason = err.to_string();
    let lower = reason.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    } else if lower.contains("401") || lower.contains("invalid api key") {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason,
        }
    }
}
