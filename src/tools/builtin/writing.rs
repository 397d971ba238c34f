//! Text summarization through the chat model.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::context::ToolContext;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::tools::tool::{Tool, ToolDomain, ToolError, ToolOutput, optional_str, require_str};

/// Longest input passed to the model, in characters.
pub const MAX_SUMMARY_INPUT_CHARS: usize = 40_000;

pub const DEFAULT_SUMMARY_INSTRUCTION: &str = "다음 텍스트를 한국어 한 문장으로 간결하게 요약해줘:";

const SUMMARY_SYSTEM: &str =
    "You are a helpful assistant specialized in summarizing text concisely in Korean.";
const SUMMARY_MAX_TOKENS: u32 = 2000;
const SUMMARY_TEMPERATURE: f64 = 0.5;

/// Instruction, then the text fenced by `---` lines.
pub fn summary_prompt(text: &str, instruction: &str) -> String {
    let text: String = text.trim().chars().take(MAX_SUMMARY_INPUT_CHARS).collect();
    format!("{instruction}\n\n---\n{text}\n---")
}

/// Summarize arbitrary text.
pub struct SummarizeTextTool {
    llm: Arc<dyn LlmProvider>,
}

impl SummarizeTextTool {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Tool for SummarizeTextTool {
    fn name(&self) -> &str {
        "summarize_text"
    }

    fn description(&self) -> &str {
        "Summarize the given text. By default the summary is one concise Korean sentence; \
         pass prompt_template to ask for a different style."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text_to_summarize": {
                    "type": "string",
                    "description": "The text to summarize"
                },
                "prompt_template": {
                    "type": "string",
                    "description": "Optional instruction describing the summary style"
                }
            },
            "required": ["text_to_summarize"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let text = require_str(&params, "text_to_summarize")?;
        let instruction =
            optional_str(&params, "prompt_template").unwrap_or(DEFAULT_SUMMARY_INSTRUCTION);

        let request = CompletionRequest::new(vec![
            ChatMessage::system(SUMMARY_SYSTEM),
            ChatMessage::user(summary_prompt(text, instruction)),
        ])
        .with_max_tokens(SUMMARY_MAX_TOKENS)
        .with_temperature(SUMMARY_TEMPERATURE);
        let response = self.llm.complete(request).await?;
        tracing::info!(chars = text.chars().count(), "Text summarized");

        Ok(ToolOutput::success(
            json!({ "summary": response.content.trim() }),
            start.elapsed(),
        ))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::General
    }
}
