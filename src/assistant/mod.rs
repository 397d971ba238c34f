//! Core dispatcher: one chat turn through the LLM and the tool registry.
//!
//! The model either answers in text, asks for tools, or calls `speak_text`.
//! Tool results are fed back until the model answers; a `speak_text` call
//! ends the turn immediately with synthesized audio.

pub mod file_context;
pub mod session;

pub use file_context::{UploadedFile, build_file_context};
pub use session::SessionStore;

use std::sync::Arc;

use crate::context::ToolContext;
use crate::integrations::SpeechService;
use crate::llm::{
    ChatMessage, LlmProvider, Reasoning, ReasoningContext, RespondResult, Role, TokenUsage,
    ToolCall,
};
use crate::persona::{Persona, build_personalized_prompt};
use crate::prompts::PromptLibrary;
use crate::tools::builtin::voice::SpeakRequest;
use crate::tools::{SPEAK_TEXT, ToolError, ToolRegistry};

/// Error returned when the model keeps calling tools.
pub const ITERATION_LIMIT_MESSAGE: &str = "tool iteration limit reached";

/// Outcome of one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantResponse {
    /// The model answered through `speak_text`.
    Audio {
        voice_text: String,
        detailed_text: String,
        /// `None` when synthesis failed.
        audio: Option<Vec<u8>>,
    },
    /// The model answered in plain text.
    Text {
        text: String,
        audio: Option<Vec<u8>>,
    },
    Error(String),
}

impl AssistantResponse {
    /// Text to keep in the conversation history.
    pub fn display_text(&self) -> &str {
        match self {
            Self::Audio { detailed_text, .. } => detailed_text,
            Self::Text { text, .. } => text,
            Self::Error(message) => message,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Token and iteration limits for a turn.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherLimits {
    pub max_tokens: u32,
    pub temperature: f64,
    pub max_iterations: usize,
}

/// Routes user commands through the LLM and the registered tools.
pub struct Dispatcher {
    reasoning: Reasoning,
    tools: Arc<ToolRegistry>,
    speech: Arc<dyn SpeechService>,
    prompts: PromptLibrary,
    max_iterations: usize,
}

impl Dispatcher {
    /// Build a dispatcher. Fails when the registry is empty or holds an invalid schema.
    pub async fn new(
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        speech: Arc<dyn SpeechService>,
        prompts: PromptLibrary,
        limits: DispatcherLimits,
    ) -> Result<Self, ToolError> {
        tools.validate().await?;
        Ok(Self {
            reasoning: Reasoning::new(llm).with_limits(limits.max_tokens, limits.temperature),
            tools,
            speech,
            prompts,
            max_iterations: limits.max_iterations.max(1),
        })
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Run one turn for `command` on top of `history`.
    pub async fn process_command(
        &self,
        command: &str,
        history: &[ChatMessage],
        uploaded_file: Option<&UploadedFile>,
        persona: Option<&Persona>,
    ) -> AssistantResponse {
        let command = command.trim();
        if command.is_empty() {
            return AssistantResponse::Error("empty command".to_string());
        }

        let mut messages = self.initial_messages(command, history, uploaded_file, persona).await;
        let tool_ctx = ToolContext::new().with_persona(persona.cloned());
        let definitions = self.tools.tool_definitions().await;
        let mut usage = TokenUsage::default();

        tracing::info!(
            request_id = %tool_ctx.request_id,
            history = history.len(),
            tools = definitions.len(),
            "Processing command"
        );

        for iteration in 1..=self.max_iterations {
            let reason_ctx = ReasoningContext::new()
                .with_messages(messages.clone())
                .with_tools(definitions.clone());

            let output = match self.reasoning.respond_with_tools(&reason_ctx).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::error!(error = %e, iteration, "LLM call failed");
                    return AssistantResponse::Error(e.to_string());
                }
            };
            usage.add(output.usage);

            match output.result {
                RespondResult::Text(text) => {
                    self.log_usage(&usage, iteration);
                    tracing::info!("Model answered without speak_text");
                    return AssistantResponse::Text { text, audio: None };
                }
                RespondResult::ToolCalls {
                    tool_calls,
                    content,
                } => {
                    tracing::debug!(count = tool_calls.len(), iteration, "Model requested tools");
                    messages.push(ChatMessage::assistant_with_tool_calls(
                        content,
                        tool_calls.clone(),
                    ));

                    for call in tool_calls {
                        if call.name == SPEAK_TEXT {
                            match SpeakRequest::from_params(&call.arguments) {
                                Ok(request) => {
                                    self.log_usage(&usage, iteration);
                                    return self.speak(request).await;
                                }
                                Err(e) => {
                                    messages.push(ChatMessage::tool_result(&call, error_json(&e)));
                                    continue;
                                }
                            }
                        }

                        let result = self.run_tool(&call, &tool_ctx).await;
                        messages.push(ChatMessage::tool_result(&call, result));
                    }
                }
            }
        }

        self.log_usage(&usage, self.max_iterations);
        tracing::warn!(max = self.max_iterations, "Tool iteration limit reached");
        AssistantResponse::Error(ITERATION_LIMIT_MESSAGE.to_string())
    }

    async fn initial_messages(
        &self,
        command: &str,
        history: &[ChatMessage],
        uploaded_file: Option<&UploadedFile>,
        persona: Option<&Persona>,
    ) -> Vec<ChatMessage> {
        let system_prompt = build_personalized_prompt(&self.prompts.system_prompt, persona);

        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(
            history
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );
        if let Some(file) = uploaded_file {
            messages.push(ChatMessage::system(build_file_context(file).await));
        }
        messages.push(ChatMessage::user(command));
        messages
    }

    async fn speak(&self, request: SpeakRequest) -> AssistantResponse {
        let audio = match self.speech.synthesize(&request.text, request.speed).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                tracing::warn!(error = %e, "Speech synthesis failed, answering without audio");
                None
            }
        };
        AssistantResponse::Audio {
            voice_text: request.text,
            detailed_text: request.detailed_text,
            audio,
        }
    }

    /// Execute one tool call and render its result for the model.
    async fn run_tool(&self, call: &ToolCall, ctx: &ToolContext) -> String {
        let Some(tool) = self.tools.get(&call.name).await else {
            tracing::warn!(tool = %call.name, "Model called an unknown tool");
            return error_json(&ToolError::NotFound(call.name.clone()));
        };

        match tool.execute(call.arguments.clone(), ctx).await {
            Ok(output) => {
                let content = output.to_model_content();
                tracing::info!(
                    tool = %call.name,
                    duration_ms = output.duration.as_millis() as u64,
                    chars = content.len(),
                    "Tool succeeded"
                );
                content
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool failed");
                error_json(&e)
            }
        }
    }

    fn log_usage(&self, usage: &TokenUsage, iterations: usize) {
        let cost = self
            .reasoning
            .llm()
            .calculate_cost(usage.input_tokens, usage.output_tokens);
        tracing::info!(
            model = self.reasoning.llm().model_name(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            iterations,
            cost_usd = %cost,
            "Turn finished"
        );
    }
}

fn error_json(err: &ToolError) -> String {
    serde_json::json!({ "error": err.to_string() }).to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::LlmError;
    use crate::testing::{FakeMailbox, FakeSpeech, ScriptedLlm};
    use crate::tools::{BuiltinServices, register_builtin_tools};

    fn limits(max_iterations: usize) -> DispatcherLimits {
        DispatcherLimits {
            max_tokens: 2000,
            temperature: 0.7,
            max_iterations,
        }
    }

    async fn dispatcher_with(
        llm: Arc<ScriptedLlm>,
        speech: Arc<FakeSpeech>,
        max_iterations: usize,
    ) -> Dispatcher {
        let registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(
            &registry,
            BuiltinServices::new(llm.clone(), speech.clone())
                .with_mailbox(Arc::new(FakeMailbox::with_sample())),
        );
        Dispatcher::new(llm, registry, speech, PromptLibrary::default(), limits(max_iterations))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn empty_registry_is_rejected() {
        let result = Dispatcher::new(
            Arc::new(ScriptedLlm::default()),
            Arc::new(ToolRegistry::new()),
            Arc::new(FakeSpeech::default()),
            PromptLibrary::default(),
            limits(4),
        )
        .await;
        assert!(matches!(result, Err(ToolError::Empty)));
    }

    #[tokio::test]
    async fn empty_command_never_reaches_the_model() {
        let llm = Arc::new(ScriptedLlm::default());
        let dispatcher = dispatcher_with(llm.clone(), Arc::new(FakeSpeech::default()), 4).await;

        let response = dispatcher.process_command("   ", &[], None, None).await;
        assert_eq!(response, AssistantResponse::Error("empty command".into()));
        assert_eq!(llm.request_count(), 0);
    }

    #[tokio::test]
    async fn plain_text_answer_is_a_text_fallback() {
        let llm = Arc::new(ScriptedLlm::new(vec![ScriptedLlm::text("Hello there")]));
        let dispatcher = dispatcher_with(llm.clone(), Arc::new(FakeSpeech::default()), 4).await;

        let response = dispatcher.process_command("hi", &[], None, None).await;
        assert_eq!(
            response,
            AssistantResponse::Text {
                text: "Hello there".into(),
                audio: None
            }
        );

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[0].tools.len(), 9);
        assert_eq!(requests[0].messages.first().unwrap().role, Role::System);
        assert_eq!(requests[0].messages.last().unwrap(), &ChatMessage::user("hi"));
    }

    #[tokio::test]
    async fn speak_text_ends_the_turn_with_audio() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedLlm::tool_call("c1", "speak_text", json!({"text": "네, 알겠습니다"})),
            ScriptedLlm::text("never reached"),
        ]));
        let speech = Arc::new(FakeSpeech::default());
        let dispatcher = dispatcher_with(llm.clone(), speech.clone(), 4).await;

        let response = dispatcher.process_command("안녕", &[], None, None).await;
        assert_eq!(
            response,
            AssistantResponse::Audio {
                voice_text: "네, 알겠습니다".into(),
                detailed_text: "네, 알겠습니다".into(),
                audio: Some("네, 알겠습니다".as_bytes().to_vec()),
            }
        );
        assert_eq!(llm.request_count(), 1);
        assert_eq!(speech.synthesized.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn synthesis_failure_still_returns_text() {
        let llm = Arc::new(ScriptedLlm::new(vec![ScriptedLlm::tool_call(
            "c1",
            "speak_text",
            json!({"text": "short", "detailed_text": "long version"}),
        )]));
        let dispatcher = dispatcher_with(llm, Arc::new(FakeSpeech::failing()), 4).await;

        match dispatcher.process_command("hi", &[], None, None).await {
            AssistantResponse::Audio {
                detailed_text,
                audio,
                ..
            } => {
                assert_eq!(detailed_text, "long version");
                assert!(audio.is_none());
            }
            other => panic!("expected audio response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_results_are_fed_back_to_the_model() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedLlm::tool_call("c1", "search_emails", json!({"keywords": "report"})),
            ScriptedLlm::text("You have one email about the report."),
        ]));
        let dispatcher = dispatcher_with(llm.clone(), Arc::new(FakeSpeech::default()), 4).await;

        let response = dispatcher.process_command("find report mails", &[], None, None).await;
        assert_eq!(response.display_text(), "You have one email about the report.");

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        let assistant = &second[second.len() - 2];
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.tool_calls[0].name, "search_emails");
        let tool_msg = second.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
        assert!(tool_msg.content.contains("Quarterly report"));
    }

    #[tokio::test]
    async fn summaries_and_dated_listings_reach_the_model() {
        let llm = Arc::new(
            ScriptedLlm::new(vec![
                ScriptedLlm::tool_call(
                    "c1",
                    "summarize_text",
                    json!({"text_to_summarize": "Long meeting notes about the launch."}),
                ),
                ScriptedLlm::tool_call("c2", "get_email_summary_on", json!({"date_on": "2024-03-05"})),
                ScriptedLlm::text("done"),
            ])
            .with_replies(&["출시 회의 요약"]),
        );
        let dispatcher = dispatcher_with(llm.clone(), Arc::new(FakeSpeech::default()), 4).await;

        let response = dispatcher.process_command("summarize and list", &[], None, None).await;
        assert_eq!(response.display_text(), "done");

        let requests = llm.requests.lock().unwrap();
        assert!(requests[1].messages.last().unwrap().content.contains("출시 회의 요약"));
        assert!(
            requests[2]
                .messages
                .last()
                .unwrap()
                .content
                .contains("Found 1 emails on 2024-03-05")
        );
    }

    #[tokio::test]
    async fn unknown_and_failing_tools_become_error_results() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedLlm::tool_call("c1", "launch_rocket", json!({})),
            ScriptedLlm::tool_call("c2", "get_email_details", json!({"email_id": "999"})),
            ScriptedLlm::text("Sorry, I could not do that."),
        ]));
        let dispatcher = dispatcher_with(llm.clone(), Arc::new(FakeSpeech::default()), 5).await;

        let response = dispatcher.process_command("go", &[], None, None).await;
        assert!(!response.is_error());

        let requests = llm.requests.lock().unwrap();
        let unknown = requests[1].messages.last().unwrap();
        let value: serde_json::Value = serde_json::from_str(&unknown.content).unwrap();
        assert!(value["error"].as_str().unwrap().contains("launch_rocket"));

        let failed = requests[2].messages.last().unwrap();
        let value: serde_json::Value = serde_json::from_str(&failed.content).unwrap();
        assert!(value["error"].as_str().unwrap().contains("999"));
    }

    #[tokio::test]
    async fn iteration_limit_is_enforced() {
        let script = (0..5)
            .map(|i| ScriptedLlm::tool_call(&format!("c{i}"), "search_emails", json!({"keywords": "x"})))
            .collect();
        let llm = Arc::new(ScriptedLlm::new(script));
        let dispatcher = dispatcher_with(llm.clone(), Arc::new(FakeSpeech::default()), 3).await;

        let response = dispatcher.process_command("loop", &[], None, None).await;
        assert_eq!(response, AssistantResponse::Error(ITERATION_LIMIT_MESSAGE.into()));
        assert_eq!(llm.request_count(), 3);
    }

    #[tokio::test]
    async fn llm_failure_is_reported() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(LlmError::AuthFailed {
            provider: "openai".into(),
        })]));
        let dispatcher = dispatcher_with(llm, Arc::new(FakeSpeech::default()), 4).await;

        match dispatcher.process_command("hi", &[], None, None).await {
            AssistantResponse::Error(message) => assert!(message.contains("Authentication failed")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn history_persona_and_file_shape_the_prompt() {
        let llm = Arc::new(ScriptedLlm::new(vec![ScriptedLlm::text("ok")]));
        let dispatcher = dispatcher_with(llm.clone(), Arc::new(FakeSpeech::default()), 4).await;

        let history = vec![
            ChatMessage::system("stale system prompt"),
            ChatMessage::user("earlier question"),
            ChatMessage::assistant("earlier answer"),
        ];
        let persona = Persona {
            name: Some("Data Analyst".into()),
            ..Persona::default()
        };
        let file = UploadedFile {
            name: "missing.pdf".into(),
            path: "/nowhere/missing.pdf".into(),
        };

        dispatcher
            .process_command("summarize", &history, Some(&file), Some(&persona))
            .await;

        let requests = llm.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 5);
        assert!(messages[0].content.starts_with("[Persona guidelines]"));
        assert!(messages[0].content.contains("Data Analyst"));
        assert_eq!(messages[1], ChatMessage::user("earlier question"));
        assert_eq!(messages[2], ChatMessage::assistant("earlier answer"));
        assert_eq!(messages[3].role, Role::System);
        assert!(messages[3].content.contains("missing.pdf"));
        assert_eq!(messages[4], ChatMessage::user("summarize"));
    }
}
