//! Agent that turns text into speech and speech into text.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use super::base::{Agent, AgentCore, AgentReply, TaskRequest, answer_query};
use super::protocol::AgentMessage;
use super::recovery::{RetryPolicy, retry_with_backoff};
use crate::error::AgentError;
use crate::integrations::SpeechService;
use crate::persona::{Persona, build_personalized_prompt};
use crate::prompts::PromptLibrary;

pub const VOICE_AGENT_TYPE: &str = "voice";

const CAPABILITIES: &[&str] = &["text_to_speech", "speech_to_text"];
const ALIASES: &[(&str, &str)] = &[("tts", "text_to_speech"), ("stt", "speech_to_text")];
const DEFAULT_AUDIO_NAME: &str = "audio.webm";

pub struct VoiceAgent {
    core: AgentCore,
    speech: Arc<dyn SpeechService>,
    prompts: PromptLibrary,
    retry: RetryPolicy,
}

impl VoiceAgent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        speech: Arc<dyn SpeechService>,
        prompts: PromptLibrary,
    ) -> Self {
        let core = AgentCore::new(id, name, "voice_processing");
        core.add_tool("speak_text");
        core.add_tool("speech_to_text");
        Self {
            core,
            speech,
            prompts,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Speak `text` (or `detailed_text` when there is no short form).
    ///
    /// The voice preamble and persona guidelines only go into the returned
    /// `detailed_text`; the audio is always the caller's own wording.
    async fn text_to_speech(&self, task: &TaskRequest) -> Result<Value, AgentError> {
        let text = task.str("text").unwrap_or_default();
        let detailed = task.str("detailed_text").unwrap_or_default();
        if text.is_empty() && detailed.is_empty() {
            return Err(AgentError::validation("text", "No text was provided to speak"));
        }
        let speed = task.data.get("speed").and_then(Value::as_f64).unwrap_or(1.0);
        let persona = persona_of(task);

        let spoken = if text.is_empty() { detailed } else { text };
        let speech = &self.speech;
        let audio = retry_with_backoff(&self.retry, "text_to_speech", || async move {
            Ok(speech.synthesize(spoken, speed).await?)
        })
        .await?;

        let base = if detailed.is_empty() { text } else { detailed };
        let merged = format!("{}\n{base}", self.prompts.voice_preamble);
        let detailed_text = build_personalized_prompt(&merged, persona.as_ref());
        if let Some(persona) = &persona {
            tracing::info!(persona = persona.label(), "Applied persona guidelines to speech text");
        }

        Ok(json!({
            "audio_base64": BASE64.encode(audio),
            "original_text": text,
            "detailed_text": detailed_text,
        }))
    }

    async fn speech_to_text(&self, task: &TaskRequest) -> Result<Value, AgentError> {
        let encoded = task.require_str("audio_base64")?;
        let audio = BASE64
            .decode(encoded.trim())
            .map_err(|e| AgentError::validation("audio_base64", format!("Invalid base64 audio: {e}")))?;
        let filename = task.str("filename").unwrap_or(DEFAULT_AUDIO_NAME);

        let speech = &self.speech;
        let text = retry_with_backoff(&self.retry, "speech_to_text", || {
            let audio = audio.clone();
            async move { Ok(speech.transcribe(audio, filename).await?) }
        })
        .await?;

        let mut result = json!({ "text": text });
        if let Some(persona) = task.data.get("persona").filter(|p| !p.is_null()) {
            result["persona"] = persona.clone();
        }
        Ok(result)
    }
}

fn persona_of(task: &TaskRequest) -> Option<Persona> {
    let value = task.data.get("persona").filter(|p| !p.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(persona) => Some(persona),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed persona in voice task");
            None
        }
    }
}

#[async_trait]
impl Agent for VoiceAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn process_task(&self, message: &AgentMessage) -> AgentReply {
        let context = json!({ "agent_id": self.core.id, "message_id": message.message_id });
        let task = match TaskRequest::from_message(message, ALIASES) {
            Ok(task) => task,
            Err(e) => {
                let task_id = message.content_str("task_id").map(str::to_string);
                return AgentReply::from_result(task_id, Err(e), context);
            }
        };

        tracing::info!(agent_id = %self.core.id, task_type = %task.task_type, "Processing voice task");
        let result = match task.task_type.as_str() {
            "text_to_speech" => self.text_to_speech(&task).await,
            "speech_to_text" => self.speech_to_text(&task).await,
            _ => Err(task.unsupported()),
        };
        AgentReply::from_result(task.task_id.clone(), result, context)
    }

    async fn handle_query(&self, message: &AgentMessage) -> AgentReply {
        answer_query(&self.core, message, CAPABILITIES)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::agents::base::ReplyStatus;
    use crate::agents::protocol::MessageType;
    use crate::testing::FakeSpeech;

    fn agent(speech: FakeSpeech) -> (VoiceAgent, Arc<FakeSpeech>) {
        let speech = Arc::new(speech);
        let agent = VoiceAgent::new("voice_1", "Voice", speech.clone(), PromptLibrary::default())
            .with_retry_policy(RetryPolicy::default().with_initial_delay(Duration::from_millis(1)));
        (agent, speech)
    }

    fn task(data: Value) -> AgentMessage {
        AgentMessage::new(
            "user",
            "voice_1",
            MessageType::TaskRequest,
            json!({ "task_id": "t1", "task_data": data }),
        )
    }

    #[tokio::test]
    async fn tts_speaks_the_short_text() {
        let (agent, speech) = agent(FakeSpeech::default());
        let reply = agent
            .receive_message(task(json!({
                "type": "tts",
                "text": "회의는 3시입니다",
                "detailed_text": "오늘 회의는 오후 3시에 본관에서 열립니다",
                "persona": { "name": "Planner", "tone": "calm" },
            })))
            .await;

        assert_eq!(reply.status, ReplyStatus::Success);
        assert_eq!(reply.task_id.as_deref(), Some("t1"));
        let result = reply.result.unwrap();
        assert_eq!(
            BASE64.decode(result["audio_base64"].as_str().unwrap()).unwrap(),
            "회의는 3시입니다".as_bytes()
        );
        assert_eq!(result["original_text"], "회의는 3시입니다");
        let detailed = result["detailed_text"].as_str().unwrap();
        assert!(detailed.starts_with("[Persona guidelines]"));
        assert!(detailed.contains("본관"));
        assert_eq!(*speech.synthesized.lock().unwrap(), vec!["회의는 3시입니다"]);
    }

    #[tokio::test]
    async fn tts_retries_transient_failures() {
        let (agent, _) = agent(FakeSpeech::flaky(2));
        let reply = agent
            .receive_message(task(json!({ "type": "text_to_speech", "text": "hello" })))
            .await;
        assert!(reply.is_success());
    }

    #[tokio::test]
    async fn tts_without_text_is_a_validation_error() {
        let (agent, _) = agent(FakeSpeech::default());
        let reply = agent.receive_message(task(json!({ "type": "tts" }))).await;
        assert_eq!(reply.status, ReplyStatus::Error);
        let error = reply.error.unwrap();
        assert_eq!(error.error_code, "VALIDATION_ERROR");
        assert_eq!(error.details["field"], "text");
    }

    #[tokio::test]
    async fn stt_decodes_and_transcribes() {
        let (agent, _) = agent(FakeSpeech::flaky(1));
        let reply = agent
            .receive_message(task(json!({
                "type": "stt",
                "audio_base64": BASE64.encode(b"RIFF...."),
                "persona": { "name": "Planner" },
            })))
            .await;
        let result = reply.result.unwrap();
        assert_eq!(result["text"], "오늘 일정 알려줘");
        assert_eq!(result["persona"]["name"], "Planner");
    }

    #[tokio::test]
    async fn stt_requires_valid_audio() {
        let (agent, _) = agent(FakeSpeech::default());
        let missing = agent.receive_message(task(json!({ "type": "stt" }))).await;
        assert_eq!(missing.error.unwrap().details["field"], "audio_base64");

        let garbage = agent
            .receive_message(task(json!({ "type": "stt", "audio_base64": "***" })))
            .await;
        assert_eq!(garbage.status, ReplyStatus::Error);
    }

    #[tokio::test]
    async fn missing_and_unknown_task_types() {
        let (agent, _) = agent(FakeSpeech::default());
        let missing = agent.receive_message(task(json!({}))).await;
        assert_eq!(missing.error.unwrap().error_code, "VALIDATION_ERROR");

        let unknown = agent.receive_message(task(json!({ "type": "sing" }))).await;
        let error = unknown.error.unwrap();
        assert!(error.message.contains("Unsupported task type: sing"));
    }

    #[tokio::test]
    async fn capability_query_lists_tools() {
        let (agent, _) = agent(FakeSpeech::default());
        let reply = agent
            .receive_message(AgentMessage::new(
                "user",
                "voice_1",
                MessageType::Query,
                json!({ "query": "list your capabilities" }),
            ))
            .await;
        let result = reply.result.unwrap();
        assert_eq!(result["tools"], json!(["speak_text", "speech_to_text"]));
        assert_eq!(result["capabilities"], json!(CAPABILITIES));
    }
}
