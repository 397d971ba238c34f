//! Voice tool: spoken replies.
//!
//! The dispatcher intercepts `speak_text` and ends the turn with audio, so
//! `execute` only runs when the tool is called directly (e.g. from an agent).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::ToolContext;
use crate::integrations::SpeechService;
use crate::tools::tool::{
    Tool, ToolDomain, ToolError, ToolOutput, optional_f64, optional_str, require_str,
};

/// Name the dispatcher matches on.
pub const SPEAK_TEXT: &str = "speak_text";

/// Arguments of a `speak_text` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    /// Short text to read aloud.
    pub text: String,
    /// Longer text shown on screen; falls back to `text`.
    pub detailed_text: String,
    pub speed: f64,
}

impl SpeakRequest {
    pub fn from_params(params: &serde_json::Value) -> Result<Self, ToolError> {
        let text = require_str(params, "text")?.to_string();
        let detailed_text = optional_str(params, "detailed_text")
            .map(str::to_string)
            .unwrap_or_else(|| text.clone());
        let speed = optional_f64(params, "speed")?.unwrap_or(1.0);
        Ok(Self {
            text,
            detailed_text,
            speed,
        })
    }
}

/// Converts text to speech.
pub struct SpeakTextTool {
    speech: Arc<dyn SpeechService>,
}

impl SpeakTextTool {
    pub fn new(speech: Arc<dyn SpeechService>) -> Self {
        Self { speech }
    }
}

#[async_trait]
impl Tool for SpeakTextTool {
    fn name(&self) -> &str {
        SPEAK_TEXT
    }

    fn description(&self) -> &str {
        "Reply to the user by voice. Use this for every answer that should be spoken. \
         'text' is read aloud and should be short and conversational; put lists, \
         numbers and other detail in 'detailed_text', which is shown on screen."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Short text to speak aloud"
                },
                "detailed_text": {
                    "type": "string",
                    "description": "Detailed text to display (defaults to 'text')"
                },
                "speed": {
                    "type": "number",
                    "description": "Speech speed between 0.25 and 4.0 (default: 1.0)"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let request = SpeakRequest::from_params(&params)?;
        let audio = self.speech.synthesize(&request.text, request.speed).await?;
        Ok(ToolOutput::binary(audio, start.elapsed()))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Voice
    }
}
