//! Prompt library loaded from `<prompts_dir>/assistant.yaml`.

use std::path::Path;

use serde::Deserialize;

use crate::config::DEFAULT_SYSTEM_PROMPT;

const PROMPT_FILE: &str = "assistant.yaml";

const DEFAULT_VOICE_PREAMBLE: &str =
    "Read the following naturally, as a friendly assistant speaking aloud.";

const DEFAULT_EMAIL_REPLY_PREAMBLE: &str = "You write email replies on behalf of the user. \
Reply to the original email below. Keep it concise, address every question it asks, \
and do not invent facts that are not in the email or the extra context.";

/// Prompts used by the dispatcher and the agents.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PromptLibrary {
    pub system_prompt: String,
    pub voice_preamble: String,
    pub email_reply_preamble: String,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            voice_preamble: DEFAULT_VOICE_PREAMBLE.to_string(),
            email_reply_preamble: DEFAULT_EMAIL_REPLY_PREAMBLE.to_string(),
        }
    }
}

impl PromptLibrary {
    /// Load the library, falling back to defaults when the file is missing or broken.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(PROMPT_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No prompt file, using built-in prompts");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read prompt file");
                return Self::default();
            }
        };

        match serde_yaml::from_str::<PromptLibrary>(&content) {
            Ok(library) => {
                tracing::info!(path = %path.display(), "Loaded prompt library");
                library
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid prompt file, using built-in prompts");
                Self::default()
            }
        }
    }
}
