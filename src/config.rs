//! Configuration types.
//!
//! Everything is read once from the environment at startup. Tests go through
//! [`AppConfig::from_lookup`] so they never mutate the process environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::integrations::documents::NotionConfig;
use crate::integrations::mailbox::GmailConfig;
use crate::integrations::speech::SpeechConfig;
use crate::llm::{LlmBackend, LlmConfig};
use crate::logging::LoggingConfig;

/// System prompt used when no prompt library file overrides it.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI secretary. \
You can search and summarize email, draft and send replies, look up and create \
pages in the user's document workspace, and answer out loud. \
When the user expects a spoken answer, call `speak_text` with a short `text` \
for the voice and a fuller `detailed_text` for the screen. \
Answer in the language the user writes in.";

/// Upload extensions accepted when nothing else is configured.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[".txt", ".pdf", ".docx", ".md"];

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    /// Always required: chat completions default to OpenAI and speech always uses it.
    pub openai_api_key: SecretString,
    pub llm_backend: LlmBackend,
    pub anthropic_api_key: Option<SecretString>,
    pub default_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub logging: LoggingConfig,
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub upload_dir: PathBuf,
    pub bind_addr: String,
    pub prompts_dir: PathBuf,
    /// Upper bound on LLM round-trips in one dispatcher turn.
    pub max_tool_iterations: usize,
    pub persona_selector_enabled: bool,
    pub speech: SpeechConfig,
    pub notion: Option<NotionConfig>,
    pub gmail: Option<GmailConfig>,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let openai_api_key = var("OPENAI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        let llm_backend = match var("LLM_BACKEND").as_deref() {
            None | Some("openai") => LlmBackend::OpenAi,
            Some("anthropic") => LlmBackend::Anthropic,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_BACKEND".to_string(),
                    message: format!("expected 'openai' or 'anthropic', got '{other}'"),
                });
            }
        };

        let anthropic_api_key = var("ANTHROPIC_API_KEY").map(SecretString::from);
        if llm_backend == LlmBackend::Anthropic && anthropic_api_key.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "ANTHROPIC_API_KEY".to_string(),
                hint: "LLM_BACKEND=anthropic needs an Anthropic API key".to_string(),
            });
        }

        let environment = match var("ENVIRONMENT") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "ENVIRONMENT".to_string(),
                message,
            })?,
            None => Environment::Development,
        };

        let allowed_extensions = var("ALLOWED_EXTENSIONS")
            .map(|raw| {
                raw.split(',')
                    .map(normalize_extension)
                    .filter(|e| e.len() > 1)
                    .collect()
            })
            .unwrap_or_else(|| {
                DEFAULT_ALLOWED_EXTENSIONS
                    .iter()
                    .map(|e| e.to_string())
                    .collect()
            });

        let notion = var("NOTION_API_KEY").map(|key| NotionConfig {
            api_key: SecretString::from(key),
            parent_page_id: var("NOTION_PARENT_PAGE_ID"),
            base_url: var("NOTION_BASE_URL")
                .unwrap_or_else(|| NotionConfig::DEFAULT_BASE_URL.to_string()),
        });

        let gmail = match (var("GMAIL_ADDRESS"), var("GMAIL_APP_PASSWORD")) {
            (Some(address), Some(password)) => Some(GmailConfig {
                address,
                app_password: SecretString::from(password),
                imap_host: var("GMAIL_IMAP_HOST").unwrap_or_else(|| "imap.gmail.com".to_string()),
                imap_port: parse_or(&var, "GMAIL_IMAP_PORT", 993)?,
                smtp_host: var("GMAIL_SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
                smtp_port: parse_or(&var, "GMAIL_SMTP_PORT", 587)?,
                attachment_dir: PathBuf::from(
                    var("ATTACHMENT_DIR").unwrap_or_else(|| "attachments".to_string()),
                ),
            }),
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!(
                    "Gmail disabled: GMAIL_ADDRESS and GMAIL_APP_PASSWORD must both be set"
                );
                None
            }
            (None, None) => None,
        };

        let speech = SpeechConfig {
            base_url: var("OPENAI_BASE_URL")
                .unwrap_or_else(|| SpeechConfig::DEFAULT_BASE_URL.to_string()),
            tts_model: var("TTS_MODEL").unwrap_or_else(|| "tts-1-hd".to_string()),
            voice: var("TTS_VOICE").unwrap_or_else(|| "shimmer".to_string()),
            stt_model: var("STT_MODEL").unwrap_or_else(|| "whisper-1".to_string()),
            language: var("STT_LANGUAGE").unwrap_or_else(|| "ko".to_string()),
        };

        Ok(Self {
            app_name: var("APP_NAME").unwrap_or_else(|| "AI Secretary".to_string()),
            app_version: var("APP_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            environment,
            openai_api_key,
            llm_backend,
            anthropic_api_key,
            default_model: var("DEFAULT_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            max_tokens: parse_or(&var, "MAX_TOKENS", 2000)?,
            temperature: parse_or(&var, "TEMPERATURE", 0.7)?,
            logging: LoggingConfig {
                level: var("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string()),
                dir: PathBuf::from(var("LOG_DIR").unwrap_or_else(|| "logs".to_string())),
            },
            max_file_size: parse_or(&var, "MAX_FILE_SIZE", 10 * 1024 * 1024)?,
            allowed_extensions,
            upload_dir: PathBuf::from(var("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string())),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8501".to_string()),
            prompts_dir: PathBuf::from(
                var("PROMPTS_DIR").unwrap_or_else(|| "configs/prompts".to_string()),
            ),
            max_tool_iterations: parse_or(&var, "MAX_TOOL_ITERATIONS", 8)?,
            persona_selector_enabled: parse_flag(&var, "ENABLE_PERSONA_SELECTOR", true)?,
            speech,
            notion,
            gmail,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Whether an uploaded file name has one of the allowed extensions.
    pub fn is_allowed_file(&self, name: &str) -> bool {
        let ext = match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!(".{}", ext.to_lowercase()),
            None => return false,
        };
        self.allowed_extensions.iter().any(|allowed| *allowed == ext)
    }

    /// Provider configuration for the chat model.
    pub fn llm_config(&self) -> LlmConfig {
        let api_key = match (self.llm_backend, &self.anthropic_api_key) {
            (LlmBackend::Anthropic, Some(key)) => key.clone(),
            _ => self.openai_api_key.clone(),
        };
        LlmConfig {
            backend: self.llm_backend,
            api_key,
            model: self.default_model.clone(),
        }
    }
}

fn normalize_extension(raw: &str) -> String {
    let ext = raw.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_flag<F>(var: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key).map(|v| v.to_lowercase()).as_deref() {
        None => Ok(default),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
