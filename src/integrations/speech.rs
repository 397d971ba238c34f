//! Text-to-speech and speech-to-text over the OpenAI audio API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::IntegrationError;
use crate::integrations::{check_response, http_client, transport_error};

const SERVICE: &str = "openai-audio";

/// Speed bounds accepted by the speech endpoint.
pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 4.0;

/// Speech configuration.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub base_url: String,
    pub tts_model: String,
    pub voice: String,
    pub stt_model: String,
    /// ISO-639-1 hint for transcription.
    pub language: String,
}

impl SpeechConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            tts_model: "tts-1-hd".to_string(),
            voice: "shimmer".to_string(),
            stt_model: "whisper-1".to_string(),
            language: "ko".to_string(),
        }
    }
}

/// Speech synthesis and recognition.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Synthesize `text` to MP3 bytes.
    async fn synthesize(&self, text: &str, speed: f64) -> Result<Vec<u8>, IntegrationError>;

    /// Transcribe an audio clip. `filename` is used for format detection.
    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<String, IntegrationError>;
}

/// Clamp a requested speed into the accepted range; non-finite values become 1.0.
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

/// OpenAI audio client.
pub struct OpenAiSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    config: SpeechConfig,
}

impl OpenAiSpeech {
    pub fn new(api_key: SecretString, config: SpeechConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            client: http_client(SERVICE)?,
            api_key,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl SpeechService for OpenAiSpeech {
    async fn synthesize(&self, text: &str, speed: f64) -> Result<Vec<u8>, IntegrationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IntegrationError::InvalidInput(
                "text to synthesize is empty".to_string(),
            ));
        }

        let body = serde_json::json!({
            "model": self.config.tts_model,
            "voice": self.config.voice,
            "input": text,
            "speed": clamp_speed(speed),
            "response_format": "mp3",
        });

        let response = self
            .client
            .post(self.url("audio/speech"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let response = check_response(SERVICE, response).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        tracing::debug!(chars = text.chars().count(), bytes = bytes.len(), "Synthesized speech");
        Ok(bytes.to_vec())
    }

    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<String, IntegrationError> {
        if audio.is_empty() {
            return Err(IntegrationError::InvalidInput("audio clip is empty".to_string()));
        }

        let size = audio.len();
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str(audio_mime(filename))
            .map_err(|e| transport_error(SERVICE, e))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.stt_model.clone())
            .text("language", self.config.language.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let response = check_response(SERVICE, response).await?;

        let parsed: TranscriptionResponse =
            response.json().await.map_err(|e| IntegrationError::Protocol {
                service: SERVICE.to_string(),
                reason: format!("unexpected transcription payload: {e}"),
            })?;
        tracing::debug!(bytes = size, chars = parsed.text.chars().count(), "Transcribed audio");
        Ok(parsed.text.trim().to_string())
    }
}

fn audio_mime(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" | "mpga" | "mpeg" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        _ => "audio/wav",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> OpenAiSpeech {
        OpenAiSpeech::new(
            SecretString::from("sk-test"),
            SpeechConfig {
                base_url: server.uri(),
                ..SpeechConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn speed_is_clamped() {
        assert_eq!(clamp_speed(10.0), 4.0);
        assert_eq!(clamp_speed(0.1), 0.25);
        assert_eq!(clamp_speed(1.3), 1.3);
        assert_eq!(clamp_speed(f64::NAN), 1.0);
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(audio_mime("clip.MP3"), "audio/mpeg");
        assert_eq!(audio_mime("clip.webm"), "audio/webm");
        assert_eq!(audio_mime("clip"), "audio/wav");
    }

    #[tokio::test]
    async fn synthesize_posts_model_voice_and_clamped_speed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "tts-1-hd",
                "voice": "shimmer",
                "input": "hello",
                "speed": 4.0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xFB, 0x90]))
            .expect(1)
            .mount(&server)
            .await;

        let audio = client_for(&server).synthesize("  hello ", 9.0).await.unwrap();
        assert_eq!(audio, vec![0xFF, 0xFB, 0x90]);
    }

    #[tokio::test]
    async fn synthesize_rejects_empty_text_without_calling_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server).synthesize("   ", 1.0).await.unwrap_err();
        assert!(matches!(err, IntegrationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = client_for(&server).synthesize("hi", 1.0).await.unwrap_err();
        match err {
            IntegrationError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(7)));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transcribe_returns_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": " 안녕하세요 \n"})))
            .mount(&server)
            .await;

        let text = client_for(&server)
            .transcribe(vec![1, 2, 3, 4], "voice.wav")
            .await
            .unwrap();
        assert_eq!(text, "안녕하세요");
    }

    #[tokio::test]
    async fn api_errors_surface_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": {"message": "Invalid file format."}})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .transcribe(vec![1], "voice.txt")
            .await
            .unwrap_err();
        match err {
            IntegrationError::Api { status, message, .. } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid file format.");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }
}
