//! Clients for the external services the assistant delegates to.
//!
//! Each service sits behind a trait (`SpeechService`, `Mailbox`,
//! `DocumentStore`) so tools and agents can be exercised with fakes.

pub mod documents;
mod imap;
pub mod mailbox;
pub mod speech;

pub use documents::{DocumentStore, NotionClient, NotionConfig, PageSummary};
pub use mailbox::{
    EmailDetails, EmailSummary, GmailConfig, GmailMailbox, Mailbox, OutgoingEmail, SearchQuery,
};
pub use speech::{OpenAiSpeech, SpeechConfig, SpeechService};

use std::time::Duration;

use crate::error::IntegrationError;

/// Timeout for the HTTP-based services.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the shared reqwest client.
pub(crate) fn http_client(service: &str) -> Result<reqwest::Client, IntegrationError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| IntegrationError::Http {
            service: service.to_string(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// Map a non-success response onto an `IntegrationError`.
pub(crate) async fn check_response(
    service: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, IntegrationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(IntegrationError::RateLimited {
            service: service.to_string(),
            retry_after,
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(IntegrationError::Api {
        service: service.to_string(),
        status: status.as_u16(),
        message: api_error_message(&body),
    })
}

/// Pull a human-readable message out of an error body, whichever JSON shape it uses.
fn api_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let nested = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str());
        let flat = json.get("message").and_then(|m| m.as_str());
        if let Some(msg) = nested.or(flat) {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(500).collect()
    }
}

pub(crate) fn transport_error(service: &str, err: reqwest::Error) -> IntegrationError {
    IntegrationError::Http {
        service: service.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_structured_fields() {
        assert_eq!(
            api_error_message(r#"{"error": {"message": "bad key"}}"#),
            "bad key"
        );
        assert_eq!(
            api_error_message(r#"{"object": "error", "message": "page not found"}"#),
            "page not found"
        );
        assert_eq!(api_error_message("upstream timeout"), "upstream timeout");
        assert_eq!(api_error_message(""), "empty response body");
    }
}
