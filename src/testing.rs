//! In-memory fakes shared by unit tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::{IntegrationError, LlmError};
use crate::integrations::documents::PageSummary;
use crate::integrations::mailbox::{
    DailySummary, EmailDetails, EmailSummary, confine_path, days_before,
};
use crate::integrations::{DocumentStore, Mailbox, OutgoingEmail, SearchQuery, SpeechService};
use crate::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};

/// LLM that replays scripted tool-completion responses and records requests.
///
/// Plain completions replay `replies` in order, then fall back to a fixed answer.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<ToolCompletionResponse, LlmError>>>,
    replies: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<ToolCompletionRequest>>,
    pub completions: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<ToolCompletionResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn with_replies(self, replies: &[&str]) -> Self {
        *self.replies.lock().unwrap() = replies.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn text(text: &str) -> Result<ToolCompletionResponse, LlmError> {
        Ok(ToolCompletionResponse {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: FinishReason::Stop,
        })
    }

    pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> Result<ToolCompletionResponse, LlmError> {
        Ok(ToolCompletionResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                call_id: None,
                name: name.to_string(),
                arguments: args,
            }],
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: FinishReason::ToolUse,
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.completions.lock().unwrap().push(request);
        let content = self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            "Thanks for your email. I will get back to you shortly.".to_string()
        });
        Ok(CompletionResponse {
            content,
            input_tokens: 20,
            output_tokens: 12,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Self::text("done"))
    }
}

/// Speech fake: audio is the UTF-8 text, transcription is fixed.
#[derive(Default)]
pub struct FakeSpeech {
    pub fail_synthesis: bool,
    /// Transient failures to produce before succeeding.
    pub flaky: AtomicUsize,
    pub synthesized: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn failing() -> Self {
        Self {
            fail_synthesis: true,
            ..Self::default()
        }
    }

    pub fn flaky(failures: usize) -> Self {
        Self {
            flaky: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    fn take_failure(&self) -> bool {
        self.flaky
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SpeechService for FakeSpeech {
    async fn synthesize(&self, text: &str, _speed: f64) -> Result<Vec<u8>, IntegrationError> {
        if self.fail_synthesis {
            return Err(IntegrationError::Api {
                service: "openai-audio".into(),
                status: 400,
                message: "synthesis disabled".into(),
            });
        }
        if self.take_failure() {
            return Err(IntegrationError::Http {
                service: "openai-audio".into(),
                reason: "connection reset".into(),
            });
        }
        self.synthesized.lock().unwrap().push(text.to_string());
        Ok(text.as_bytes().to_vec())
    }

    async fn transcribe(&self, audio: Vec<u8>, _filename: &str) -> Result<String, IntegrationError> {
        if audio.is_empty() {
            return Err(IntegrationError::InvalidInput("audio clip is empty".into()));
        }
        if self.take_failure() {
            return Err(IntegrationError::Http {
                service: "openai-audio".into(),
                reason: "connection reset".into(),
            });
        }
        Ok("오늘 일정 알려줘".to_string())
    }
}

/// Mailbox fake holding one sample message (id 42).
///
/// Attachments land under a virtual `attachments/` root.
pub struct FakeMailbox {
    email: EmailDetails,
    /// Transient failures to produce before succeeding.
    pub flaky: AtomicUsize,
    sent: Mutex<Vec<OutgoingEmail>>,
    replies: Mutex<Vec<(String, String)>>,
}

impl FakeMailbox {
    pub fn with_sample() -> Self {
        Self {
            email: EmailDetails {
                summary: EmailSummary {
                    message_id: "42".into(),
                    from: "Kim Minji <minji@example.com>".into(),
                    to: "me@example.com".into(),
                    subject: "Quarterly report".into(),
                    date: "2024-03-05T09:30:00+09:00".into(),
                },
                body: "Please review the attached numbers.".into(),
                attachments: vec!["report.pdf".into()],
                internet_message_id: Some("abc123@example.com".into()),
                reply_to: Some("minji@example.com".into()),
            },
            flaky: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
        }
    }

    pub fn flaky(failures: usize) -> Self {
        let mailbox = Self::with_sample();
        mailbox.flaky.store(failures, Ordering::SeqCst);
        mailbox
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }

    fn check(&self, email_id: &str) -> Result<(), IntegrationError> {
        if self
            .flaky
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(IntegrationError::Http {
                service: "imap".into(),
                reason: "connection reset".into(),
            });
        }
        if email_id != self.email.summary.message_id {
            return Err(IntegrationError::NotFound(format!("Email not found: {email_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn search(&self, query: SearchQuery) -> Result<Vec<EmailSummary>, IntegrationError> {
        query.to_gmail_query()?;
        self.check("42")?;
        let mut found = vec![self.email.summary.clone()];
        found.truncate(query.max_results);
        Ok(found)
    }

    async fn fetch(&self, email_id: &str) -> Result<EmailDetails, IntegrationError> {
        self.check(email_id)?;
        Ok(self.email.clone())
    }

    async fn reply(&self, email_id: &str, body: &str) -> Result<(), IntegrationError> {
        self.check(email_id)?;
        self.replies
            .lock()
            .unwrap()
            .push((email_id.to_string(), body.to_string()));
        Ok(())
    }

    async fn save_attachments(
        &self,
        email_id: &str,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, IntegrationError> {
        let dir = confine_path(Path::new("attachments"), dir)?;
        self.check(email_id)?;
        Ok(self.email.attachments.iter().map(|a| dir.join(a)).collect())
    }

    async fn summary_on(
        &self,
        day: NaiveDate,
        _folder: &str,
        max_results: usize,
    ) -> Result<DailySummary, IntegrationError> {
        let mut emails = vec![self.email.summary.clone()];
        emails.truncate(max_results);
        Ok(DailySummary {
            date: day.format("%Y-%m-%d").to_string(),
            emails,
        })
    }

    /// Pinned to the sample's day so results do not depend on the clock.
    async fn daily_summary(
        &self,
        days_ago: i64,
        max_results: usize,
    ) -> Result<DailySummary, IntegrationError> {
        let sample_day = NaiveDate::from_ymd_opt(2024, 3, 5)
            .ok_or_else(|| IntegrationError::InvalidInput("bad sample day".into()))?;
        days_before(sample_day, days_ago)?;
        self.summary_on(sample_day, "INBOX", max_results).await
    }

    async fn send(&self, email: OutgoingEmail) -> Result<(), IntegrationError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// Document store fake with one page.
#[derive(Default)]
pub struct FakeDocuments {
    pub created: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DocumentStore for FakeDocuments {
    async fn search_pages(&self, _keyword: &str) -> Result<Vec<PageSummary>, IntegrationError> {
        Ok(vec![PageSummary {
            id: "p1".into(),
            title: "회의록".into(),
            last_edited_time: "2024-03-05 10:00:00".into(),
        }])
    }

    async fn page_content(&self, page_id: &str) -> Result<String, IntegrationError> {
        if page_id != "p1" {
            return Err(IntegrationError::NotFound(page_id.to_string()));
        }
        Ok("line one\nline two".into())
    }

    async fn create_page(&self, title: &str, content: &str) -> Result<String, IntegrationError> {
        self.created
            .lock()
            .unwrap()
            .push((title.to_string(), content.to_string()));
        Ok("https://www.notion.so/p2".into())
    }
}
