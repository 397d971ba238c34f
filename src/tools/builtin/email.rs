//! Email tools backed by a `Mailbox`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Local;
use serde_json::json;

use crate::context::ToolContext;
use crate::integrations::mailbox::{
    DEFAULT_FOLDER, DEFAULT_SEARCH_RESULTS, DEFAULT_SUMMARY_RESULTS, DailySummary,
    parse_summary_date,
};
use crate::integrations::{Mailbox, OutgoingEmail, SearchQuery};
use crate::tools::tool::{
    Tool, ToolDomain, ToolError, ToolOutput, optional_str, optional_str_list, optional_u64,
    require_str,
};

/// Build a `SearchQuery` from `search_emails` arguments.
pub fn search_query_from_params(params: &serde_json::Value) -> Result<SearchQuery, ToolError> {
    let owned = |key: &str| optional_str(params, key).map(str::to_string);
    Ok(SearchQuery {
        keywords: owned("keywords"),
        subject: owned("subject"),
        date_on: owned("date_on"),
        date_after: owned("date_after"),
        date_before: owned("date_before"),
        max_results: optional_u64(params, "max_results")?
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_SEARCH_RESULTS),
        folder: owned("mail_folder").unwrap_or_else(|| DEFAULT_FOLDER.to_string()),
    })
}

/// Search the mailbox.
pub struct SearchEmailsTool {
    mailbox: Arc<dyn Mailbox>,
}

impl SearchEmailsTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for SearchEmailsTool {
    fn name(&self) -> &str {
        "search_emails"
    }

    fn description(&self) -> &str {
        "Search the user's Gmail. Provide keywords and/or a subject. Optionally restrict \
         to one day (date_on) or a range (date_after/date_before), all as YYYY-MM-DD. \
         Returns the newest matching emails with their ids (folder:uid)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "keywords": {
                    "type": "string",
                    "description": "Words to search for anywhere in the email"
                },
                "subject": {
                    "type": "string",
                    "description": "Words that must appear in the subject"
                },
                "date_on": {
                    "type": "string",
                    "description": "Exact date (YYYY-MM-DD); overrides the range"
                },
                "date_after": {
                    "type": "string",
                    "description": "Only emails after this date (YYYY-MM-DD)"
                },
                "date_before": {
                    "type": "string",
                    "description": "Only emails before this date (YYYY-MM-DD)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of emails to return (default: 10)"
                },
                "mail_folder": {
                    "type": "string",
                    "description": "Mailbox folder to search (default: INBOX)"
                }
            },
            "required": []
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let query = search_query_from_params(&params)?;
        let emails = self.mailbox.search(query).await?;
        Ok(ToolOutput::success(
            json!({ "count": emails.len(), "emails": emails }),
            start.elapsed(),
        ))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Email
    }
}

/// Fetch one email in full.
pub struct GetEmailDetailsTool {
    mailbox: Arc<dyn Mailbox>,
}

impl GetEmailDetailsTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for GetEmailDetailsTool {
    fn name(&self) -> &str {
        "get_email_details"
    }

    fn description(&self) -> &str {
        "Get the sender, recipients, subject, date and body of an email by its id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "email_id": {
                    "type": "string",
                    "description": "Email id returned by search_emails, e.g. INBOX:42"
                }
            },
            "required": ["email_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let email_id = require_str(&params, "email_id")?;
        let details = self.mailbox.fetch(email_id).await?;
        let value = serde_json::to_value(details)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::success(value, start.elapsed()))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Email
    }
}

/// Reply to the sender of an email.
pub struct SendReplyTool {
    mailbox: Arc<dyn Mailbox>,
}

impl SendReplyTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for SendReplyTool {
    fn name(&self) -> &str {
        "send_reply"
    }

    fn description(&self) -> &str {
        "Send a plain-text reply to the sender of an email. Confirm the reply text \
         with the user before calling this."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "email_id": {
                    "type": "string",
                    "description": "Id of the email to reply to"
                },
                "reply_body": {
                    "type": "string",
                    "description": "Body of the reply"
                }
            },
            "required": ["email_id", "reply_body"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let email_id = require_str(&params, "email_id")?;
        let body = require_str(&params, "reply_body")?;
        self.mailbox.reply(email_id, body).await?;
        Ok(ToolOutput::text("Reply sent successfully.", start.elapsed()))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Email
    }
}

/// Save an email's attachments to disk.
pub struct SaveAttachmentsTool {
    mailbox: Arc<dyn Mailbox>,
}

impl SaveAttachmentsTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for SaveAttachmentsTool {
    fn name(&self) -> &str {
        "save_attachments"
    }

    fn description(&self) -> &str {
        "Save all attachments of an email into a directory under the attachment folder."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "email_id": {
                    "type": "string",
                    "description": "Id of the email"
                },
                "save_path": {
                    "type": "string",
                    "description": "Relative directory inside the attachment folder"
                }
            },
            "required": ["email_id", "save_path"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let email_id = require_str(&params, "email_id")?;
        let dir = PathBuf::from(require_str(&params, "save_path")?);
        let saved = self.mailbox.save_attachments(email_id, &dir).await?;
        let paths: Vec<String> = saved.iter().map(|p| p.display().to_string()).collect();
        Ok(ToolOutput::success(
            json!({
                "message": format!("Saved {} attachment(s) to {}", paths.len(), dir.display()),
                "saved": paths,
            }),
            start.elapsed(),
        ))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Email
    }
}

/// Emails received on a given day.
pub struct DailyEmailSummaryTool {
    mailbox: Arc<dyn Mailbox>,
}

impl DailyEmailSummaryTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for DailyEmailSummaryTool {
    fn name(&self) -> &str {
        "get_daily_email_summary"
    }

    fn description(&self) -> &str {
        "List the emails received on one day. days_ago=0 is today, 1 is yesterday."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "days_ago": {
                    "type": "integer",
                    "description": "How many days before today (default: 0)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of emails to return (default: 20)"
                }
            },
            "required": []
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let days_ago = optional_u64(&params, "days_ago")?.unwrap_or(0);
        let days_ago = i64::try_from(days_ago).map_err(|_| {
            ToolError::InvalidParameters(format!("days_ago is out of range: {days_ago}"))
        })?;
        let max_results = optional_u64(&params, "max_results")?
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_SUMMARY_RESULTS);
        let summary = self.mailbox.daily_summary(days_ago, max_results).await?;
        Ok(summary_output(summary, start))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Email
    }
}

/// Emails received on a calendar date in any folder.
pub struct EmailSummaryOnTool {
    mailbox: Arc<dyn Mailbox>,
}

impl EmailSummaryOnTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for EmailSummaryOnTool {
    fn name(&self) -> &str {
        "get_email_summary_on"
    }

    fn description(&self) -> &str {
        "List the emails received on a specific date. Accepts YYYY-MM-DD, YYYY/MM/DD \
         or a Korean month and day such as '3월 5일' (current year)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "date_on": {
                    "type": "string",
                    "description": "The day to list, e.g. 2024-03-05 or 3월 5일"
                },
                "mail_folder": {
                    "type": "string",
                    "description": "Mailbox folder (default: INBOX)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of emails to return (default: 20)"
                }
            },
            "required": ["date_on"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let day = parse_summary_date(require_str(&params, "date_on")?, Local::now().date_naive())?;
        let folder = optional_str(&params, "mail_folder").unwrap_or(DEFAULT_FOLDER);
        let max_results = optional_u64(&params, "max_results")?
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_SUMMARY_RESULTS);
        let summary = self.mailbox.summary_on(day, folder, max_results).await?;
        Ok(summary_output(summary, start))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Email
    }
}

fn summary_output(summary: DailySummary, start: Instant) -> ToolOutput {
    ToolOutput::success(
        json!({
            "message": summary.message(),
            "date": summary.date,
            "emails": summary.emails,
        }),
        start.elapsed(),
    )
}

/// Compose and send a new email.
pub struct SendEmailTool {
    mailbox: Arc<dyn Mailbox>,
}

impl SendEmailTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send a new email. Confirm recipients, subject and body with the user first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "description": "Recipient address; separate several with commas"
                },
                "subject": {
                    "type": "string",
                    "description": "Email subject"
                },
                "body": {
                    "type": "string",
                    "description": "Email body"
                },
                "body_type": {
                    "type": "string",
                    "enum": ["plain", "html"],
                    "description": "Body format (default: plain)"
                },
                "cc": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "CC recipients"
                },
                "bcc": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "BCC recipients"
                }
            },
            "required": ["to", "subject", "body"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let to = optional_str_list(&params, "to");
        if to.is_empty() {
            return Err(ToolError::InvalidParameters(
                "missing required parameter 'to'".to_string(),
            ));
        }
        let html = match optional_str(&params, "body_type").unwrap_or("plain") {
            "plain" => false,
            "html" => true,
            other => {
                return Err(ToolError::InvalidParameters(format!(
                    "body_type must be 'plain' or 'html', got '{other}'"
                )));
            }
        };

        let email = OutgoingEmail {
            to,
            subject: require_str(&params, "subject")?.to_string(),
            body: require_str(&params, "body")?.to_string(),
            html,
            cc: optional_str_list(&params, "cc"),
            bcc: optional_str_list(&params, "bcc"),
            attachments: Vec::new(),
        };
        self.mailbox.send(email).await?;
        Ok(ToolOutput::text("Email sent successfully.", start.elapsed()))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Email
    }
}
