//! Gmail mailbox: IMAP for reading, SMTP via lettre for sending.
//!
//! IMAP and SMTP are blocking, so every call runs on `spawn_blocking`.
//! Message ids handed to callers are `<folder>:<uid>` (see [`MessageRef`]);
//! a bare UID refers to the inbox.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate, TimeDelta};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox as SmtpAddress, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::{MessageParser, MimeHeaders};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::IntegrationError;
use crate::integrations::imap::ImapSession;

const SERVICE: &str = "gmail";

pub const DEFAULT_FOLDER: &str = "INBOX";
pub const DEFAULT_SEARCH_RESULTS: usize = 10;
pub const DEFAULT_SUMMARY_RESULTS: usize = 20;

static MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})\s*월\s*(\d{1,2})\s*일$").unwrap());

/// Gmail account settings. Built by `AppConfig` when both credentials are set.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub address: String,
    pub app_password: SecretString,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Root for saved attachments; requested directories must stay inside it.
    pub attachment_dir: PathBuf,
}

/// Search criteria for `Mailbox::search`.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keywords: Option<String>,
    pub subject: Option<String>,
    /// Exact day; takes precedence over the after/before range.
    pub date_on: Option<String>,
    pub date_after: Option<String>,
    pub date_before: Option<String>,
    pub max_results: usize,
    pub folder: String,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            keywords: None,
            subject: None,
            date_on: None,
            date_after: None,
            date_before: None,
            max_results: DEFAULT_SEARCH_RESULTS,
            folder: DEFAULT_FOLDER.to_string(),
        }
    }
}

impl SearchQuery {
    pub fn keywords(keywords: impl Into<String>) -> Self {
        Self {
            keywords: Some(keywords.into()),
            ..Self::default()
        }
    }

    /// Render as a Gmail `X-GM-RAW` search expression.
    pub fn to_gmail_query(&self) -> Result<String, IntegrationError> {
        let subject = non_blank(self.subject.as_deref());
        let keywords = non_blank(self.keywords.as_deref());
        if subject.is_none() && keywords.is_none() {
            return Err(IntegrationError::InvalidInput(
                "Search query is empty. Please provide keywords or a subject.".to_string(),
            ));
        }

        let mut parts = Vec::new();
        if let Some(subject) = subject {
            parts.push(format!("subject:({subject})"));
        }
        if let Some(keywords) = keywords {
            parts.push(keywords.to_string());
        }

        if let Some(on) = non_blank(self.date_on.as_deref()) {
            let day = parse_date("date_on", on)?;
            let out_of_range = || {
                IntegrationError::InvalidInput(format!("date_on is out of range: {on}"))
            };
            let after = day.pred_opt().ok_or_else(out_of_range)?;
            let before = day.succ_opt().ok_or_else(out_of_range)?;
            parts.push(format!("after:{}", gmail_date(after)));
            parts.push(format!("before:{}", gmail_date(before)));
        } else {
            if let Some(after) = non_blank(self.date_after.as_deref()) {
                parts.push(format!("after:{}", gmail_date(parse_date("date_after", after)?)));
            }
            if let Some(before) = non_blank(self.date_before.as_deref()) {
                parts.push(format!("before:{}", gmail_date(parse_date("date_before", before)?)));
            }
        }

        Ok(parts.join(" "))
    }
}

/// Folder-qualified message id, rendered as `<folder>:<uid>`.
///
/// IMAP UIDs are only unique within a folder, so the folder travels with
/// the UID from search results back into fetch, reply and attachment calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub folder: String,
    pub uid: u32,
}

impl MessageRef {
    pub fn new(folder: impl Into<String>, uid: u32) -> Self {
        Self {
            folder: folder.into(),
            uid,
        }
    }

    /// Parse `<folder>:<uid>`, or a bare UID in the inbox.
    pub fn parse(email_id: &str) -> Result<Self, IntegrationError> {
        let email_id = email_id.trim();
        let invalid = || IntegrationError::InvalidInput(format!("invalid email id '{email_id}'"));
        match email_id.rsplit_once(':') {
            Some((folder, uid)) if !folder.trim().is_empty() => Ok(Self {
                folder: folder.to_string(),
                uid: uid.trim().parse().map_err(|_| invalid())?,
            }),
            Some(_) => Err(invalid()),
            None => Ok(Self {
                folder: DEFAULT_FOLDER.to_string(),
                uid: email_id.parse().map_err(|_| invalid())?,
            }),
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.folder, self.uid)
    }
}

/// Header-level view of a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailSummary {
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
}

/// Full message contents.
#[derive(Debug, Clone, Serialize)]
pub struct EmailDetails {
    #[serde(flatten)]
    pub summary: EmailSummary,
    pub body: String,
    pub attachments: Vec<String>,
    /// RFC 5322 Message-ID, used for reply threading.
    #[serde(skip)]
    pub internet_message_id: Option<String>,
    /// Bare sender address, used as the reply recipient.
    #[serde(skip)]
    pub reply_to: Option<String>,
}

/// Messages received on one day.
#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: String,
    pub emails: Vec<EmailSummary>,
}

impl DailySummary {
    pub fn message(&self) -> String {
        format!("Found {} emails on {}", self.emails.len(), self.date)
    }
}

/// An email to send.
#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html: bool,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<PathBuf>,
}

/// Mailbox operations used by the email tools and the email agent.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Matching messages, newest first.
    async fn search(&self, query: SearchQuery) -> Result<Vec<EmailSummary>, IntegrationError>;

    async fn fetch(&self, email_id: &str) -> Result<EmailDetails, IntegrationError>;

    /// Reply to the sender of `email_id` with a plain-text body.
    async fn reply(&self, email_id: &str, body: &str) -> Result<(), IntegrationError>;

    /// Write every attachment of `email_id` into `dir`, returning the written paths.
    ///
    /// `dir` is relative to the mailbox's attachment root.
    async fn save_attachments(
        &self,
        email_id: &str,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, IntegrationError>;

    /// Messages received on `day` in `folder`, newest first, at most `max_results`.
    async fn summary_on(
        &self,
        day: NaiveDate,
        folder: &str,
        max_results: usize,
    ) -> Result<DailySummary, IntegrationError>;

    /// Inbox messages received `days_ago` days before today, at most `max_results`.
    async fn daily_summary(
        &self,
        days_ago: i64,
        max_results: usize,
    ) -> Result<DailySummary, IntegrationError> {
        let day = days_before(Local::now().date_naive(), days_ago)?;
        self.summary_on(day, DEFAULT_FOLDER, max_results).await
    }

    async fn send(&self, email: OutgoingEmail) -> Result<(), IntegrationError>;
}

/// Gmail over IMAP/SMTP with an app password.
pub struct GmailMailbox {
    config: Arc<GmailConfig>,
}

impl GmailMailbox {
    pub fn new(config: GmailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run `op` against a logged-in session with `folder` selected.
    async fn with_session<T, F>(&self, folder: String, op: F) -> Result<T, IntegrationError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, IntegrationError> + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::connect(&config.imap_host, config.imap_port)?;
            session.login(&config.address, config.app_password.expose_secret())?;
            session.select(&folder)?;
            let result = op(&mut session);
            session.logout();
            result
        })
        .await
        .map_err(join_error)?
    }

    async fn fetch_raw(&self, message: &MessageRef) -> Result<Vec<u8>, IntegrationError> {
        let uid = message.uid;
        let raw = self
            .with_session(message.folder.clone(), move |s| s.uid_fetch_rfc822(uid))
            .await?;
        raw.ok_or_else(|| IntegrationError::NotFound(format!("Email not found: {message}")))
    }

    async fn deliver(&self, message: Message) -> Result<(), IntegrationError> {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.address.clone(),
                config.app_password.expose_secret().to_string(),
            );
            // 465 is implicit TLS, anything else upgrades with STARTTLS.
            let builder = if config.smtp_port == 465 {
                SmtpTransport::relay(&config.smtp_host)
            } else {
                SmtpTransport::starttls_relay(&config.smtp_host)
            }
            .map_err(smtp_error)?;
            let transport = builder.port(config.smtp_port).credentials(creds).build();
            transport.send(&message).map_err(smtp_error)?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    fn sender(&self) -> Result<SmtpAddress, IntegrationError> {
        parse_address(&self.config.address)
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn search(&self, query: SearchQuery) -> Result<Vec<EmailSummary>, IntegrationError> {
        let raw_query = query.to_gmail_query()?;
        let max_results = query.max_results.max(1);
        tracing::info!(query = %raw_query, folder = %query.folder, "Searching mailbox");

        let folder = query.folder.clone();
        self.with_session(query.folder, move |s| {
            let uids = newest_first(s.uid_search_gmail(&raw_query)?, max_results);
            fetch_summaries(s, &folder, uids)
        })
        .await
    }

    async fn fetch(&self, email_id: &str) -> Result<EmailDetails, IntegrationError> {
        let message = MessageRef::parse(email_id)?;
        let raw = self.fetch_raw(&message).await?;
        parse_message(&message, &raw).ok_or_else(|| IntegrationError::Protocol {
            service: SERVICE.to_string(),
            reason: format!("could not parse message {message}"),
        })
    }

    async fn reply(&self, email_id: &str, body: &str) -> Result<(), IntegrationError> {
        let original = self.fetch(email_id).await?;
        let recipient = original.reply_to.clone().ok_or_else(|| {
            IntegrationError::InvalidInput(format!("email {email_id} has no sender address"))
        })?;

        let mut builder = Message::builder()
            .from(self.sender()?)
            .to(parse_address(&recipient)?)
            .subject(reply_subject(&original.summary.subject))
            .header(ContentType::TEXT_PLAIN);
        if let Some(id) = &original.internet_message_id {
            let id = format!("<{}>", id.trim_matches(['<', '>']));
            builder = builder.in_reply_to(id.clone()).references(id);
        }
        let message = builder.body(body.to_string()).map_err(build_error)?;

        self.deliver(message).await?;
        tracing::info!(email_id, to = %recipient, "Reply sent");
        Ok(())
    }

    async fn save_attachments(
        &self,
        email_id: &str,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, IntegrationError> {
        let dir = confine_path(&self.config.attachment_dir, dir)?;
        let message = MessageRef::parse(email_id)?;
        let raw = self.fetch_raw(&message).await?;
        let email_id = message.to_string();

        tokio::task::spawn_blocking(move || {
            let parsed = MessageParser::default().parse(&raw).ok_or_else(|| {
                IntegrationError::Protocol {
                    service: SERVICE.to_string(),
                    reason: format!("could not parse message {email_id}"),
                }
            })?;

            let mut saved = Vec::new();
            for part in parsed.attachments() {
                let Some(name) = MimeHeaders::attachment_name(part) else {
                    continue;
                };
                if saved.is_empty() {
                    std::fs::create_dir_all(&dir)?;
                }
                let path = dir.join(sanitize_filename(name));
                std::fs::write(&path, part.contents())?;
                saved.push(path);
            }

            if saved.is_empty() {
                return Err(IntegrationError::NotFound(format!(
                    "No attachments found in email {email_id}"
                )));
            }
            tracing::info!(email_id = %email_id, count = saved.len(), "Saved attachments");
            Ok(saved)
        })
        .await
        .map_err(join_error)?
    }

    async fn summary_on(
        &self,
        day: NaiveDate,
        folder: &str,
        max_results: usize,
    ) -> Result<DailySummary, IntegrationError> {
        let criteria = format!("ON {}", imap_date(day));
        let max_results = max_results.max(1);
        tracing::info!(%day, folder, "Listing messages for day");

        let selected = folder.to_string();
        let emails = self
            .with_session(folder.to_string(), move |s| {
                let uids = newest_first(s.uid_search(&criteria)?, max_results);
                fetch_summaries(s, &selected, uids)
            })
            .await?;

        Ok(DailySummary {
            date: day.format("%Y-%m-%d").to_string(),
            emails,
        })
    }

    async fn send(&self, email: OutgoingEmail) -> Result<(), IntegrationError> {
        if email.to.is_empty() {
            return Err(IntegrationError::InvalidInput(
                "at least one recipient is required".to_string(),
            ));
        }

        let mut builder = Message::builder()
            .from(self.sender()?)
            .subject(email.subject.clone());
        for to in &email.to {
            builder = builder.to(parse_address(to)?);
        }
        for cc in &email.cc {
            builder = builder.cc(parse_address(cc)?);
        }
        for bcc in &email.bcc {
            builder = builder.bcc(parse_address(bcc)?);
        }

        let content_type = if email.html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        let message = if email.attachments.is_empty() {
            builder
                .header(content_type)
                .body(email.body.clone())
                .map_err(build_error)?
        } else {
            let mut multipart = MultiPart::mixed().singlepart(
                SinglePart::builder()
                    .header(content_type)
                    .body(email.body.clone()),
            );
            for path in &email.attachments {
                let bytes = tokio::fs::read(path).await?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "attachment".to_string());
                let octet = ContentType::parse("application/octet-stream").map_err(|e| {
                    IntegrationError::InvalidInput(format!("bad attachment content type: {e}"))
                })?;
                multipart = multipart.singlepart(Attachment::new(name).body(bytes, octet));
            }
            builder.multipart(multipart).map_err(build_error)?
        };

        self.deliver(message).await?;
        tracing::info!(
            recipients = email.to.len(),
            cc = email.cc.len(),
            bcc = email.bcc.len(),
            "Email sent"
        );
        Ok(())
    }
}

fn fetch_summaries(
    session: &mut ImapSession,
    folder: &str,
    uids: Vec<u32>,
) -> Result<Vec<EmailSummary>, IntegrationError> {
    let mut found = Vec::with_capacity(uids.len());
    for uid in uids {
        if let Some(raw) = session.uid_fetch_rfc822(uid)?
            && let Some(details) = parse_message(&MessageRef::new(folder, uid), &raw)
        {
            found.push(details.summary);
        }
    }
    Ok(found)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Accepts `YYYY-MM-DD` or `YYYY/MM/DD`.
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, IntegrationError> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y/%m/%d"))
        .map_err(|_| {
            IntegrationError::InvalidInput(format!(
                "Invalid date format for '{field}': {value}. Please use YYYY-MM-DD or YYYY/MM/DD."
            ))
        })
}

/// Day for a summary request: `YYYY-MM-DD`, `YYYY/MM/DD`, or `M월 D일` in the current year.
pub fn parse_summary_date(value: &str, today: NaiveDate) -> Result<NaiveDate, IntegrationError> {
    let value = value.trim();
    if let Some(caps) = MONTH_DAY.captures(value) {
        let month = caps[1].parse().unwrap_or(0);
        let day = caps[2].parse().unwrap_or(0);
        return NaiveDate::from_ymd_opt(today.year(), month, day).ok_or_else(|| {
            IntegrationError::InvalidInput(format!("Invalid date: {value}"))
        });
    }
    parse_date("date", value).map_err(|_| {
        IntegrationError::InvalidInput(format!(
            "Invalid date format: {value}. Please use YYYY-MM-DD, YYYY/MM/DD or 'M월 D일'."
        ))
    })
}

/// `today` minus `days_ago` days; negative or unrepresentable offsets are rejected.
pub fn days_before(today: NaiveDate, days_ago: i64) -> Result<NaiveDate, IntegrationError> {
    if days_ago < 0 {
        return Err(IntegrationError::InvalidInput(
            "days_ago must be zero or positive".to_string(),
        ));
    }
    TimeDelta::try_days(days_ago)
        .and_then(|delta| today.checked_sub_signed(delta))
        .ok_or_else(|| {
            IntegrationError::InvalidInput(format!("days_ago is out of range: {days_ago}"))
        })
}

/// Resolve `requested` under `base`, rejecting absolute paths and `..`.
pub fn confine_path(base: &Path, requested: &Path) -> Result<PathBuf, IntegrationError> {
    let mut confined = base.to_path_buf();
    for component in requested.components() {
        match component {
            Component::Normal(part) => confined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(IntegrationError::InvalidInput(format!(
                    "save_path must be a relative path inside the attachment directory: {}",
                    requested.display()
                )));
            }
        }
    }
    Ok(confined)
}

fn gmail_date(day: NaiveDate) -> String {
    day.format("%Y/%m/%d").to_string()
}

/// IMAP search date, e.g. `05-Mar-2024`.
pub fn imap_date(day: NaiveDate) -> String {
    day.format("%d-%b-%Y").to_string()
}

/// Highest UIDs first, at most `limit` of them.
pub fn newest_first(mut uids: Vec<u32>, limit: usize) -> Vec<u32> {
    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.dedup();
    uids.truncate(limit);
    uids
}

fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Keep only the final path component and drop characters that are unsafe in file names.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}

/// Parse an RFC822 message into details keyed by `message`.
pub(crate) fn parse_message(message: &MessageRef, raw: &[u8]) -> Option<EmailDetails> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = parsed
        .from()
        .and_then(|addr| addr.first())
        .map(format_addr)
        .unwrap_or_else(|| "unknown".to_string());
    let reply_to = parsed
        .reply_to()
        .or_else(|| parsed.from())
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(str::to_string);
    let to = parsed
        .to()
        .map(|addr| addr.iter().map(format_addr).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    let attachments = parsed
        .attachments()
        .filter_map(|part| MimeHeaders::attachment_name(part).map(str::to_string))
        .collect();

    Some(EmailDetails {
        summary: EmailSummary {
            message_id: message.to_string(),
            from,
            to,
            subject: parsed.subject().unwrap_or("(no subject)").to_string(),
            date: parsed.date().map(|d| d.to_rfc3339()).unwrap_or_default(),
        },
        body: extract_text(&parsed),
        attachments,
        internet_message_id: parsed.message_id().map(str::to_string),
        reply_to,
    })
}

fn format_addr(addr: &mail_parser::Addr) -> String {
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Readable text of a parsed email, falling back to stripped HTML.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    "(no readable content)".to_string()
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_address(value: &str) -> Result<SmtpAddress, IntegrationError> {
    value
        .trim()
        .parse()
        .map_err(|e| IntegrationError::InvalidInput(format!("invalid email address '{value}': {e}")))
}

fn build_error(e: lettre::error::Error) -> IntegrationError {
    IntegrationError::InvalidInput(format!("could not build email: {e}"))
}

fn smtp_error(e: lettre::transport::smtp::Error) -> IntegrationError {
    IntegrationError::Http {
        service: "smtp".to_string(),
        reason: e.to_string(),
    }
}

fn join_error(e: tokio::task::JoinError) -> IntegrationError {
    IntegrationError::Protocol {
        service: SERVICE.to_string(),
        reason: format!("mailbox task failed: {e}"),
    }
}
