//! Minimal blocking IMAP client over rustls. Run it inside `spawn_blocking`.
//!
//! Only what the mailbox needs: LOGIN, SELECT, UID SEARCH, UID FETCH, LOGOUT.
//! Server literals (`{N}\r\n` followed by N raw bytes) are read exactly, so
//! message bodies survive byte-for-byte.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;

use crate::error::IntegrationError;

const SERVICE: &str = "imap";
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Response to one tagged command.
#[derive(Debug, Default)]
pub(crate) struct Response {
    /// Untagged and continuation lines, CRLF stripped.
    pub lines: Vec<String>,
    /// Literal payloads in the order they arrived.
    pub literals: Vec<Vec<u8>>,
}

/// An authenticated-or-not IMAP connection.
pub(crate) struct ImapSession {
    tls: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    /// Open a TLS connection and consume the server greeting.
    pub fn connect(host: &str, port: u16) -> Result<Self, IntegrationError> {
        let tcp = TcpStream::connect((host, port)).map_err(io_error)?;
        tcp.set_read_timeout(Some(SOCKET_TIMEOUT)).map_err(io_error)?;
        tcp.set_write_timeout(Some(SOCKET_TIMEOUT)).map_err(io_error)?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(host.to_string()).map_err(|e| protocol(format!(
            "invalid IMAP host '{host}': {e}"
        )))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| protocol(format!("TLS setup failed: {e}")))?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(protocol(format!("unexpected greeting: {}", greeting.trim())));
        }
        Ok(session)
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), IntegrationError> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(password));
        self.command(&cmd).map_err(|e| match e {
            IntegrationError::Protocol { reason, .. } => IntegrationError::NotConfigured {
                service: "gmail".to_string(),
                hint: format!("IMAP login rejected ({reason}); check GMAIL_APP_PASSWORD"),
            },
            other => other,
        })?;
        Ok(())
    }

    pub fn select(&mut self, folder: &str) -> Result<(), IntegrationError> {
        self.command(&format!("SELECT {}", quote(folder)))?;
        Ok(())
    }

    /// `UID SEARCH` with plain ASCII criteria, e.g. `ON 01-Jan-2024`.
    pub fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>, IntegrationError> {
        let response = self.command(&format!("UID SEARCH {criteria}"))?;
        Ok(parse_search(&response.lines))
    }

    /// `UID SEARCH CHARSET UTF-8 X-GM-RAW <literal>`, safe for non-ASCII queries.
    pub fn uid_search_gmail(&mut self, raw_query: &str) -> Result<Vec<u32>, IntegrationError> {
        let response =
            self.command_with_literal("UID SEARCH CHARSET UTF-8 X-GM-RAW", raw_query.as_bytes())?;
        Ok(parse_search(&response.lines))
    }

    /// Full RFC822 source of one message, `None` if the UID no longer exists.
    pub fn uid_fetch_rfc822(&mut self, uid: u32) -> Result<Option<Vec<u8>>, IntegrationError> {
        let mut response = self.command(&format!("UID FETCH {uid} (RFC822)"))?;
        Ok(response.literals.pop())
    }

    /// Best-effort LOGOUT; errors are irrelevant once we are done.
    pub fn logout(mut self) {
        if let Err(e) = self.command("LOGOUT") {
            tracing::debug!(error = %e, "IMAP logout failed");
        }
    }

    fn next_tag(&mut self) -> String {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    fn command(&mut self, cmd: &str) -> Result<Response, IntegrationError> {
        let tag = self.next_tag();
        self.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.read_response(&tag)
    }

    /// Send `<prefix> {len}`, wait for the continuation, then send the literal.
    fn command_with_literal(
        &mut self,
        prefix: &str,
        literal: &[u8],
    ) -> Result<Response, IntegrationError> {
        let tag = self.next_tag();
        self.write_all(format!("{tag} {prefix} {{{}}}\r\n", literal.len()).as_bytes())?;

        let line = self.read_line()?;
        if !line.starts_with('+') {
            let reason = line.trim().to_string();
            return Err(protocol(format!("server refused literal: {reason}")));
        }

        self.write_all(literal)?;
        self.write_all(b"\r\n")?;
        self.read_response(&tag)
    }

    fn read_response(&mut self, tag: &str) -> Result<Response, IntegrationError> {
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(tag).map(str::trim_start) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                return Err(protocol(status.trim().to_string()));
            }

            if let Some(size) = literal_size(&line) {
                let mut buf = vec![0u8; size];
                self.tls.read_exact(&mut buf).map_err(io_error)?;
                response.literals.push(buf);
            }
            response.lines.push(line.trim_end().to_string());
        }
    }

    fn read_line(&mut self) -> Result<String, IntegrationError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.tls.read(&mut byte) {
                Ok(0) => return Err(protocol("connection closed".to_string())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(io_error(e)),
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), IntegrationError> {
        self.tls.write_all(bytes).map_err(io_error)?;
        self.tls.flush().map_err(io_error)
    }
}

/// Quote an IMAP string argument.
pub(crate) fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `{123}` at the end of a line announces a literal of that many bytes.
fn literal_size(line: &str) -> Option<usize> {
    let line = line.trim_end();
    let inner = line.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].parse().ok()
}

/// Collect UIDs from `* SEARCH` lines.
pub(crate) fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|uid| uid.parse().ok())
        .collect()
}

fn io_error(e: std::io::Error) -> IntegrationError {
    IntegrationError::Http {
        service: SERVICE.to_string(),
        reason: e.to_string(),
    }
}

fn protocol(reason: String) -> IntegrationError {
    IntegrationError::Protocol {
        service: SERVICE.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("inbox"), "\"inbox\"");
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn literal_size_parses_trailing_braces() {
        assert_eq!(literal_size("* 1 FETCH (UID 5 RFC822 {342}\r\n"), Some(342));
        assert_eq!(literal_size("* 1 FETCH (FLAGS (\\Seen))\r\n"), None);
        assert_eq!(literal_size("{abc}"), None);
    }

    #[test]
    fn search_lines_yield_uids() {
        let lines = vec![
            "* SEARCH 3 17 42".to_string(),
            "* OK still here".to_string(),
        ];
        assert_eq!(parse_search(&lines), vec![3, 17, 42]);
        assert!(parse_search(&["* SEARCH".to_string()]).is_empty());
    }
}
