//! Document workspace (Notion) client.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::IntegrationError;
use crate::integrations::{check_response, http_client, transport_error};

const SERVICE: &str = "notion";
const NOTION_VERSION: &str = "2022-06-28";

/// Max characters in one Notion rich-text block.
pub const MAX_BLOCK_CHARS: usize = 1999;

/// Results requested per search.
pub const SEARCH_PAGE_SIZE: u32 = 20;

/// Block-children pages followed before giving up on very long documents.
const MAX_CHILD_PAGES: usize = 10;

const TEXT_BLOCK_TYPES: &[&str] = &[
    "paragraph",
    "heading_1",
    "heading_2",
    "heading_3",
    "bulleted_list_item",
    "numbered_list_item",
    "to_do",
    "toggle",
    "code",
    "quote",
];

/// Notion configuration.
#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub api_key: SecretString,
    /// Page new documents are created under.
    pub parent_page_id: Option<String>,
    pub base_url: String,
}

impl NotionConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.notion.com/v1";
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    /// `YYYY-MM-DD HH:MM:SS`, UTC.
    pub last_edited_time: String,
}

/// Read/write access to a document workspace.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Titled pages matching `keyword`, most recently edited first.
    async fn search_pages(&self, keyword: &str) -> Result<Vec<PageSummary>, IntegrationError>;

    /// Plain text of a page, one block per line.
    async fn page_content(&self, page_id: &str) -> Result<String, IntegrationError>;

    /// Create a page and return its URL.
    async fn create_page(&self, title: &str, content: &str) -> Result<String, IntegrationError>;
}

/// Notion REST client.
pub struct NotionClient {
    client: reqwest::Client,
    config: NotionConfig,
}

impl NotionClient {
    pub fn new(config: NotionConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            client: http_client(SERVICE)?,
            config,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        self.client
            .request(method, url)
            .bearer_auth(self.config.api_key.expose_secret())
            .header("Notion-Version", NOTION_VERSION)
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value, IntegrationError> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let response = check_response(SERVICE, response).await?;
        response.json().await.map_err(|e| IntegrationError::Protocol {
            service: SERVICE.to_string(),
            reason: format!("invalid JSON: {e}"),
        })
    }
}

#[async_trait]
impl DocumentStore for NotionClient {
    async fn search_pages(&self, keyword: &str) -> Result<Vec<PageSummary>, IntegrationError> {
        let body = json!({
            "query": keyword,
            "page_size": SEARCH_PAGE_SIZE,
            "sort": {"direction": "descending", "timestamp": "last_edited_time"},
        });
        let response = self
            .send_json(self.request(reqwest::Method::POST, "search").json(&body))
            .await?;

        let pages = search_results(&response);
        tracing::debug!(keyword, hits = pages.len(), "Notion search");
        Ok(pages)
    }

    async fn page_content(&self, page_id: &str) -> Result<String, IntegrationError> {
        let page_id = page_id.trim();
        if page_id.is_empty() {
            return Err(IntegrationError::InvalidInput("page_id is empty".to_string()));
        }

        let mut lines = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_CHILD_PAGES {
            let mut request = self.request(
                reqwest::Method::GET,
                &format!("blocks/{page_id}/children"),
            );
            request = request.query(&[("page_size", "100")]);
            if let Some(ref c) = cursor {
                request = request.query(&[("start_cursor", c.as_str())]);
            }
            let response = self.send_json(request).await?;

            if let Some(blocks) = response.get("results").and_then(Value::as_array) {
                lines.extend(blocks.iter().filter_map(block_text));
            }

            cursor = match (
                response.get("has_more").and_then(Value::as_bool),
                response.get("next_cursor").and_then(Value::as_str),
            ) {
                (Some(true), Some(next)) => Some(next.to_string()),
                _ => break,
            };
        }
        if cursor.is_some() {
            tracing::warn!(page_id, "Notion page truncated after {MAX_CHILD_PAGES} block pages");
        }

        Ok(lines.join("\n"))
    }

    async fn create_page(&self, title: &str, content: &str) -> Result<String, IntegrationError> {
        let parent = self
            .config
            .parent_page_id
            .as_deref()
            .ok_or_else(|| IntegrationError::NotConfigured {
                service: SERVICE.to_string(),
                hint: "set NOTION_PARENT_PAGE_ID to upload pages".to_string(),
            })?;
        if title.trim().is_empty() {
            return Err(IntegrationError::InvalidInput("title is empty".to_string()));
        }

        let body = page_body(parent, title, content);
        let response = self
            .send_json(self.request(reqwest::Method::POST, "pages").json(&body))
            .await?;

        let url = response
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        tracing::info!(title, url = %url, "Created Notion page");
        Ok(url)
    }
}

/// Body for `POST /pages`: a title plus one paragraph capped at the block limit.
fn page_body(parent_page_id: &str, title: &str, content: &str) -> Value {
    let truncated: String = content.chars().take(MAX_BLOCK_CHARS).collect();
    json!({
        "parent": {"page_id": parent_page_id},
        "properties": {
            "title": {"title": [{"text": {"content": title}}]}
        },
        "children": [{
            "object": "block",
            "type": "paragraph",
            "paragraph": {
                "rich_text": [{"type": "text", "text": {"content": truncated}}]
            }
        }]
    })
}

/// Keep titled pages from a search response.
fn search_results(response: &Value) -> Vec<PageSummary> {
    let Some(results) = response.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };

    results
        .iter()
        .filter(|item| item.get("object").and_then(Value::as_str) == Some("page"))
        .filter_map(|page| {
            let title = page_title(page)?;
            let id = page.get("id").and_then(Value::as_str)?.to_string();
            let edited = page
                .get("last_edited_time")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(PageSummary {
                id,
                title,
                last_edited_time: edited.chars().take(19).collect::<String>().replace('T', " "),
            })
        })
        .collect()
}

/// First title property's first plain-text run.
fn page_title(page: &Value) -> Option<String> {
    let properties = page.get("properties")?.as_object()?;
    properties
        .values()
        .find(|prop| prop.get("type").and_then(Value::as_str) == Some("title"))
        .and_then(|prop| prop.get("title")?.as_array()?.first()?.get("plain_text")?.as_str())
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty())
}

/// Text of a single block, if it carries any.
fn block_text(block: &Value) -> Option<String> {
    let kind = block.get("type").and_then(Value::as_str)?;
    let body = block.get(kind)?;

    let text = if TEXT_BLOCK_TYPES.contains(&kind) {
        let runs = body
            .get("rich_text")
            .or_else(|| body.get("text"))
            .and_then(Value::as_array)?;
        runs.iter()
            .filter_map(|run| run.get("plain_text").and_then(Value::as_str))
            .collect::<String>()
    } else if kind == "child_page" {
        body.get("title").and_then(Value::as_str)?.to_string()
    } else {
        return None;
    };

    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer, parent: Option<&str>) -> NotionClient {
        NotionClient::new(NotionConfig {
            api_key: SecretString::from("secret_test"),
            parent_page_id: parent.map(str::to_string),
            base_url: server.uri(),
        })
        .unwrap()
    }

    fn paragraph(text: &str) -> Value {
        json!({
            "type": "paragraph",
            "paragraph": {"rich_text": [{"plain_text": text}]}
        })
    }

    #[test]
    fn block_text_reads_supported_types() {
        assert_eq!(block_text(&paragraph("hello")).as_deref(), Some("hello"));
        let heading = json!({
            "type": "heading_2",
            "heading_2": {"rich_text": [{"plain_text": "Q3 "}, {"plain_text": "plan"}]}
        });
        assert_eq!(block_text(&heading).as_deref(), Some("Q3 plan"));
        let child = json!({"type": "child_page", "child_page": {"title": "Notes"}});
        assert_eq!(block_text(&child).as_deref(), Some("Notes"));
        let image = json!({"type": "image", "image": {"file": {}}});
        assert_eq!(block_text(&image), None);
        assert_eq!(block_text(&paragraph("")), None);
    }

    #[test]
    fn search_skips_untitled_and_non_pages() {
        let response = json!({
            "results": [
                {
                    "object": "page",
                    "id": "p1",
                    "last_edited_time": "2024-05-01T09:30:00.000Z",
                    "properties": {"Name": {"type": "title", "title": [{"plain_text": "Roadmap"}]}}
                },
                {
                    "object": "page",
                    "id": "p2",
                    "properties": {"Name": {"type": "title", "title": []}}
                },
                {"object": "database", "id": "d1"}
            ]
        });
        let pages = search_results(&response);
        assert_eq!(
            pages,
            vec![PageSummary {
                id: "p1".into(),
                title: "Roadmap".into(),
                last_edited_time: "2024-05-01 09:30:00".into(),
            }]
        );
    }

    #[test]
    fn page_body_truncates_content() {
        let long = "가".repeat(2500);
        let body = page_body("parent", "Title", &long);
        let text = body["children"][0]["paragraph"]["rich_text"][0]["text"]["content"]
            .as_str()
            .unwrap();
        assert_eq!(text.chars().count(), MAX_BLOCK_CHARS);
        assert_eq!(body["parent"]["page_id"], "parent");
    }

    #[tokio::test]
    async fn search_sends_version_header_and_sort() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("Notion-Version", NOTION_VERSION))
            .and(header("authorization", "Bearer secret_test"))
            .and(body_partial_json(json!({
                "query": "roadmap",
                "page_size": 20,
                "sort": {"direction": "descending", "timestamp": "last_edited_time"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(1)
            .mount(&server)
            .await;

        let pages = client_for(&server, None).search_pages("roadmap").await.unwrap();
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn page_content_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocks/page-1/children"))
            .and(wiremock::matchers::query_param("start_cursor", "c2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [paragraph("second")],
                "has_more": false,
                "next_cursor": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blocks/page-1/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [paragraph("first")],
                "has_more": true,
                "next_cursor": "c2"
            })))
            .mount(&server)
            .await;

        let content = client_for(&server, None).page_content("page-1").await.unwrap();
        assert_eq!(content, "first\nsecond");
    }

    #[tokio::test]
    async fn create_page_requires_parent() {
        let server = MockServer::start().await;
        let err = client_for(&server, None)
            .create_page("Title", "body")
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn create_page_returns_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages"))
            .and(body_partial_json(json!({"parent": {"page_id": "parent-1"}})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"url": "https://www.notion.so/Title-abc"})),
            )
            .mount(&server)
            .await;

        let url = client_for(&server, Some("parent-1"))
            .create_page("Title", "body")
            .await
            .unwrap();
        assert_eq!(url, "https://www.notion.so/Title-abc");
    }
}
