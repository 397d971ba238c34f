//! Notion tools backed by a `DocumentStore`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::context::ToolContext;
use crate::integrations::DocumentStore;
use crate::tools::tool::{Tool, ToolDomain, ToolError, ToolOutput, require_str};

/// Find pages by title keyword.
pub struct SearchPagesTool {
    store: Arc<dyn DocumentStore>,
}

impl SearchPagesTool {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchPagesTool {
    fn name(&self) -> &str {
        "search_notion_pages"
    }

    fn description(&self) -> &str {
        "Search Notion pages by keyword. Returns page ids, titles and last edit times, \
         most recently edited first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "keyword": {
                    "type": "string",
                    "description": "Keyword to search for"
                }
            },
            "required": ["keyword"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let keyword = require_str(&params, "keyword")?;
        let pages = self.store.search_pages(keyword).await?;
        Ok(ToolOutput::success(
            json!({ "count": pages.len(), "pages": pages }),
            start.elapsed(),
        ))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Documents
    }
}

/// Read the text of a page.
pub struct PageContentTool {
    store: Arc<dyn DocumentStore>,
}

impl PageContentTool {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for PageContentTool {
    fn name(&self) -> &str {
        "get_notion_page_content"
    }

    fn description(&self) -> &str {
        "Get the text content of a Notion page by id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "page_id": {
                    "type": "string",
                    "description": "Page id returned by search_notion_pages"
                }
            },
            "required": ["page_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let page_id = require_str(&params, "page_id")?;
        let content = self.store.page_content(page_id).await?;
        Ok(ToolOutput::text(content, start.elapsed()))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Documents
    }
}

/// Create a page under the configured parent.
pub struct UploadPageTool {
    store: Arc<dyn DocumentStore>,
}

impl UploadPageTool {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UploadPageTool {
    fn name(&self) -> &str {
        "upload_to_notion"
    }

    fn description(&self) -> &str {
        "Create a new Notion page with a title and text content. Returns the page URL."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Page title"
                },
                "content": {
                    "type": "string",
                    "description": "Page text"
                }
            },
            "required": ["title", "content"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let title = require_str(&params, "title")?;
        let content = require_str(&params, "content")?;
        let url = self.store.create_page(title, content).await?;
        Ok(ToolOutput::success(
            json!({ "message": "Page created", "url": url }),
            start.elapsed(),
        ))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Documents
    }
}
