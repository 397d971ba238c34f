//! Planning tools: documents drafted by personas with the chat model and
//! stored in Notion.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::context::ToolContext;
use crate::integrations::DocumentStore;
use crate::integrations::documents::PageSummary;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::persona::{Persona, PersonaCatalog, build_persona_context};
use crate::tools::tool::{Tool, ToolDomain, ToolError, ToolOutput, require_str};

/// A document layout: its key and the sections a draft must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentTemplate {
    pub name: &'static str,
    pub sections: &'static [&'static str],
}

pub const DOCUMENT_TEMPLATES: &[DocumentTemplate] = &[
    DocumentTemplate {
        name: "report",
        sections: &["title", "summary", "methodology", "findings", "recommendations", "conclusion", "references"],
    },
    DocumentTemplate {
        name: "article",
        sections: &["title", "author", "abstract", "introduction", "body", "conclusion", "references"],
    },
    DocumentTemplate {
        name: "memo",
        sections: &["title", "date", "to", "from", "message"],
    },
    DocumentTemplate {
        name: "research",
        sections: &["title", "background", "objectives", "methods", "results", "discussion", "conclusion", "references"],
    },
    DocumentTemplate {
        name: "proposal",
        sections: &["title", "executive_summary", "problem_statement", "proposed_solution", "timeline", "budget", "expected_outcomes", "conclusion"],
    },
    DocumentTemplate {
        name: "tech_doc",
        sections: &["title", "overview", "architecture", "components", "api", "usage_examples", "troubleshooting", "references"],
    },
];

const DRAFT_MAX_TOKENS: u32 = 1800;
const FEEDBACK_MAX_TOKENS: u32 = 1000;
const FINAL_MAX_TOKENS: u32 = 2000;
const DOC_SUMMARY_MAX_TOKENS: u32 = 500;
const EXPANSION_MAX_TOKENS: u32 = 3000;

const QUALITY_NOTE: &str = "Cover reliability, evidence, examples, limitations and references \
where they fit, and close with any open uncertainties.";
const LANGUAGE_NOTE: &str = "Write everything in Korean.";

pub fn find_template(name: &str) -> Result<&'static DocumentTemplate, ToolError> {
    DOCUMENT_TEMPLATES
        .iter()
        .find(|t| t.name == name.trim())
        .ok_or_else(|| {
            ToolError::InvalidParameters(format!(
                "unknown template '{name}'. Available: {}",
                template_names().join(", ")
            ))
        })
}

fn template_names() -> Vec<&'static str> {
    DOCUMENT_TEMPLATES.iter().map(|t| t.name).collect()
}

fn resolve_persona<'a>(
    catalog: &'a PersonaCatalog,
    field: &str,
    name: &str,
) -> Result<&'a Persona, ToolError> {
    let persona = catalog.resolve(name).ok_or_else(|| {
        ToolError::InvalidParameters(format!(
            "unknown persona '{name}' for {field}. Available: {}",
            catalog.names().join(", ")
        ))
    })?;
    if persona.label() != name {
        tracing::info!(field, requested = name, resolved = persona.label(), "Persona name corrected");
    }
    Ok(persona)
}

fn persona_intro(persona: &Persona) -> String {
    format!(
        "You are writing as the persona '{}'.\n{}",
        persona.label(),
        build_persona_context(persona)
    )
}

fn section_guide(sections: &[&str]) -> String {
    sections
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First `max` characters, with `...` appended when cut.
fn clip(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

pub fn notion_page_url(page_id: &str) -> String {
    format!("https://www.notion.so/{}", page_id.replace('-', ""))
}

/// Run one system-prompt completion and return its text.
async fn generate(
    llm: &dyn LlmProvider,
    prompt: String,
    max_tokens: u32,
) -> Result<String, ToolError> {
    let request =
        CompletionRequest::new(vec![ChatMessage::system(prompt)]).with_max_tokens(max_tokens);
    Ok(llm.complete(request).await?.content.trim().to_string())
}

/// First page matching `keyword` with its body, or `None` when nothing matches.
async fn reference_page(
    store: &dyn DocumentStore,
    keyword: &str,
) -> Result<Option<(PageSummary, String)>, ToolError> {
    let Some(page) = store.search_pages(keyword).await?.into_iter().next() else {
        return Ok(None);
    };
    let content = store.page_content(&page.id).await?;
    if content.trim().is_empty() {
        return Err(ToolError::ExecutionFailed(format!(
            "could not read the content of '{}'; check the integration's page permissions",
            page.title
        )));
    }
    Ok(Some((page, content)))
}

fn persona_names_schema(catalog: &PersonaCatalog, description: &str) -> serde_json::Value {
    let names = catalog.names();
    if names.is_empty() {
        json!({ "type": "string", "description": description })
    } else {
        json!({
            "type": "string",
            "description": format!("{description}. One of: {}", names.join(", ")),
            "enum": names,
        })
    }
}

fn template_schema(description: &str) -> serde_json::Value {
    json!({
        "type": "string",
        "description": description,
        "enum": template_names(),
    })
}

/// Summarize the best-matching Notion page.
pub struct SummarizeDocumentTool {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn DocumentStore>,
}

impl SummarizeDocumentTool {
    pub fn new(llm: Arc<dyn LlmProvider>, store: Arc<dyn DocumentStore>) -> Self {
        Self { llm, store }
    }
}

#[async_trait]
impl Tool for SummarizeDocumentTool {
    fn name(&self) -> &str {
        "summarize_notion_document"
    }

    fn description(&self) -> &str {
        "Find the most recently edited Notion page matching a keyword and summarize its key points."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "keyword": {
                    "type": "string",
                    "description": "Keyword identifying the document, e.g. 'sales report'"
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
        let Some((page, content)) = reference_page(self.store.as_ref(), keyword).await? else {
            return Ok(ToolOutput::text(
                format!("No Notion document matches '{keyword}'."),
                start.elapsed(),
            ));
        };

        let prompt = format!(
            "Summarize only the key points of the following document. {QUALITY_NOTE} \
             {LANGUAGE_NOTE}\n\nTitle: {}\nContent:\n{content}",
            page.title
        );
        let summary = generate(self.llm.as_ref(), prompt, DOC_SUMMARY_MAX_TOKENS).await?;
        tracing::info!(page_id = %page.id, title = %page.title, "Document summarized");

        Ok(ToolOutput::success(
            json!({
                "message": format!("Summary of '{}': {summary}", page.title),
                "title": page.title,
                "summary": summary,
                "original_notion_url": notion_page_url(&page.id),
            }),
            start.elapsed(),
        ))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Documents
    }
}

/// Write a new document from an existing page and store it in Notion.
pub struct ExpandDocumentTool {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn DocumentStore>,
    personas: Arc<PersonaCatalog>,
}

impl ExpandDocumentTool {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn DocumentStore>,
        personas: Arc<PersonaCatalog>,
    ) -> Self {
        Self {
            llm,
            store,
            personas,
        }
    }
}

#[async_trait]
impl Tool for ExpandDocumentTool {
    fn name(&self) -> &str {
        "expand_notion_document"
    }

    fn description(&self) -> &str {
        "Use an existing Notion page as reference to write a new document of the given \
         template, expanding every section, and save it to Notion."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "keyword": {
                    "type": "string",
                    "description": "Keyword identifying the reference document"
                },
                "new_doc_type": template_schema("Template of the new document"),
                "extra_requirements": {
                    "type": "string",
                    "description": "Additional requirements for the new document"
                },
                "writer_persona_name": persona_names_schema(&self.personas, "Persona who writes the document"),
            },
            "required": ["keyword", "new_doc_type", "extra_requirements", "writer_persona_name"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let keyword = require_str(&params, "keyword")?;
        let template = find_template(require_str(&params, "new_doc_type")?)?;
        let extra = require_str(&params, "extra_requirements")?;
        let writer = resolve_persona(
            &self.personas,
            "writer_persona_name",
            require_str(&params, "writer_persona_name")?,
        )?;

        let Some((page, content)) = reference_page(self.store.as_ref(), keyword).await? else {
            return Ok(ToolOutput::text(
                format!("No reference Notion document matches '{keyword}'; nothing was created."),
                start.elapsed(),
            ));
        };

        let prompt = format!(
            "{}\n\nUsing the document '{}' as reference, write a new '{}' document. \
             Expand each of these sections in detail:\n{}\n\n{QUALITY_NOTE} {LANGUAGE_NOTE}\n\n\
             Reference content:\n{content}\n\nAdditional requirements:\n{extra}",
            persona_intro(writer),
            page.title,
            template.name,
            section_guide(template.sections),
        );
        let document = generate(self.llm.as_ref(), prompt, EXPANSION_MAX_TOKENS).await?;

        let title = format!("{} (참조: {}) - {}", template.name, page.title, clip(extra, 30));
        let url = self.store.create_page(&title, &document).await?;
        tracing::info!(title = %title, writer = writer.label(), "Expanded document stored");

        Ok(ToolOutput::success(
            json!({
                "message": format!("'{title}' was created in Notion: {url}"),
                "title": title,
                "notion_url": url,
            }),
            start.elapsed(),
        ))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Documents
    }
}

/// Draft, review and finalize a planning document, then store it in Notion.
pub struct CreatePlanningDocumentTool {
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn DocumentStore>,
    personas: Arc<PersonaCatalog>,
}

impl CreatePlanningDocumentTool {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn DocumentStore>,
        personas: Arc<PersonaCatalog>,
    ) -> Self {
        Self {
            llm,
            store,
            personas,
        }
    }
}

#[async_trait]
impl Tool for CreatePlanningDocumentTool {
    fn name(&self) -> &str {
        "create_new_planning_document"
    }

    fn description(&self) -> &str {
        "Create a new planning document from scratch: a writer persona drafts it from the \
         template, a reviewer persona gives feedback, the writer produces the final version, \
         and it is saved to Notion."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "user_input": {
                    "type": "string",
                    "description": "Topic and concrete requirements of the document"
                },
                "writer_persona_name": persona_names_schema(&self.personas, "Persona who writes the document"),
                "reviewer_persona_name": persona_names_schema(&self.personas, "Persona who reviews the draft"),
                "template_name": template_schema("Template of the document"),
            },
            "required": ["user_input", "writer_persona_name", "reviewer_persona_name", "template_name"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let user_input = require_str(&params, "user_input")?;
        let template = find_template(require_str(&params, "template_name")?)?;
        let writer = resolve_persona(
            &self.personas,
            "writer_persona_name",
            require_str(&params, "writer_persona_name")?,
        )?;
        let reviewer = resolve_persona(
            &self.personas,
            "reviewer_persona_name",
            require_str(&params, "reviewer_persona_name")?,
        )?;
        let llm = self.llm.as_ref();

        let draft = generate(
            llm,
            format!(
                "{}\n\nWrite a '{}' document for the following request:\n{user_input}\n\n\
                 Follow this section structure, keeping each section distinct and in the \
                 persona's voice:\n{}\n\n{QUALITY_NOTE} {LANGUAGE_NOTE}",
                persona_intro(writer),
                template.name,
                section_guide(template.sections),
            ),
            DRAFT_MAX_TOKENS,
        )
        .await?;

        let feedback = generate(
            llm,
            format!(
                "{}\n\nRead the draft below and write feedback on its accuracy, evidence, \
                 examples, limitations and anything else worth considering. {LANGUAGE_NOTE}\n\n\
                 [Draft]\n{draft}",
                persona_intro(reviewer),
            ),
            FEEDBACK_MAX_TOKENS,
        )
        .await?;

        let final_doc = generate(
            llm,
            format!(
                "{}\n\nWrite the final version of the planning document, applying all of the \
                 feedback below. Keep the sections distinct, remove duplication and conflicts, \
                 and fill any gaps. {QUALITY_NOTE} {LANGUAGE_NOTE}\n\n[Draft]\n{draft}\n\n\
                 [Feedback]\n{feedback}",
                persona_intro(writer),
            ),
            FINAL_MAX_TOKENS,
        )
        .await?;

        let title = format!(
            "{} ({} 최종본) - {}",
            template.name,
            writer.label(),
            clip(user_input, 40)
        );
        let url = self.store.create_page(&title, &final_doc).await?;
        tracing::info!(
            title = %title,
            writer = writer.label(),
            reviewer = reviewer.label(),
            "Planning document stored"
        );

        Ok(ToolOutput::success(
            json!({
                "message": format!("'{title}' was created in Notion: {url}"),
                "notion_url": url,
                "draft": draft,
                "feedback": feedback,
                "final_doc": final_doc,
            }),
            start.elapsed(),
        ))
    }

    fn domain(&self) -> ToolDomain {
        ToolDomain::Documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDocuments, ScriptedLlm};

    fn personas() -> Arc<PersonaCatalog> {
        Arc::new(PersonaCatalog::new(vec![
            Persona {
                name: Some("Planner Kim".into()),
                role: Some("Service planner".into()),
                ..Default::default()
            },
            Persona {
                name: Some("Marketer Lee".into()),
                role: Some("Performance marketer".into()),
                ..Default::default()
            },
        ]))
    }

    fn output_json(out: &ToolOutput) -> serde_json::Value {
        serde_json::from_str(&out.to_model_content()).unwrap()
    }

    #[test]
    fn templates_and_titles() {
        assert_eq!(find_template("memo").unwrap().sections, &["title", "date", "to", "from", "message"]);
        let err = find_template("poem").unwrap_err().to_string();
        assert!(err.contains("report, article, memo, research, proposal, tech_doc"));

        assert_eq!(clip("short", 30), "short");
        assert_eq!(clip(&"가".repeat(35), 30), format!("{}...", "가".repeat(30)));
        assert_eq!(
            notion_page_url("1234-abcd-5678"),
            "https://www.notion.so/1234abcd5678"
        );
    }

    #[tokio::test]
    async fn summarize_uses_the_first_matching_page() {
        let llm = Arc::new(ScriptedLlm::default().with_replies(&["핵심 요약"]));
        let tool = SummarizeDocumentTool::new(llm.clone(), Arc::new(FakeDocuments::default()));
        let out = tool
            .execute(json!({"keyword": "회의"}), &ToolContext::new())
            .await
            .unwrap();

        let value = output_json(&out);
        assert_eq!(value["title"], "회의록");
        assert_eq!(value["summary"], "핵심 요약");
        assert_eq!(value["original_notion_url"], "https://www.notion.so/p1");

        let completions = llm.completions.lock().unwrap();
        assert_eq!(completions[0].max_tokens, Some(DOC_SUMMARY_MAX_TOKENS));
        assert!(completions[0].messages[0].content.contains("line one\nline two"));
    }

    #[tokio::test]
    async fn planning_runs_draft_feedback_final_and_uploads() {
        let llm = Arc::new(ScriptedLlm::default().with_replies(&["draft v1", "needs numbers", "final v2"]));
        let docs = Arc::new(FakeDocuments::default());
        let tool = CreatePlanningDocumentTool::new(llm.clone(), docs.clone(), personas());
        let out = tool
            .execute(
                json!({
                    "user_input": "신규 유저 유입 이벤트 기획",
                    "writer_persona_name": "planner kim",
                    "reviewer_persona_name": "Marketer Lee",
                    "template_name": "proposal",
                }),
                &ToolContext::new(),
            )
            .await
            .unwrap();

        let value = output_json(&out);
        assert_eq!(value["notion_url"], "https://www.notion.so/p2");
        assert_eq!(value["final_doc"], "final v2");

        let created = docs.created.lock().unwrap();
        assert_eq!(created[0].0, "proposal (Planner Kim 최종본) - 신규 유저 유입 이벤트 기획");
        assert_eq!(created[0].1, "final v2");

        let completions = llm.completions.lock().unwrap();
        let limits: Vec<_> = completions.iter().map(|c| c.max_tokens).collect();
        assert_eq!(limits, vec![Some(DRAFT_MAX_TOKENS), Some(FEEDBACK_MAX_TOKENS), Some(FINAL_MAX_TOKENS)]);
        assert!(completions[0].messages[0].content.contains("- executive_summary"));
        assert!(completions[1].messages[0].content.contains("Marketer Lee"));
        assert!(completions[1].messages[0].content.contains("draft v1"));
        assert!(completions[2].messages[0].content.contains("needs numbers"));
    }

    #[tokio::test]
    async fn unknown_persona_or_template_fails_before_any_completion() {
        let llm = Arc::new(ScriptedLlm::default());
        let tool = CreatePlanningDocumentTool::new(llm.clone(), Arc::new(FakeDocuments::default()), personas());
        for (writer, template) in [("Designer Choi", "report"), ("Planner Kim", "poem")] {
            let err = tool
                .execute(
                    json!({
                        "user_input": "x",
                        "writer_persona_name": writer,
                        "reviewer_persona_name": "Marketer Lee",
                        "template_name": template,
                    }),
                    &ToolContext::new(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidParameters(_)));
        }
        assert!(llm.completions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expand_writes_a_new_page_from_the_reference() {
        let llm = Arc::new(ScriptedLlm::default().with_replies(&["expanded body"]));
        let docs = Arc::new(FakeDocuments::default());
        let tool = ExpandDocumentTool::new(llm.clone(), docs.clone(), personas());
        let out = tool
            .execute(
                json!({
                    "keyword": "회의",
                    "new_doc_type": "tech_doc",
                    "extra_requirements": "API 설계 중심으로 정리",
                    "writer_persona_name": "Planner Kim",
                }),
                &ToolContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(output_json(&out)["notion_url"], "https://www.notion.so/p2");
        let created = docs.created.lock().unwrap();
        assert_eq!(created[0].0, "tech_doc (참조: 회의록) - API 설계 중심으로 정리");
        assert_eq!(created[0].1, "expanded body");

        let completions = llm.completions.lock().unwrap();
        assert_eq!(completions[0].max_tokens, Some(EXPANSION_MAX_TOKENS));
        assert!(completions[0].messages[0].content.contains("- troubleshooting"));
    }

    #[test]
    fn schemas_list_personas_and_templates() {
        let tool = CreatePlanningDocumentTool::new(
            Arc::new(ScriptedLlm::default()),
            Arc::new(FakeDocuments::default()),
            personas(),
        );
        let schema = tool.parameters_schema();
        assert_eq!(
            schema["properties"]["writer_persona_name"]["enum"],
            json!(["Planner Kim", "Marketer Lee"])
        );
        assert_eq!(schema["properties"]["template_name"]["enum"][0], "report");
    }
}
