//! Built-in tools for voice replies, text summaries, Gmail, Notion and planning.

pub mod document;
pub mod email;
pub mod planning;
pub mod voice;
pub mod writing;

use std::sync::Arc;

use crate::integrations::{DocumentStore, Mailbox, SpeechService};
use crate::llm::LlmProvider;
use crate::persona::PersonaCatalog;
use crate::tools::ToolRegistry;

pub use voice::SPEAK_TEXT;

/// Services the built-in tools run on. Integrations left as `None` are not configured.
#[derive(Clone)]
pub struct BuiltinServices {
    pub llm: Arc<dyn LlmProvider>,
    pub speech: Arc<dyn SpeechService>,
    pub mailbox: Option<Arc<dyn Mailbox>>,
    pub documents: Option<Arc<dyn DocumentStore>>,
    pub personas: Arc<PersonaCatalog>,
}

impl BuiltinServices {
    pub fn new(llm: Arc<dyn LlmProvider>, speech: Arc<dyn SpeechService>) -> Self {
        Self {
            llm,
            speech,
            mailbox: None,
            documents: None,
            personas: Arc::new(PersonaCatalog::default()),
        }
    }

    pub fn with_mailbox(mut self, mailbox: Arc<dyn Mailbox>) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_personas(mut self, personas: Arc<PersonaCatalog>) -> Self {
        self.personas = personas;
        self
    }
}

/// Register the voice and summary tools plus whichever integrations are configured.
pub fn register_builtin_tools(registry: &ToolRegistry, services: BuiltinServices) {
    let BuiltinServices {
        llm,
        speech,
        mailbox,
        documents,
        personas,
    } = services;

    registry.register_sync(Arc::new(voice::SpeakTextTool::new(speech)));
    registry.register_sync(Arc::new(writing::SummarizeTextTool::new(Arc::clone(&llm))));

    if let Some(mailbox) = mailbox {
        registry.register_sync(Arc::new(email::SearchEmailsTool::new(Arc::clone(&mailbox))));
        registry.register_sync(Arc::new(email::GetEmailDetailsTool::new(Arc::clone(&mailbox))));
        registry.register_sync(Arc::new(email::SendReplyTool::new(Arc::clone(&mailbox))));
        registry.register_sync(Arc::new(email::SaveAttachmentsTool::new(Arc::clone(&mailbox))));
        registry.register_sync(Arc::new(email::DailyEmailSummaryTool::new(Arc::clone(&mailbox))));
        registry.register_sync(Arc::new(email::EmailSummaryOnTool::new(Arc::clone(&mailbox))));
        registry.register_sync(Arc::new(email::SendEmailTool::new(mailbox)));
    } else {
        tracing::info!("Gmail not configured, email tools disabled");
    }

    if let Some(documents) = documents {
        registry.register_sync(Arc::new(document::SearchPagesTool::new(Arc::clone(&documents))));
        registry.register_sync(Arc::new(document::PageContentTool::new(Arc::clone(&documents))));
        registry.register_sync(Arc::new(document::UploadPageTool::new(Arc::clone(&documents))));
        registry.register_sync(Arc::new(planning::SummarizeDocumentTool::new(
            Arc::clone(&llm),
            Arc::clone(&documents),
        )));
        if personas.is_empty() {
            tracing::info!("No personas loaded, persona planning tools disabled");
        } else {
            registry.register_sync(Arc::new(planning::ExpandDocumentTool::new(
                Arc::clone(&llm),
                Arc::clone(&documents),
                Arc::clone(&personas),
            )));
            registry.register_sync(Arc::new(planning::CreatePlanningDocumentTool::new(
                llm, documents, personas,
            )));
        }
    } else {
        tracing::info!("Notion not configured, document tools disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Persona;
    use crate::testing::{FakeDocuments, FakeMailbox, FakeSpeech, ScriptedLlm};

    fn services() -> BuiltinServices {
        BuiltinServices::new(Arc::new(ScriptedLlm::default()), Arc::new(FakeSpeech::default()))
    }

    #[tokio::test]
    async fn voice_and_summary_when_nothing_configured() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry, services());
        assert_eq!(registry.list().await, vec!["speak_text", "summarize_text"]);
        assert!(registry.validate().await.is_ok());
    }

    #[tokio::test]
    async fn persona_tools_need_a_catalog() {
        let registry = ToolRegistry::new();
        register_builtin_tools(
            &registry,
            services().with_documents(Arc::new(FakeDocuments::default())),
        );
        let names = registry.list().await;
        assert!(names.contains(&"summarize_notion_document".to_string()));
        assert!(!names.contains(&"create_new_planning_document".to_string()));
    }

    #[tokio::test]
    async fn all_builtin_schemas_validate() {
        let registry = ToolRegistry::new();
        let personas = PersonaCatalog::new(vec![Persona {
            name: Some("Planner Kim".into()),
            ..Default::default()
        }]);
        register_builtin_tools(
            &registry,
            services()
                .with_mailbox(Arc::new(FakeMailbox::with_sample()))
                .with_documents(Arc::new(FakeDocuments::default()))
                .with_personas(Arc::new(personas)),
        );
        assert_eq!(registry.count(), 15);
        registry.validate().await.unwrap();
        assert_eq!(
            registry.list().await,
            vec![
                "create_new_planning_document",
                "expand_notion_document",
                "get_daily_email_summary",
                "get_email_details",
                "get_email_summary_on",
                "get_notion_page_content",
                "save_attachments",
                "search_emails",
                "search_notion_pages",
                "send_email",
                "send_reply",
                "speak_text",
                "summarize_notion_document",
                "summarize_text",
                "upload_to_notion",
            ]
        );
    }
}
