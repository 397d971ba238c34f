use std::sync::Arc;

use ai_secretary::agents::{
    Agent, AgentManager, BasicAgent, EMAIL_AGENT_TYPE, EmailAgent, GENERAL_AGENT_TYPE,
    USER_AGENT_ID, VOICE_AGENT_TYPE, VoiceAgent,
};
use ai_secretary::assistant::{Dispatcher, DispatcherLimits};
use ai_secretary::config::AppConfig;
use ai_secretary::integrations::{
    DocumentStore, GmailMailbox, Mailbox, NotionClient, OpenAiSpeech, SpeechService,
};
use ai_secretary::llm::create_provider;
use ai_secretary::logging;
use ai_secretary::persona::PersonaCatalog;
use ai_secretary::prompts::PromptLibrary;
use ai_secretary::tools::{BuiltinServices, ToolRegistry, register_builtin_tools};
use ai_secretary::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = Arc::new(AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    }));
    let _log_guard = logging::init(&config.logging)?;

    eprintln!("🤖 {} v{}", config.app_name, config.app_version);
    eprintln!("   Model: {}", config.default_model);
    eprintln!("   API: http://{}/api/chat", config.bind_addr);
    eprintln!("   Events: ws://{}/ws/events", config.bind_addr);

    // ── Integrations ────────────────────────────────────────────────────
    let llm = create_provider(&config.llm_config())?;
    let speech: Arc<dyn SpeechService> = Arc::new(OpenAiSpeech::new(
        config.openai_api_key.clone(),
        config.speech.clone(),
    )?);

    let mailbox: Option<Arc<dyn Mailbox>> = config.gmail.clone().map(|gmail| {
        eprintln!("   Gmail: enabled ({})", gmail.address);
        Arc::new(GmailMailbox::new(gmail)) as Arc<dyn Mailbox>
    });
    if mailbox.is_none() {
        eprintln!("   Gmail: disabled");
    }

    let documents: Option<Arc<dyn DocumentStore>> = match config.notion.clone() {
        Some(notion) => {
            eprintln!("   Notion: enabled");
            Some(Arc::new(NotionClient::new(notion)?))
        }
        None => {
            eprintln!("   Notion: disabled");
            None
        }
    };

    let prompts = PromptLibrary::load(&config.prompts_dir);
    let personas = Arc::new(PersonaCatalog::load(&config.prompts_dir));
    eprintln!(
        "   Personas: {} loaded (selector {})",
        personas.len(),
        if config.persona_selector_enabled { "on" } else { "off" }
    );

    // ── Tools + dispatcher ──────────────────────────────────────────────
    let mut services = BuiltinServices::new(Arc::clone(&llm), Arc::clone(&speech))
        .with_personas(Arc::clone(&personas));
    if let Some(mailbox) = &mailbox {
        services = services.with_mailbox(Arc::clone(mailbox));
    }
    if let Some(documents) = documents {
        services = services.with_documents(documents);
    }
    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools, services);
    eprintln!("   Tools: {} registered", tools.count());

    let dispatcher = Arc::new(
        Dispatcher::new(
            Arc::clone(&llm),
            tools,
            Arc::clone(&speech),
            prompts.clone(),
            DispatcherLimits {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                max_iterations: config.max_tool_iterations,
            },
        )
        .await?,
    );

    // ── Agents ──────────────────────────────────────────────────────────
    let agents = Arc::new(AgentManager::new());
    agents
        .register_agent_type(
            GENERAL_AGENT_TYPE,
            Arc::new(|id: String, name: String| {
                Arc::new(BasicAgent::new(id, name)) as Arc<dyn Agent>
            }),
        )
        .await;

    let voice_speech = Arc::clone(&speech);
    let voice_prompts = prompts.clone();
    agents
        .register_agent_type(
            VOICE_AGENT_TYPE,
            Arc::new(move |id: String, name: String| {
                Arc::new(VoiceAgent::new(
                    id,
                    name,
                    Arc::clone(&voice_speech),
                    voice_prompts.clone(),
                )) as Arc<dyn Agent>
            }),
        )
        .await;

    if let Some(mailbox) = mailbox {
        let email_llm = Arc::clone(&llm);
        let email_prompts = prompts.clone();
        agents
            .register_agent_type(
                EMAIL_AGENT_TYPE,
                Arc::new(move |id: String, name: String| {
                    Arc::new(EmailAgent::new(
                        id,
                        name,
                        Arc::clone(&mailbox),
                        Arc::clone(&email_llm),
                        email_prompts.clone(),
                    )) as Arc<dyn Agent>
                }),
            )
            .await;
    }

    agents
        .create_agent(GENERAL_AGENT_TYPE, Some(USER_AGENT_ID), Some("User"))
        .await?;
    for agent_type in agents.agent_types().await {
        if agent_type != GENERAL_AGENT_TYPE {
            let agent = agents.create_agent(&agent_type, None, None).await?;
            eprintln!("   Agent: {} ({})", agent.id(), agent_type);
        }
    }
    eprintln!();

    // ── Web ─────────────────────────────────────────────────────────────
    let state =
        AppState::new(Arc::clone(&config), dispatcher, agents, speech).with_personas(personas);
    web::serve(&config.bind_addr, state).await?;

    Ok(())
}
