//! Personas: the profile type, the catalog loaded at startup, rule-based
//! selection, and how a persona is folded into prompts.

pub mod catalog;
pub mod selector;

use serde::{Deserialize, Serialize};

pub use catalog::PersonaCatalog;
pub use selector::{PersonaHints, PersonaSelection, select_persona};

/// A persona profile. Every field is optional; empty fields are skipped when rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    #[serde(alias = "display_name")]
    pub name: Option<String>,
    pub category: Option<String>,
    pub role: Option<String>,
    pub expertise: Option<String>,
    pub description: Option<String>,
    pub work_areas: Vec<String>,
    pub mindset: Vec<String>,
    pub skills: Vec<String>,
    pub tags: Vec<String>,
    pub style: Vec<String>,
    pub tone: Option<String>,
    pub writing_style: Option<String>,
    pub personality: Option<String>,
}

impl Persona {
    /// Short label for logs.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed persona")
    }
}

/// Render a persona as prompt context: one `[Section]` header per non-empty group.
pub fn build_persona_context(persona: &Persona) -> String {
    let mut lines: Vec<String> = Vec::new();

    let mut section = |title: &str, items: Vec<String>| {
        if !items.is_empty() {
            lines.push(format!("[{title}]"));
            lines.extend(items);
        }
    };

    let mut profile = Vec::new();
    push_field(&mut profile, "Name", persona.name.as_deref());
    push_field(&mut profile, "Category", persona.category.as_deref());
    push_field(&mut profile, "Role", persona.role.as_deref());
    push_field(&mut profile, "Expertise", persona.expertise.as_deref());
    section("Profile", profile);

    section(
        "Description",
        persona
            .description
            .iter()
            .filter(|d| !d.trim().is_empty())
            .cloned()
            .collect(),
    );

    let mut work = Vec::new();
    push_list(&mut work, "Work areas", &persona.work_areas);
    push_list(&mut work, "Mindset", &persona.mindset);
    section("Work and thinking", work);

    let mut skills = Vec::new();
    push_list(&mut skills, "Skills", &persona.skills);
    push_list(&mut skills, "Tags", &persona.tags);
    section("Skills and tags", skills);

    let mut style = Vec::new();
    push_list(&mut style, "Style", &persona.style);
    push_field(&mut style, "Tone", persona.tone.as_deref());
    push_field(&mut style, "Writing", persona.writing_style.as_deref());
    push_field(&mut style, "Personality", persona.personality.as_deref());
    section("Style", style);

    lines.join("\n")
}

/// Prepend persona guidelines to a base prompt. Returns the base unchanged
/// when there is no persona or it renders to nothing.
pub fn build_personalized_prompt(base_prompt: &str, persona: Option<&Persona>) -> String {
    let Some(persona) = persona else {
        return base_prompt.to_string();
    };
    let context = build_persona_context(persona);
    let context = context.trim();
    if context.is_empty() {
        return base_prompt.to_string();
    }
    format!("[Persona guidelines]\n{context}\n---\n{base_prompt}")
}

fn push_field(out: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        out.push(format!("{label}: {value}"));
    }
}

fn push_list(out: &mut Vec<String>, label: &str, values: &[String]) {
    let values: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if !values.is_empty() {
        out.push(format!("{label}: {}", values.join(", ")));
    }
}
