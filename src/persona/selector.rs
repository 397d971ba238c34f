//! Rule-based persona selection for requests that do not name one.
//!
//! Candidates are narrowed by category, then role, then expertise; a filter
//! that would leave nobody is skipped. The survivors are ranked by how well
//! their skills, tags and style match the hints and the message.

use serde::{Deserialize, Serialize};

use super::{Persona, PersonaCatalog};

/// Optional metadata a client can attach to steer selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaHints {
    pub category: Option<String>,
    pub role: Option<String>,
    pub expertise: Option<String>,
    pub skills: Vec<String>,
    pub style: Option<String>,
}

/// The chosen persona and its ranking score.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaSelection {
    pub persona: Persona,
    pub score: u32,
}

const SKILL_WEIGHT: u32 = 3;
const STYLE_WEIGHT: u32 = 2;
const KEYWORD_WEIGHT: u32 = 1;

/// Pick the best persona for `message`, or `None` when nothing fits.
///
/// A persona is only chosen when some hint filter applied or its score is
/// above zero, so small talk keeps the default assistant voice.
pub fn select_persona(
    catalog: &PersonaCatalog,
    hints: &PersonaHints,
    message: &str,
) -> Option<PersonaSelection> {
    let (candidates, narrowed) = hierarchical_candidates(catalog, hints);
    let message = message.to_lowercase();

    let mut best: Option<(&Persona, u32, (usize, bool))> = None;
    for persona in candidates {
        let score = rank(persona, hints, &message);
        let tie_break = (skill_overlap(persona, &hints.skills), style_in_description(persona, hints));
        let better = match &best {
            None => true,
            Some((_, best_score, best_tie)) => {
                score > *best_score || (score == *best_score && tie_break > *best_tie)
            }
        };
        if better {
            best = Some((persona, score, tie_break));
        }
    }

    let (persona, score, _) = best?;
    if score == 0 && !narrowed {
        return None;
    }
    tracing::info!(persona = persona.label(), score, "Persona selected");
    Some(PersonaSelection {
        persona: persona.clone(),
        score,
    })
}

/// Category (exact), then role (either contains the other), then expertise (contains).
fn hierarchical_candidates<'a>(
    catalog: &'a PersonaCatalog,
    hints: &PersonaHints,
) -> (Vec<&'a Persona>, bool) {
    let mut names: Vec<&Persona> = catalog.iter().collect();
    let mut narrowed = false;

    let mut narrow = |stage: &str, value: Option<&str>, keep: &dyn Fn(&Persona, &str) -> bool| {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return;
        };
        let value = value.to_lowercase();
        let kept: Vec<&Persona> = names.iter().copied().filter(|p| keep(p, &value)).collect();
        if kept.is_empty() {
            tracing::debug!(stage, value = %value, "Persona filter matched nobody, skipped");
        } else {
            tracing::debug!(stage, value = %value, kept = kept.len(), "Persona filter applied");
            names = kept;
            narrowed = true;
        }
    };

    narrow("category", hints.category.as_deref(), &|p, v| {
        lower(p.category.as_deref()) == v
    });
    narrow("role", hints.role.as_deref(), &|p, v| {
        let role = lower(p.role.as_deref());
        !role.is_empty() && (role.contains(v) || v.contains(role.as_str()))
    });
    narrow("expertise", hints.expertise.as_deref(), &|p, v| {
        lower(p.expertise.as_deref()).contains(v)
    });

    (names, narrowed)
}

fn rank(persona: &Persona, hints: &PersonaHints, message: &str) -> u32 {
    let skills = skill_overlap(persona, &hints.skills) as u32 * SKILL_WEIGHT;

    let style = match hints.style.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(wanted) => {
            let wanted = wanted.to_lowercase();
            let matches = persona.style.iter().any(|s| s.to_lowercase() == wanted)
                || lower(persona.tone.as_deref()) == wanted;
            if matches { STYLE_WEIGHT } else { 0 }
        }
        None => 0,
    };

    let keywords = persona
        .skills
        .iter()
        .chain(&persona.tags)
        .chain(&persona.work_areas)
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty() && message.contains(term.as_str()))
        .count() as u32
        * KEYWORD_WEIGHT;

    skills + style + keywords
}

fn skill_overlap(persona: &Persona, wanted: &[String]) -> usize {
    wanted
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .filter(|w| persona.skills.iter().any(|s| s.to_lowercase() == *w))
        .count()
}

fn style_in_description(persona: &Persona, hints: &PersonaHints) -> bool {
    match (hints.style.as_deref(), persona.description.as_deref()) {
        (Some(style), Some(description)) if !style.trim().is_empty() => {
            description.to_lowercase().contains(&style.trim().to_lowercase())
        }
        _ => false,
    }
}

fn lower(value: Option<&str>) -> String {
    value.map(|v| v.trim().to_lowercase()).unwrap_or_default()
}
