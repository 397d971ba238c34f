//! Named personas loaded from `<prompts_dir>/personas.yaml`.

use std::path::Path;

use serde::Deserialize;

use super::Persona;

const PERSONA_FILE: &str = "personas.yaml";

#[derive(Debug, Default, Deserialize)]
struct PersonaFile {
    #[serde(default)]
    personas: Vec<Persona>,
}

/// Personas available for selection and for the planning tools.
///
/// Only personas with a non-blank name are kept; the first of any
/// duplicate names wins.
#[derive(Debug, Clone, Default)]
pub struct PersonaCatalog {
    personas: Vec<Persona>,
}

impl PersonaCatalog {
    pub fn new(personas: Vec<Persona>) -> Self {
        let mut kept: Vec<Persona> = Vec::with_capacity(personas.len());
        for persona in personas {
            let Some(name) = persona.name.as_deref().map(str::trim) else {
                continue;
            };
            if name.is_empty() || kept.iter().any(|p| p.name.as_deref() == Some(name)) {
                continue;
            }
            kept.push(Persona {
                name: Some(name.to_string()),
                ..persona
            });
        }
        Self { personas: kept }
    }

    /// Load the catalog, falling back to an empty one when the file is missing or broken.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(PERSONA_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No persona file, catalog is empty");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read persona file");
                return Self::default();
            }
        };

        match serde_yaml::from_str::<PersonaFile>(&content) {
            Ok(file) => {
                let catalog = Self::new(file.personas);
                tracing::info!(path = %path.display(), count = catalog.len(), "Loaded persona catalog");
                catalog
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid persona file, catalog is empty");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.personas.iter().map(Persona::label).collect()
    }

    /// Exact name lookup.
    pub fn get(&self, name: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.name.as_deref() == Some(name))
    }

    /// Lookup that tolerates case, spacing, and a unique partial name.
    pub fn resolve(&self, name: &str) -> Option<&Persona> {
        if let Some(persona) = self.get(name.trim()) {
            return Some(persona);
        }
        let wanted = squash(name);
        if wanted.is_empty() {
            return None;
        }
        if let Some(persona) = self.personas.iter().find(|p| squash(p.label()) == wanted) {
            return Some(persona);
        }

        let mut partial = self.personas.iter().filter(|p| {
            let candidate = squash(p.label());
            candidate.contains(&wanted) || wanted.contains(&candidate)
        });
        match (partial.next(), partial.next()) {
            (Some(persona), None) => Some(persona),
            _ => None,
        }
    }
}

fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Persona {
        Persona {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    fn catalog() -> PersonaCatalog {
        PersonaCatalog::new(vec![
            named("Planner Kim"),
            named("Marketer Lee"),
            named("Developer Park"),
        ])
    }

    #[test]
    fn unnamed_and_duplicate_personas_are_dropped() {
        let catalog = PersonaCatalog::new(vec![
            named(" Planner Kim "),
            Persona::default(),
            named("   "),
            Persona {
                role: Some("copy".into()),
                ..named("Planner Kim")
            },
        ]);
        assert_eq!(catalog.names(), vec!["Planner Kim"]);
        assert!(catalog.get("Planner Kim").unwrap().role.is_none());
    }

    #[test]
    fn resolve_tolerates_case_spacing_and_partial_names() {
        let catalog = catalog();
        assert_eq!(catalog.resolve("Planner Kim").unwrap().label(), "Planner Kim");
        assert_eq!(catalog.resolve("plannerkim").unwrap().label(), "Planner Kim");
        assert_eq!(catalog.resolve("marketer").unwrap().label(), "Marketer Lee");
        assert!(catalog.resolve("Designer Choi").is_none());
        assert!(catalog.resolve("  ").is_none());
    }

    #[test]
    fn ambiguous_partial_name_does_not_resolve() {
        let catalog = PersonaCatalog::new(vec![named("Planner Kim"), named("Planner Lee")]);
        assert!(catalog.resolve("planner").is_none());
    }

    #[test]
    fn load_reads_yaml_and_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PersonaCatalog::load(dir.path()).is_empty());

        std::fs::write(
            dir.path().join(PERSONA_FILE),
            "personas:\n  - name: Planner Kim\n    category: planning\n    skills: [roadmaps]\n",
        )
        .unwrap();
        let catalog = PersonaCatalog::load(dir.path());
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("Planner Kim").unwrap().skills, vec!["roadmaps"]);

        std::fs::write(dir.path().join(PERSONA_FILE), "personas: [").unwrap();
        assert!(PersonaCatalog::load(dir.path()).is_empty());
    }
}
