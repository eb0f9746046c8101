use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{PersonaError, Result};
use crate::storage::StateBackend;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("static placeholder pattern"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Placeholder names in first-seen order, without duplicates.
pub fn extract_variables(content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in placeholder().captures_iter(content) {
        let name = caps[1].to_string();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct NewTemplate {
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
}

pub struct TemplateLibrary {
    templates: Vec<PromptTemplate>,
    backend: Arc<dyn StateBackend>,
}

impl TemplateLibrary {
    pub fn load(backend: Arc<dyn StateBackend>, now: DateTime<Utc>) -> Self {
        let templates = match backend.load_templates() {
            Ok(Some(t)) => t,
            Ok(None) => builtin_templates(now),
            Err(err) => {
                warn!(%err, "prompt templates unreadable, using built-ins");
                builtin_templates(now)
            }
        };
        Self { templates, backend }
    }

    fn save(&self) {
        if let Err(err) = self.backend.save_templates(&self.templates) {
            error!(%err, "failed to persist prompt templates");
        }
    }

    pub fn list(&self, category: Option<&str>) -> Vec<&PromptTemplate> {
        self.templates
            .iter()
            .filter(|t| category.map(|c| t.category.eq_ignore_ascii_case(c)).unwrap_or(true))
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<&PromptTemplate> {
        self.templates.iter().find(|t| t.id == id).ok_or_else(|| PersonaError::not_found("template", id))
    }

    pub fn create(&mut self, new: NewTemplate, now: DateTime<Utc>) -> Result<PromptTemplate> {
        if new.name.trim().is_empty() || new.content.trim().is_empty() {
            return Err(PersonaError::invalid("template name and content must not be empty"));
        }
        let id = match new.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => format!("tpl_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
        };
        if self.templates.iter().any(|t| t.id == id) {
            return Err(PersonaError::already_exists("template", id));
        }
        let template = PromptTemplate {
            id,
            variables: extract_variables(&new.content),
            name: new.name,
            description: new.description,
            content: new.content,
            category: new.category,
            tags: new.tags,
            created_at: now,
            updated_at: now,
        };
        self.templates.push(template.clone());
        self.save();
        Ok(template)
    }

    pub fn delete(&mut self, id: &str) -> Result<PromptTemplate> {
        let idx = self.templates.iter().position(|t| t.id == id).ok_or_else(|| PersonaError::not_found("template", id))?;
        let removed = self.templates.remove(idx);
        self.save();
        Ok(removed)
    }

    pub fn search(&self, query: &str) -> Vec<&PromptTemplate> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Vec::new();
        }
        self.templates
            .iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&q)
                    || t.description.to_lowercase().contains(&q)
                    || t.content.to_lowercase().contains(&q)
                    || t.category.to_lowercase().contains(&q)
                    || t.tags.iter().any(|tag| tag.to_lowercase().contains(&q))
            })
            .collect()
    }

    /// Renders a template. Every declared variable must be supplied.
    pub fn apply(&self, id: &str, values: &HashMap<String, String>) -> Result<String> {
        let template = self.get(id)?;
        let missing: Vec<&str> = template.variables.iter().filter(|v| !values.contains_key(*v)).map(String::as_str).collect();
        if !missing.is_empty() {
            return Err(PersonaError::invalid(format!("missing template variables: {}", missing.join(", "))));
        }
        let rendered = placeholder().replace_all(&template.content, |caps: &regex::Captures| values.get(&caps[1]).cloned().unwrap_or_default());
        Ok(rendered.into_owned())
    }
}

fn builtin_templates(now: DateTime<Utc>) -> Vec<PromptTemplate> {
    let make = |id: &str, name: &str, description: &str, content: &str, category: &str, tags: &[&str]| PromptTemplate {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        content: content.to_string(),
        variables: extract_variables(content),
        category: category.to_string(),
        tags: tags.iter().map(|s| s.to_string()).collect(),
        created_at: now,
        updated_at: now,
    };
    vec![
        make(
            "code-review",
            "Code Review",
            "Review a change for bugs, style and risk",
            "Review the following {{language}} code. Point out bugs, unclear naming and missing tests.\n\n{{code}}",
            "development",
            &["code", "review"],
        ),
        make(
            "explain-concept",
            "Explain a Concept",
            "Explain a topic for a given audience",
            "Explain {{topic}} to {{audience}}. Start from first principles and finish with one concrete example.",
            "education",
            &["explain", "teaching"],
        ),
        make(
            "summarize",
            "Summarize",
            "Condense text into key points",
            "Summarize the following text in at most {{max_points}} bullet points:\n\n{{text}}",
            "writing",
            &["summary"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn library() -> TemplateLibrary {
        TemplateLibrary::load(Arc::new(MemoryBackend::new()), Utc::now())
    }

    #[test]
    fn extracts_unique_variables_in_order() {
        assert_eq!(extract_variables("{{a}} {{ b }} {{a}} {{c_1}} {not}"), vec!["a", "b", "c_1"]);
    }

    #[test]
    fn create_get_apply() {
        let mut lib = library();
        let t = lib
            .create(NewTemplate { id: Some("greet".into()), name: "Greeting".into(), content: "Hello {{name}}, welcome to {{ place }}!".into(), ..Default::default() }, Utc::now())
            .unwrap();
        assert_eq!(t.variables, vec!["name", "place"]);
        let values = HashMap::from([("name".to_string(), "Ada".to_string()), ("place".to_string(), "Rust".to_string())]);
        assert_eq!(lib.apply("greet", &values).unwrap(), "Hello Ada, welcome to Rust!");
    }

    #[test]
    fn apply_reports_every_missing_variable() {
        let lib = library();
        let err = lib.apply("explain-concept", &HashMap::new()).unwrap_err();
        assert_eq!(err, PersonaError::invalid("missing template variables: topic, audience"));
    }

    #[test]
    fn duplicate_and_missing_ids() {
        let mut lib = library();
        let dup = NewTemplate { id: Some("summarize".into()), name: "x".into(), content: "y".into(), ..Default::default() };
        assert!(matches!(lib.create(dup, Utc::now()), Err(PersonaError::AlreadyExists { .. })));
        assert!(lib.delete("nope").unwrap_err().is_not_found());
        assert!(lib.get("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn search_and_category_filter() {
        let lib = library();
        let hits: Vec<_> = lib.search("REVIEW").iter().map(|t| t.id.clone()).collect();
        assert_eq!(hits, vec!["code-review"]);
        assert_eq!(lib.list(Some("education")).len(), 1);
        assert!(lib.search("  ").is_empty());
    }

    #[test]
    fn generated_ids_and_persistence() {
        let backend = Arc::new(MemoryBackend::new());
        let mut lib = TemplateLibrary::load(backend.clone(), Utc::now());
        let t = lib.create(NewTemplate { name: "N".into(), content: "C".into(), ..Default::default() }, Utc::now()).unwrap();
        assert!(t.id.starts_with("tpl_"));
        let reloaded = TemplateLibrary::load(backend, Utc::now());
        assert!(reloaded.get(&t.id).is_ok());
    }
}
