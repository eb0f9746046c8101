use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::blend::{BlendManager, BlendMode};
use crate::clock::Clock;
use crate::error::{guard, PersonaError, Result};
use crate::generator;
use crate::modification;
use crate::persona::Persona;
use crate::scoring;
use crate::stats::UsageStatsTracker;
use crate::storage::StateBackend;
use crate::store::{PersonaStore, RepairEvent};
use crate::templates::{NewTemplate, TemplateLibrary};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
const USAGE_BOOST: f64 = 1.2;
const CONTENT_DAMPING: f64 = 0.8;
const COMBINED_BOOST: f64 = 0.3;
const MAX_SMART_RECOMMENDATIONS: usize = 5;

#[derive(Debug, Deserialize)]
pub struct PersonaIdArgs {
    pub persona_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SwitchArgs {
    pub persona_id: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePersonaArgs {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub communication_style: String,
    #[serde(default)]
    pub expertise: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateArgs {
    pub description: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateArgs {
    pub persona_id: String,
    /// Anything other than a string is treated as "no instruction".
    #[serde(default)]
    pub modifications: JsonValue,
}

#[derive(Debug, Deserialize)]
pub struct SuggestArgs {
    pub task_description: String,
}

#[derive(Debug, Deserialize)]
pub struct AutoSwitchArgs {
    pub context: String,
    #[serde(default)]
    pub user_preference: Option<String>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct BlendArgs {
    pub persona_ids: Vec<String>,
    pub task: String,
    #[serde(default)]
    pub blend_mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OptionalPersonaArgs {
    #[serde(default)]
    pub persona_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContextArgs {
    pub context: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveAiPersonaArgs {
    pub persona_json: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTemplatesArgs {
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateIdArgs {
    pub template_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateArgs {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchTemplatesArgs {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplyTemplateArgs {
    pub template_id: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartRecommendation {
    pub persona_id: String,
    pub persona_name: String,
    pub confidence: f64,
    pub reasoning: String,
    pub source: &'static str,
}

pub struct PersonaService {
    store: PersonaStore,
    blends: BlendManager,
    stats: UsageStatsTracker,
    templates: TemplateLibrary,
    clock: Arc<dyn Clock>,
    startup_repairs: Vec<RepairEvent>,
}

fn summary(p: &Persona, active: Option<&str>, default: &str, blend: bool) -> JsonValue {
    json!({
        "id": p.id,
        "name": p.name,
        "description": p.description,
        "isActive": active == Some(p.id.as_str()),
        "isDefault": default == p.id,
        "isBlend": blend,
    })
}

impl PersonaService {
    pub fn new(backend: Arc<dyn StateBackend>, clock: Arc<dyn Clock>, configured_default: &str) -> Self {
        let (store, startup_repairs) = PersonaStore::load(backend.clone(), configured_default);
        for event in &startup_repairs {
            info!(?event, "persona state repaired on load");
        }
        let stats = UsageStatsTracker::load(backend.clone());
        let templates = TemplateLibrary::load(backend, clock.now());
        Self { store, blends: BlendManager::new(), stats, templates, clock, startup_repairs }
    }

    pub fn store(&self) -> &PersonaStore {
        &self.store
    }

    pub fn startup_repairs(&self) -> &[RepairEvent] {
        &self.startup_repairs
    }

    pub fn active_blend_count(&self) -> usize {
        self.blends.active_count()
    }

    fn record_switch(&mut self, previous: Option<&Persona>, to: &str, context: Option<&str>) {
        let now = self.clock.now();
        if let Some(prev) = previous {
            self.stats.record_switch_away(&prev.id, true, now);
        }
        self.stats.record_switch_to(to, context, now);
    }

    fn resolved_active(&mut self, operation: &str) -> Result<Persona> {
        self.store.active().cloned().ok_or_else(|| {
            let pointer = self.store.active_id_raw().unwrap_or("<unset>").to_string();
            PersonaError::internal(operation, format!("active persona '{}' does not resolve", pointer))
        })
    }

    pub fn list_personas(&mut self) -> Result<JsonValue> {
        guard("list_personas", || {
            self.store.heal_active();
            let active = self.store.active_id_raw().map(str::to_string);
            let default = self.store.default_id().to_string();
            let personas: Vec<JsonValue> = self
                .store
                .all()
                .iter()
                .map(|p| summary(p, active.as_deref(), &default, self.store.is_transient(&p.id)))
                .collect();
            Ok(json!({ "personas": personas, "activePersonaId": active, "defaultPersonaId": default }))
        })
    }

    pub fn get_active_persona(&mut self) -> Result<Persona> {
        guard("get_active_persona", || self.resolved_active("get_active_persona"))
    }

    pub fn switch_persona(&mut self, args: SwitchArgs) -> Result<JsonValue> {
        guard("switch_persona", || {
            let previous = self.store.switch_active(&args.persona_id)?;
            self.record_switch(previous.as_ref(), &args.persona_id, args.context.as_deref());
            let current = self.store.require(&args.persona_id)?;
            info!(from = ?previous.as_ref().map(|p| &p.id), to = %current.id, "switched persona");
            Ok(json!({
                "previousPersonaId": previous.as_ref().map(|p| p.id.clone()),
                "activePersonaId": current.id,
                "message": format!("Switched to {}", current.name),
            }))
        })
    }

    pub fn get_persona_details(&self, args: PersonaIdArgs) -> Result<Persona> {
        guard("get_persona_details", || self.store.require(&args.persona_id).cloned())
    }

    pub fn create_custom_persona(&mut self, args: CreatePersonaArgs) -> Result<Persona> {
        guard("create_custom_persona", || {
            if args.id.trim().is_empty() || args.name.trim().is_empty() {
                return Err(PersonaError::invalid("id and name must not be empty"));
            }
            let persona = Persona {
                id: args.id,
                name: args.name,
                description: args.description,
                system_prompt: args.system_prompt,
                traits: args.traits,
                communication_style: args.communication_style,
                expertise: args.expertise,
            };
            self.store.create(persona.clone())?;
            Ok(persona)
        })
    }

    pub fn delete_persona(&mut self, args: PersonaIdArgs) -> Result<JsonValue> {
        guard("delete_persona", || {
            let removed = self.store.delete(&args.persona_id)?;
            if self.blends.discard(&removed.id) {
                info!(id = %removed.id, "live blend dropped with its persona");
            }
            Ok(json!({
                "deleted": removed.id,
                "activePersonaId": self.store.active_id_raw(),
                "defaultPersonaId": self.store.default_id(),
            }))
        })
    }

    /// System prompt of the active persona, as plain text.
    pub fn get_persona_prompt(&mut self) -> Result<String> {
        guard("get_persona_prompt", || Ok(self.resolved_active("get_persona_prompt")?.system_prompt))
    }

    pub fn generate_persona(&mut self, args: GenerateArgs) -> Result<Persona> {
        guard("generate_persona", || {
            let explicit = args.id.as_deref().map(str::trim).filter(|s| !s.is_empty());
            let mut persona = generator::generate(&args.description, explicit)?;
            if explicit.is_none() {
                let base = persona.id.clone();
                let mut n = 2;
                while self.store.contains(&persona.id) {
                    persona.id = format!("{}-{}", base, n);
                    n += 1;
                }
            }
            self.store.create(persona.clone())?;
            Ok(persona)
        })
    }

    pub fn update_persona(&mut self, args: UpdateArgs) -> Result<JsonValue> {
        guard("update_persona", || {
            let current = self.store.require(&args.persona_id)?;
            let outcome = modification::apply(current, args.modifications.as_str());
            if outcome.changed() {
                self.store.replace(&args.persona_id, outcome.persona.clone())?;
                info!(id = %args.persona_id, changes = ?outcome.applied, "persona modified");
            }
            Ok(json!({ "persona": outcome.persona, "changes": outcome.applied, "changed": outcome.changed() }))
        })
    }

    pub fn set_default_persona(&mut self, args: PersonaIdArgs) -> Result<JsonValue> {
        guard("set_default_persona", || {
            self.store.set_default(&args.persona_id)?;
            Ok(json!({ "defaultPersonaId": self.store.default_id() }))
        })
    }

    pub fn suggest_persona(&self, args: SuggestArgs) -> Result<JsonValue> {
        guard("suggest_persona", || {
            let suggestions = scoring::rank(self.store.all(), &args.task_description);
            Ok(json!({ "suggestions": suggestions }))
        })
    }

    pub fn auto_switch_persona(&mut self, args: AutoSwitchArgs) -> Result<JsonValue> {
        guard("auto_switch_persona", || {
            let threshold = args.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
            if !(0.0..=1.0).contains(&threshold) {
                return Err(PersonaError::invalid("confidence_threshold must be between 0 and 1"));
            }
            let active = self.store.active().map(|p| p.id.clone());

            let preferred = args.user_preference.as_deref().filter(|id| self.store.contains(id));
            if let Some(pref) = args.user_preference.as_deref() {
                if preferred.is_none() {
                    warn!(preference = %pref, "ignoring unknown preferred persona");
                }
            }
            let (target, confidence, reasoning) = match preferred {
                Some(id) => (id.to_string(), 1.0, "user preference".to_string()),
                None => match scoring::rank(self.store.all(), &args.context).into_iter().next() {
                    Some(top) => (top.persona_id, top.confidence, top.reasoning),
                    None => {
                        return Ok(json!({
                            "switched": false,
                            "activePersonaId": active,
                            "reason": "no persona matched the context",
                        }))
                    }
                },
            };

            if active.as_deref() == Some(target.as_str()) {
                return Ok(json!({ "switched": false, "activePersonaId": target, "confidence": confidence, "reasoning": reasoning, "reason": "already active" }));
            }
            if confidence < threshold {
                return Ok(json!({
                    "switched": false,
                    "activePersonaId": active,
                    "candidatePersonaId": target,
                    "confidence": confidence,
                    "reasoning": reasoning,
                    "reason": format!("confidence {:.2} below threshold {:.2}", confidence, threshold),
                }));
            }
            let previous = self.store.switch_active(&target)?;
            self.record_switch(previous.as_ref(), &target, Some(&args.context));
            info!(to = %target, confidence, "auto-switched persona");
            Ok(json!({
                "switched": true,
                "previousPersonaId": previous.map(|p| p.id),
                "activePersonaId": target,
                "confidence": confidence,
                "reasoning": reasoning,
            }))
        })
    }

    pub fn blend_personas(&mut self, args: BlendArgs) -> Result<JsonValue> {
        guard("blend_personas", || {
            let mode = match args.blend_mode.as_deref() {
                Some(m) => m.parse::<BlendMode>()?,
                None => BlendMode::default(),
            };
            let previous = self.store.active().cloned();
            let now = self.clock.now();
            let (blend, persona) = self.blends.create(&mut self.store, &args.persona_ids, &args.task, mode, now)?;
            self.record_switch(previous.as_ref(), &blend.id, Some(&args.task));
            Ok(json!({ "blend": blend, "persona": persona }))
        })
    }

    pub fn get_persona_stats(&self, args: OptionalPersonaArgs) -> Result<JsonValue> {
        guard("get_persona_stats", || match args.persona_id {
            Some(id) => {
                let stat = self.stats.get(&id).ok_or_else(|| PersonaError::not_found("usage stats", id.clone()))?;
                Ok(serde_json::to_value(stat)?)
            }
            None => Ok(json!({ "stats": self.stats.all() })),
        })
    }

    pub fn reset_stats(&mut self, args: OptionalPersonaArgs) -> Result<JsonValue> {
        guard("reset_stats", || {
            let cleared = self.stats.reset(args.persona_id.as_deref())?;
            Ok(json!({ "cleared": cleared }))
        })
    }

    pub fn get_smart_recommendations(&self, args: ContextArgs) -> Result<Vec<SmartRecommendation>> {
        guard("get_smart_recommendations", || {
            let now = self.clock.now();
            let store = &self.store;
            let usage = self.stats.recommendations(&args.context, now, |id| store.contains(id));
            let content = scoring::rank(store.all(), &args.context);

            let top_usage = usage.first().map(|u| u.score).unwrap_or(1).max(1) as f64;
            let name_of = |id: &str| store.get(id).map(|p| p.name.clone()).unwrap_or_default();
            let mut merged: Vec<SmartRecommendation> = usage
                .iter()
                .map(|u| SmartRecommendation {
                    persona_id: u.persona_id.clone(),
                    persona_name: name_of(&u.persona_id),
                    confidence: (u.score as f64 / top_usage * USAGE_BOOST).min(1.0),
                    reasoning: u.reasoning.clone(),
                    source: "usage",
                })
                .collect();
            for c in content {
                match merged.iter_mut().find(|m| m.persona_id == c.persona_id) {
                    Some(existing) => {
                        existing.confidence = (existing.confidence + c.confidence * COMBINED_BOOST).min(1.0);
                        existing.reasoning = format!("{}; {}", existing.reasoning, c.reasoning);
                        existing.source = "combined";
                    }
                    None => merged.push(SmartRecommendation {
                        persona_id: c.persona_id,
                        persona_name: c.persona_name,
                        confidence: c.confidence * CONTENT_DAMPING,
                        reasoning: c.reasoning,
                        source: "content",
                    }),
                }
            }
            merged.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
            merged.truncate(MAX_SMART_RECOMMENDATIONS);
            Ok(merged)
        })
    }

    pub fn list_expired_personas(&self) -> Result<JsonValue> {
        guard("list_expired_personas", || Ok(json!({ "expired": self.blends.list_expired(self.clock.now()) })))
    }

    pub fn list_active_blends(&self) -> Result<JsonValue> {
        guard("list_active_blends", || Ok(json!({ "blends": self.blends.list_active(self.clock.now()) })))
    }

    pub fn promote_expired_persona(&mut self, args: PersonaIdArgs) -> Result<Persona> {
        guard("promote_expired_persona", || {
            let now = self.clock.now();
            self.blends.promote(&mut self.store, &args.persona_id, now)
        })
    }

    pub fn save_ai_persona(&mut self, args: SaveAiPersonaArgs) -> Result<Persona> {
        guard("save_ai_persona", || {
            let persona = generator::parse_ai_persona(&args.persona_json)?;
            self.store.create(persona.clone())?;
            Ok(persona)
        })
    }

    pub fn list_prompt_templates(&self, args: ListTemplatesArgs) -> Result<JsonValue> {
        guard("list_prompt_templates", || Ok(json!({ "templates": self.templates.list(args.category.as_deref()) })))
    }

    pub fn get_prompt_template(&self, args: TemplateIdArgs) -> Result<JsonValue> {
        guard("get_prompt_template", || Ok(serde_json::to_value(self.templates.get(&args.template_id)?)?))
    }

    pub fn create_prompt_template(&mut self, args: CreateTemplateArgs) -> Result<JsonValue> {
        guard("create_prompt_template", || {
            let new = NewTemplate { id: args.id, name: args.name, description: args.description, content: args.content, category: args.category, tags: args.tags };
            let created = self.templates.create(new, self.clock.now())?;
            Ok(serde_json::to_value(created)?)
        })
    }

    pub fn delete_prompt_template(&mut self, args: TemplateIdArgs) -> Result<JsonValue> {
        guard("delete_prompt_template", || {
            let removed = self.templates.delete(&args.template_id)?;
            Ok(json!({ "deleted": removed.id }))
        })
    }

    pub fn search_prompt_templates(&self, args: SearchTemplatesArgs) -> Result<JsonValue> {
        guard("search_prompt_templates", || Ok(json!({ "templates": self.templates.search(&args.query) })))
    }

    pub fn apply_prompt_template(&self, args: ApplyTemplateArgs) -> Result<String> {
        guard("apply_prompt_template", || self.templates.apply(&args.template_id, &args.variables))
    }

    #[cfg(test)]
    pub(crate) fn blends_mut(&mut self) -> &mut BlendManager {
        &mut self.blends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryBackend, PersonaState};
    use chrono::{Duration, TimeZone, Utc};

    fn service_with(personas: Vec<Persona>, active: &str, default: &str) -> (PersonaService, ManualClock) {
        let backend = MemoryBackend::new();
        backend
            .save_persona_state(&PersonaState {
                personas,
                active_persona_id: Some(active.into()),
                default_persona_id: Some(default.into()),
            })
            .unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap());
        (PersonaService::new(Arc::new(backend), Arc::new(clock.clone()), "default"), clock)
    }

    fn seeded() -> (PersonaService, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap());
        (PersonaService::new(Arc::new(MemoryBackend::new()), Arc::new(clock.clone()), "default"), clock)
    }

    fn p(id: &str, expertise: &[&str]) -> Persona {
        Persona::new(id, id.to_uppercase(), format!("{} helper", id), format!("You are {}.", id)).with_expertise(expertise)
    }

    fn create_args(id: &str) -> CreatePersonaArgs {
        CreatePersonaArgs {
            id: id.into(),
            name: "Reviewer".into(),
            description: "Reviews pull requests".into(),
            system_prompt: "You are a reviewer.".into(),
            traits: Vec::new(),
            communication_style: String::new(),
            expertise: Vec::new(),
        }
    }

    #[test]
    fn create_then_details_round_trips_with_defaults() {
        let (mut svc, _) = seeded();
        let created = svc.create_custom_persona(create_args("reviewer")).unwrap();
        let fetched = svc.get_persona_details(PersonaIdArgs { persona_id: "reviewer".into() }).unwrap();
        assert_eq!(created, fetched);
        assert!(fetched.traits.is_empty() && fetched.expertise.is_empty());
        assert_eq!(fetched.communication_style, "");
    }

    #[test]
    fn scenario_a_delete_default_and_active() {
        let (mut svc, _) = service_with(vec![p("p1", &[]), p("p2", &[])], "p1", "p1");
        let out = svc.delete_persona(PersonaIdArgs { persona_id: "p1".into() }).unwrap();
        assert_eq!(out["defaultPersonaId"], "p2");
        assert_eq!(out["activePersonaId"], "default");
        assert_eq!(svc.store().active_id_raw(), Some("default"));
        // Reading heals the dangling pointer.
        let listed = svc.list_personas().unwrap();
        assert_eq!(listed["activePersonaId"], "p2");
    }

    #[test]
    fn scenario_b_suggest_ranks_python_first() {
        let (svc, _) = service_with(vec![p("chef", &["cooking"]), p("py", &["Python", "debugging"])], "chef", "chef");
        let out = svc.suggest_persona(SuggestArgs { task_description: "debug this Python code".into() }).unwrap();
        assert_eq!(out["suggestions"][0]["personaId"], "py");
        assert_eq!(out["suggestions"][0]["confidence"], 1.0);
    }

    #[test]
    fn scenario_c_blend_expires_on_next_blend() {
        let (mut svc, _) = service_with(vec![p("a", &["A"]), p("b", &["B"])], "a", "a");
        let out = svc.blend_personas(BlendArgs { persona_ids: vec!["a".into(), "b".into()], task: "T".into(), blend_mode: None }).unwrap();
        let first = out["blend"]["id"].as_str().unwrap().to_string();
        let listed = svc.list_personas().unwrap();
        assert_eq!(listed["activePersonaId"], first.as_str());

        let past = svc.clock.now() - Duration::minutes(1);
        svc.blends_mut().backdate(&first, past);
        svc.blend_personas(BlendArgs { persona_ids: vec!["a".into(), "b".into()], task: "U".into(), blend_mode: Some("sequential".into()) }).unwrap();

        let expired = svc.list_expired_personas().unwrap();
        assert_eq!(expired["expired"][0]["id"], first.as_str());
        assert!(expired["expired"][0]["timeUntilPermanentDeletion"].as_i64().unwrap() > 0);
        assert!(!svc.store().contains(&first));
    }

    #[test]
    fn scenario_d_promote_expired_blend() {
        let (mut svc, clock) = service_with(vec![p("a", &["A", "B"]), p("b", &["B", "C"])], "a", "a");
        let out = svc.blend_personas(BlendArgs { persona_ids: vec!["a".into(), "b".into()], task: "T".into(), blend_mode: None }).unwrap();
        let blend_id = out["blend"]["id"].as_str().unwrap().to_string();
        clock.advance(Duration::hours(2));
        svc.blend_personas(BlendArgs { persona_ids: vec!["a".into(), "b".into()], task: "again".into(), blend_mode: None }).unwrap();

        let promoted = svc.promote_expired_persona(PersonaIdArgs { persona_id: blend_id.clone() }).unwrap();
        let mut expertise = promoted.expertise.clone();
        expertise.sort();
        assert_eq!(expertise, vec!["A", "B", "C"]);
        assert_eq!(promoted.traits, vec!["adaptive", "multi-faceted"]);
        let expired = svc.list_expired_personas().unwrap();
        assert!(expired["expired"].as_array().unwrap().iter().all(|b| b["id"] != blend_id.as_str()));
    }

    #[test]
    fn default_set_to_blend_survives_blend_expiry() {
        let (mut svc, clock) = seeded();
        let blend = |svc: &mut PersonaService, task: &str| {
            let out = svc
                .blend_personas(BlendArgs { persona_ids: vec!["default".into(), "educator".into()], task: task.into(), blend_mode: None })
                .unwrap();
            out["blend"]["id"].as_str().unwrap().to_string()
        };
        let first = blend(&mut svc, "T");
        svc.set_default_persona(PersonaIdArgs { persona_id: first.clone() }).unwrap();
        clock.advance(Duration::hours(2));
        blend(&mut svc, "U");
        assert_ne!(svc.store().default_id(), first);
        assert!(svc.store().contains(svc.store().default_id()));

        svc.switch_persona(SwitchArgs { persona_id: "default".into(), context: None }).unwrap();
        svc.delete_persona(PersonaIdArgs { persona_id: "default".into() }).unwrap();
        assert!(svc.get_persona_prompt().is_ok());
        assert!(svc.store().contains(svc.store().active_id_raw().unwrap()));
    }

    #[test]
    fn deleting_a_live_blend_drops_it_from_active_blends() {
        let (mut svc, _) = service_with(vec![p("a", &["A"]), p("b", &["B"])], "a", "a");
        let out = svc.blend_personas(BlendArgs { persona_ids: vec!["a".into(), "b".into()], task: "T".into(), blend_mode: None }).unwrap();
        let id = out["blend"]["id"].as_str().unwrap().to_string();
        assert_eq!(svc.active_blend_count(), 1);
        svc.delete_persona(PersonaIdArgs { persona_id: id }).unwrap();
        assert_eq!(svc.active_blend_count(), 0);
        assert_eq!(svc.list_active_blends().unwrap()["blends"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn scenario_e_error_categories() {
        let (mut svc, _) = seeded();
        assert!(svc.delete_persona(PersonaIdArgs { persona_id: "missing".into() }).unwrap_err().is_not_found());
        svc.create_custom_persona(create_args("dup")).unwrap();
        assert!(matches!(svc.create_custom_persona(create_args("dup")), Err(PersonaError::AlreadyExists { .. })));
        let err = svc.blend_personas(BlendArgs { persona_ids: vec!["default".into()], task: "T".into(), blend_mode: None }).unwrap_err();
        assert!(matches!(err, PersonaError::InvalidRequest(_)));
    }

    #[test]
    fn prompt_of_unresolvable_active_is_internal() {
        let (mut svc, _) = service_with(vec![p("only", &[])], "only", "only");
        svc.delete_persona(PersonaIdArgs { persona_id: "only".into() }).unwrap();
        match svc.get_persona_prompt().unwrap_err() {
            PersonaError::Internal { operation, .. } => assert_eq!(operation, "get_persona_prompt"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn switch_records_usage_for_both_sides() {
        let (mut svc, clock) = seeded();
        svc.switch_persona(SwitchArgs { persona_id: "technical-expert".into(), context: Some("debugging flaky integration tests".into()) }).unwrap();
        clock.advance(Duration::seconds(30));
        svc.switch_persona(SwitchArgs { persona_id: "default".into(), context: None }).unwrap();
        let stats = svc.get_persona_stats(OptionalPersonaArgs { persona_id: Some("technical-expert".into()) }).unwrap();
        assert_eq!(stats["usageCount"], 1);
        assert_eq!(stats["averageSessionDuration"], 30.0);
        assert_eq!(stats["commonTasks"][0], "debugging flaky integration");
        assert!(svc.switch_persona(SwitchArgs { persona_id: "nope".into(), context: None }).unwrap_err().is_not_found());
    }

    #[test]
    fn update_writes_back_through_store() {
        let (mut svc, _) = seeded();
        let out = svc.update_persona(UpdateArgs { persona_id: "default".into(), modifications: json!("make it formal and add python") }).unwrap();
        assert_eq!(out["changed"], true);
        let p = svc.get_persona_details(PersonaIdArgs { persona_id: "default".into() }).unwrap();
        assert_eq!(p.communication_style, modification::FORMAL_STYLE);
        assert!(p.expertise.contains(&"Python".to_string()));

        let out = svc.update_persona(UpdateArgs { persona_id: "default".into(), modifications: json!(42) }).unwrap();
        assert_eq!(out["changed"], false);
    }

    #[test]
    fn auto_switch_respects_preference_and_threshold() {
        let (mut svc, _) = seeded();
        let out = svc.auto_switch_persona(AutoSwitchArgs { context: "debug my code".into(), user_preference: None, confidence_threshold: None }).unwrap();
        assert_eq!(out["switched"], true);
        assert_eq!(out["activePersonaId"], "technical-expert");

        let out = svc.auto_switch_persona(AutoSwitchArgs { context: "debug my code".into(), user_preference: None, confidence_threshold: None }).unwrap();
        assert_eq!(out["switched"], false);
        assert_eq!(out["reason"], "already active");

        let out = svc.auto_switch_persona(AutoSwitchArgs { context: "anything".into(), user_preference: Some("educator".into()), confidence_threshold: Some(0.99) }).unwrap();
        assert_eq!(out["switched"], true);
        assert_eq!(out["activePersonaId"], "educator");

        let err = svc.auto_switch_persona(AutoSwitchArgs { context: "x".into(), user_preference: None, confidence_threshold: Some(1.5) }).unwrap_err();
        assert!(matches!(err, PersonaError::InvalidRequest(_)));
    }

    #[test]
    fn generate_suffixes_derived_ids_but_rejects_explicit_collisions() {
        let (mut svc, _) = seeded();
        let first = svc.generate_persona(GenerateArgs { description: "a software mentor".into(), id: None }).unwrap();
        let second = svc.generate_persona(GenerateArgs { description: "a software mentor".into(), id: None }).unwrap();
        assert_eq!(first.id, "technical-specialist");
        assert_eq!(second.id, "technical-specialist-2");
        let err = svc.generate_persona(GenerateArgs { description: "anything".into(), id: Some("default".into()) }).unwrap_err();
        assert!(matches!(err, PersonaError::AlreadyExists { .. }));
    }

    #[test]
    fn save_ai_persona_validates_json() {
        let (mut svc, _) = seeded();
        let err = svc.save_ai_persona(SaveAiPersonaArgs { persona_json: "{oops".into() }).unwrap_err();
        assert!(matches!(err, PersonaError::InvalidRequest(_)));
        let ok = svc
            .save_ai_persona(SaveAiPersonaArgs { persona_json: r#"{"id":"ai","name":"AI","description":"d","systemPrompt":"You are AI."}"#.into() })
            .unwrap();
        assert!(svc.store().contains(&ok.id));
    }

    #[test]
    fn smart_recommendations_merge_usage_and_content() {
        let (mut svc, _) = seeded();
        svc.switch_persona(SwitchArgs { persona_id: "technical-expert".into(), context: Some("debugging memory leaks".into()) }).unwrap();
        let recs = svc.get_smart_recommendations(ContextArgs { context: "debugging memory issues in code".into() }).unwrap();
        assert_eq!(recs[0].persona_id, "technical-expert");
        assert_eq!(recs[0].source, "combined");
        assert_eq!(recs[0].confidence, 1.0);
        assert!(recs.len() <= MAX_SMART_RECOMMENDATIONS);
        assert!(recs.iter().all(|r| r.confidence <= 1.0 && r.confidence > 0.0));
    }

    #[test]
    fn stats_survive_persona_deletion() {
        let (mut svc, _) = seeded();
        svc.switch_persona(SwitchArgs { persona_id: "creative-writer".into(), context: None }).unwrap();
        svc.delete_persona(PersonaIdArgs { persona_id: "creative-writer".into() }).unwrap();
        assert!(svc.get_persona_stats(OptionalPersonaArgs { persona_id: Some("creative-writer".into()) }).is_ok());
        assert_eq!(svc.reset_stats(OptionalPersonaArgs { persona_id: Some("never-used".into()) }).unwrap()["cleared"], 0);
    }

    #[test]
    fn templates_apply_through_facade() {
        let (mut svc, _) = seeded();
        svc.create_prompt_template(CreateTemplateArgs {
            name: "Bug report".into(),
            content: "Bug in {{component}}: {{summary}}".into(),
            id: Some("bug".into()),
            description: String::new(),
            category: "dev".into(),
            tags: vec![],
        })
        .unwrap();
        let text = svc
            .apply_prompt_template(ApplyTemplateArgs {
                template_id: "bug".into(),
                variables: HashMap::from([("component".into(), "parser".into()), ("summary".into(), "panics on empty input".into())]),
            })
            .unwrap();
        assert_eq!(text, "Bug in parser: panics on empty input");
    }
}
