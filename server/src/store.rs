use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{PersonaError, Result};
use crate::persona::{builtin_personas, Persona};
use crate::storage::{PersonaState, StateBackend};

/// Pointer or content repair performed while loading or reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairEvent {
    Seeded { reason: String },
    DefaultReassigned { from: Option<String>, to: String },
    ActiveReassigned { from: Option<String>, to: String },
}

// When non-empty the default always resolves; active resolves after load and after any healing read.
pub struct PersonaStore {
    personas: Vec<Persona>,
    active_id: Option<String>,
    default_id: String,
    configured_default: String,
    // never written to storage
    transient: HashSet<String>,
    backend: Arc<dyn StateBackend>,
}

impl PersonaStore {
    /// Loads the collection, seeding built-ins when storage is empty or
    /// unreadable, then repairs both pointers.
    pub fn load(backend: Arc<dyn StateBackend>, configured_default: &str) -> (Self, Vec<RepairEvent>) {
        let mut events = Vec::new();
        let state = match backend.load_persona_state() {
            Ok(Some(state)) => state,
            Ok(None) => {
                events.push(RepairEvent::Seeded { reason: "no stored persona state".to_string() });
                seeded_state(configured_default)
            }
            Err(err) => {
                warn!(%err, "persona state unreadable, falling back to built-in personas");
                events.push(RepairEvent::Seeded { reason: format!("stored state unreadable: {}", err) });
                seeded_state(configured_default)
            }
        };

        let mut personas: Vec<Persona> = Vec::with_capacity(state.personas.len());
        for p in state.personas {
            if personas.iter().any(|e| e.id == p.id) {
                warn!(id = %p.id, "duplicate persona id in stored state, keeping first");
                continue;
            }
            personas.push(p);
        }

        let mut store = Self {
            personas,
            active_id: state.active_persona_id,
            default_id: configured_default.to_string(),
            configured_default: configured_default.to_string(),
            transient: HashSet::new(),
            backend,
        };

        let stored_default = state.default_persona_id;
        let default_ok = stored_default.as_deref().map(|id| store.contains(id)).unwrap_or(false);
        store.default_id = match stored_default.clone() {
            Some(id) if default_ok => id,
            _ => {
                let repaired = store.fallback_default(None);
                warn!(from = ?stored_default, to = %repaired, "repaired default persona pointer");
                events.push(RepairEvent::DefaultReassigned { from: stored_default, to: repaired.clone() });
                repaired
            }
        };

        let active_ok = store.active_id.as_deref().map(|id| store.contains(id)).unwrap_or(false);
        if !active_ok {
            let from = store.active_id.take();
            let to = store.default_id.clone();
            warn!(from = ?from, to = %to, "repaired active persona pointer");
            events.push(RepairEvent::ActiveReassigned { from, to: to.clone() });
            store.active_id = Some(to);
        }

        if !events.is_empty() {
            store.save();
        }
        info!(personas = store.personas.len(), active = ?store.active_id, default = %store.default_id, "persona store loaded");
        (store, events)
    }

    /// Configured default if present, else first persona (excluding `skip`),
    /// else the configured id as a placeholder.
    fn fallback_default(&self, skip: Option<&str>) -> String {
        if self.contains(&self.configured_default) && Some(self.configured_default.as_str()) != skip {
            return self.configured_default.clone();
        }
        self.personas
            .iter()
            .map(|p| p.id.as_str())
            .find(|id| Some(*id) != skip)
            .map(str::to_string)
            .unwrap_or_else(|| self.configured_default.clone())
    }

    /// Flushes the permanent personas and both pointers. Failures are logged
    /// and the in-memory state stays authoritative.
    pub fn save(&self) {
        let state = PersonaState {
            personas: self.personas.iter().filter(|p| !self.transient.contains(&p.id)).cloned().collect(),
            active_persona_id: self.active_id.clone(),
            default_persona_id: Some(self.default_id.clone()),
        };
        if let Err(err) = self.backend.save_persona_state(&state) {
            error!(%err, "failed to persist persona state");
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.personas.iter().any(|p| p.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&Persona> {
        self.get(id).ok_or_else(|| PersonaError::not_found("persona", id))
    }

    pub fn all(&self) -> &[Persona] {
        &self.personas
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn is_transient(&self, id: &str) -> bool {
        self.transient.contains(id)
    }

    pub fn active_id_raw(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn configured_default(&self) -> &str {
        &self.configured_default
    }

    /// Heals an unset or dangling active pointer to the default when the
    /// default resolves. Returns the event when a repair happened.
    pub fn heal_active(&mut self) -> Option<RepairEvent> {
        let resolves = self.active_id.as_deref().map(|id| self.contains(id)).unwrap_or(false);
        if resolves || !self.contains(&self.default_id) {
            return None;
        }
        let from = self.active_id.take();
        let to = self.default_id.clone();
        warn!(from = ?from, to = %to, "self-healed active persona pointer");
        self.active_id = Some(to.clone());
        self.save();
        Some(RepairEvent::ActiveReassigned { from, to })
    }

    /// Active persona after self-healing, if anything resolves.
    pub fn active(&mut self) -> Option<&Persona> {
        self.heal_active();
        let id = self.active_id.clone()?;
        self.get(&id)
    }

    pub fn create(&mut self, persona: Persona) -> Result<()> {
        if self.contains(&persona.id) {
            return Err(PersonaError::already_exists("persona", persona.id));
        }
        info!(id = %persona.id, "persona created");
        self.personas.push(persona);
        self.save();
        Ok(())
    }

    pub fn replace(&mut self, id: &str, mut persona: Persona) -> Result<()> {
        let slot = self
            .personas
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PersonaError::not_found("persona", id))?;
        persona.id = id.to_string();
        *slot = persona;
        self.save();
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<Persona> {
        let idx = self
            .personas
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| PersonaError::not_found("persona", id))?;
        let removed = self.personas.remove(idx);
        self.transient.remove(id);

        if self.default_id == id {
            let to = self.fallback_default(None);
            info!(from = %id, to = %to, "default persona reassigned after delete");
            self.default_id = to;
        }
        if self.active_id.as_deref() == Some(id) {
            // Always the configured id, even if it does not resolve.
            self.active_id = Some(self.configured_default.clone());
            if !self.contains(&self.configured_default) {
                warn!(active = %self.configured_default, "active persona points at unseeded configured default");
            }
        }
        self.save();
        Ok(removed)
    }

    pub fn switch_active(&mut self, id: &str) -> Result<Option<Persona>> {
        if !self.contains(id) {
            return Err(PersonaError::not_found("persona", id));
        }
        let previous = self.active_id.as_deref().and_then(|prev| self.get(prev)).cloned();
        self.active_id = Some(id.to_string());
        self.save();
        Ok(previous)
    }

    pub fn set_default(&mut self, id: &str) -> Result<()> {
        if !self.contains(id) {
            return Err(PersonaError::not_found("persona", id));
        }
        self.default_id = id.to_string();
        self.save();
        Ok(())
    }

    /// Inserts a generated blend persona that must not outlive the process.
    pub(crate) fn insert_transient(&mut self, persona: Persona) {
        self.transient.insert(persona.id.clone());
        self.personas.retain(|p| p.id != persona.id);
        self.personas.push(persona);
    }

    /// Drops a blend persona. A default pointing at it is reassigned; the
    /// active pointer is left as-is and heals on the next read.
    pub(crate) fn remove_transient(&mut self, id: &str) -> Option<Persona> {
        if !self.transient.remove(id) {
            return None;
        }
        let idx = self.personas.iter().position(|p| p.id == id)?;
        let removed = self.personas.remove(idx);
        if self.default_id == id {
            let to = self.fallback_default(None);
            info!(from = %id, to = %to, "default persona reassigned after blend expiry");
            self.default_id = to;
            self.save();
        }
        Some(removed)
    }
}

fn seeded_state(configured_default: &str) -> PersonaState {
    PersonaState {
        personas: builtin_personas(),
        active_persona_id: Some(configured_default.to_string()),
        default_persona_id: Some(configured_default.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, TEST_PERSONA_STATE_KEY};

    fn persona(id: &str) -> Persona {
        Persona::new(id, id.to_uppercase(), format!("{} persona", id), format!("You are {}.", id))
    }

    fn backend_with(state: PersonaState) -> Arc<dyn StateBackend> {
        let backend = MemoryBackend::new();
        backend.save_persona_state(&state).unwrap();
        Arc::new(backend)
    }

    fn state(ids: &[&str], active: Option<&str>, default: Option<&str>) -> PersonaState {
        PersonaState {
            personas: ids.iter().map(|id| persona(id)).collect(),
            active_persona_id: active.map(str::to_string),
            default_persona_id: default.map(str::to_string),
        }
    }

    #[test]
    fn empty_storage_seeds_builtins() {
        let (mut store, events) = PersonaStore::load(Arc::new(MemoryBackend::new()), "default");
        assert!(matches!(events[0], RepairEvent::Seeded { .. }));
        assert_eq!(store.default_id(), "default");
        assert_eq!(store.active().unwrap().id, "default");
        assert_eq!(store.len(), builtin_personas().len());
    }

    #[test]
    fn corrupt_storage_seeds_builtins() {
        let backend = MemoryBackend::with_raw(TEST_PERSONA_STATE_KEY, b"[[[");
        let (store, events) = PersonaStore::load(Arc::new(backend), "default");
        assert!(matches!(&events[0], RepairEvent::Seeded { reason } if reason.contains("unreadable")));
        assert!(store.contains("default"));
    }

    #[test]
    fn load_repairs_missing_default_to_configured() {
        let (store, events) = PersonaStore::load(backend_with(state(&["a", "default"], Some("a"), Some("gone"))), "default");
        assert_eq!(store.default_id(), "default");
        assert_eq!(store.active_id_raw(), Some("a"));
        assert_eq!(events, vec![RepairEvent::DefaultReassigned { from: Some("gone".into()), to: "default".into() }]);
    }

    #[test]
    fn load_repairs_default_to_first_when_configured_absent() {
        let (store, _) = PersonaStore::load(backend_with(state(&["x", "y"], None, None)), "default");
        assert_eq!(store.default_id(), "x");
        assert_eq!(store.active_id_raw(), Some("x"));
    }

    #[test]
    fn load_keeps_placeholder_when_empty() {
        let (store, _) = PersonaStore::load(backend_with(state(&[], None, None)), "default");
        assert!(store.is_empty());
        assert_eq!(store.default_id(), "default");
        assert_eq!(store.active_id_raw(), Some("default"));
    }

    #[test]
    fn pointers_resolve_after_load_when_non_empty() {
        let cases = [
            state(&["a", "b"], Some("zz"), Some("yy")),
            state(&["a"], None, None),
            state(&["default", "b"], Some("b"), None),
            state(&["a", "b"], Some("b"), Some("a")),
        ];
        for case in cases {
            let (store, _) = PersonaStore::load(backend_with(case), "default");
            assert!(store.contains(store.default_id()));
            assert!(store.contains(store.active_id_raw().unwrap()));
        }
    }

    #[test]
    fn delete_default_and_active_uses_asymmetric_reassignment() {
        let (mut store, _) = PersonaStore::load(backend_with(state(&["p1", "p2"], Some("p1"), Some("p1"))), "default");
        store.delete("p1").unwrap();
        assert_eq!(store.default_id(), "p2");
        // Active goes to the configured id even though nothing named "default" exists.
        assert_eq!(store.active_id_raw(), Some("default"));
        assert!(store.get("default").is_none());
        // The next healing read resolves it to the reassigned default.
        assert_eq!(store.active().unwrap().id, "p2");
    }

    #[test]
    fn delete_last_persona_leaves_placeholder_default() {
        let (mut store, _) = PersonaStore::load(backend_with(state(&["only"], Some("only"), Some("only"))), "default");
        store.delete("only").unwrap();
        assert!(store.is_empty());
        assert_eq!(store.default_id(), "default");
        assert!(store.active().is_none());
    }

    #[test]
    fn delete_missing_is_not_found() {
        let (mut store, _) = PersonaStore::load(backend_with(state(&["a"], None, None)), "default");
        assert!(store.delete("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn create_duplicate_is_already_exists() {
        let (mut store, _) = PersonaStore::load(backend_with(state(&["a"], None, None)), "default");
        let err = store.create(persona("a")).unwrap_err();
        assert_eq!(err, PersonaError::already_exists("persona", "a"));
    }

    #[test]
    fn switch_returns_previous_and_persists() {
        let backend = backend_with(state(&["a", "b"], Some("a"), Some("a")));
        let (mut store, _) = PersonaStore::load(backend.clone(), "default");
        let prev = store.switch_active("b").unwrap();
        assert_eq!(prev.unwrap().id, "a");
        let saved = backend.load_persona_state().unwrap().unwrap();
        assert_eq!(saved.active_persona_id.as_deref(), Some("b"));
    }

    #[test]
    fn transient_personas_are_not_persisted() {
        let backend = backend_with(state(&["a"], Some("a"), Some("a")));
        let (mut store, _) = PersonaStore::load(backend.clone(), "default");
        store.insert_transient(persona("blend_1"));
        store.switch_active("blend_1").unwrap();
        let saved = backend.load_persona_state().unwrap().unwrap();
        assert_eq!(saved.personas.len(), 1);
        assert!(store.remove_transient("blend_1").is_some());
        assert_eq!(store.active().unwrap().id, "a");
    }

    #[test]
    fn expiring_blend_used_as_default_reassigns_default() {
        let backend = backend_with(state(&["a", "b"], Some("a"), Some("a")));
        let (mut store, _) = PersonaStore::load(backend.clone(), "default");
        store.insert_transient(persona("blend_1"));
        store.set_default("blend_1").unwrap();
        store.switch_active("b").unwrap();
        store.remove_transient("blend_1").unwrap();
        assert_eq!(store.default_id(), "a");
        assert!(store.contains(store.default_id()));
        let saved = backend.load_persona_state().unwrap().unwrap();
        assert_eq!(saved.default_persona_id.as_deref(), Some("a"));

        // Deleting the active persona still heals to a resolvable default.
        store.delete("b").unwrap();
        assert_eq!(store.active().unwrap().id, "a");
    }

    #[test]
    fn write_failures_do_not_roll_back() {
        let backend = MemoryBackend::failing_writes();
        let (mut store, _) = PersonaStore::load(Arc::new(backend), "default");
        store.create(persona("fresh")).unwrap();
        assert!(store.contains("fresh"));
    }
}
