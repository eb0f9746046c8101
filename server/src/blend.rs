use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PersonaError, Result};
use crate::persona::{union_into, Persona};
use crate::store::PersonaStore;

pub const BLEND_TTL_SECS: i64 = 60 * 60;
pub const EXPIRED_GRACE_SECS: i64 = 24 * 60 * 60;
pub const PROMOTED_TRAITS: [&str; 2] = ["adaptive", "multi-faceted"];
pub const PROMOTED_STYLE: &str = "adaptive and comprehensive";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Merge,
    Sequential,
}

impl std::str::FromStr for BlendMode {
    type Err = PersonaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "sequential" => Ok(Self::Sequential),
            other => Err(PersonaError::invalid(format!("unknown blend_mode '{}', expected merge or sequential", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaBlend {
    pub id: String,
    pub name: String,
    pub source_persona_ids: Vec<String>,
    pub task: String,
    pub blend_mode: BlendMode,
    pub system_prompt: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBlendView {
    #[serde(flatten)]
    pub blend: PersonaBlend,
    pub time_remaining: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiredBlendView {
    #[serde(flatten)]
    pub blend: PersonaBlend,
    /// Seconds until the blend is purged, never negative.
    pub time_until_permanent_deletion: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: Vec<String>,
    pub purged: Vec<String>,
}

#[derive(Default)]
// active -> expired (persona removed) -> purged after the grace window, or promoted.
pub struct BlendManager {
    active: Vec<PersonaBlend>,
    expired: Vec<PersonaBlend>,
    seq: u64,
}

impl BlendManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self, prefix: &str, now: DateTime<Utc>) -> String {
        self.seq += 1;
        format!("{}_{}_{}", prefix, now.timestamp_millis(), self.seq)
    }

    /// Ages every blend against `now`.
    pub fn sweep(&mut self, store: &mut PersonaStore, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let (still_active, past_ttl): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active).into_iter().partition(|b| now <= b.expires_at);
        self.active = still_active;
        for mut blend in past_ttl {
            store.remove_transient(&blend.id);
            blend.expired_at = Some(now);
            info!(id = %blend.id, "blend expired");
            report.expired.push(blend.id.clone());
            self.expired.push(blend);
        }

        let grace = Duration::seconds(EXPIRED_GRACE_SECS);
        self.expired.retain(|b| {
            let keep = b.expired_at.map(|at| now <= at + grace).unwrap_or(true);
            if !keep {
                info!(id = %b.id, "expired blend purged");
                report.purged.push(b.id.clone());
            }
            keep
        });
        report
    }

    /// Creates a blend from at least two existing personas and makes it the
    /// active persona.
    pub fn create(&mut self, store: &mut PersonaStore, source_ids: &[String], task: &str, mode: BlendMode, now: DateTime<Utc>) -> Result<(PersonaBlend, Persona)> {
        if source_ids.len() < 2 {
            return Err(PersonaError::invalid("blending requires at least 2 persona ids"));
        }
        self.sweep(store, now);

        let sources: Vec<Persona> = source_ids.iter().map(|id| store.require(id).cloned()).collect::<Result<_>>()?;

        let mut traits = Vec::new();
        let mut expertise = Vec::new();
        for s in &sources {
            union_into(&mut traits, &s.traits);
            union_into(&mut expertise, &s.expertise);
        }
        let styles: Vec<&str> = sources.iter().map(|s| s.communication_style.as_str()).collect();
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        let system_prompt = match mode {
            BlendMode::Merge => merge_prompt(&sources, &expertise, task),
            BlendMode::Sequential => sequential_prompt(&sources, task),
        };

        let id = self.next_id("blend", now);
        let blend = PersonaBlend {
            id: id.clone(),
            name: format!("Blend: {}", names.join(" + ")),
            source_persona_ids: source_ids.to_vec(),
            task: task.to_string(),
            blend_mode: mode,
            system_prompt: system_prompt.clone(),
            created_at: now,
            expires_at: now + Duration::seconds(BLEND_TTL_SECS),
            expired_at: None,
        };
        let persona = Persona {
            id: id.clone(),
            name: blend.name.clone(),
            description: format!("Temporary blend for: {}", task),
            system_prompt,
            traits,
            communication_style: format!("Adaptive blend of: {}", styles.join(", ")),
            expertise,
        };

        store.insert_transient(persona.clone());
        store.switch_active(&id)?;
        info!(id = %id, sources = ?source_ids, ?mode, "blend created");
        self.active.push(blend.clone());
        Ok((blend, persona))
    }

    pub fn list_active(&self, now: DateTime<Utc>) -> Vec<ActiveBlendView> {
        self.active
            .iter()
            .map(|b| ActiveBlendView { blend: b.clone(), time_remaining: (b.expires_at - now).num_seconds().max(0) })
            .collect()
    }

    /// Most recently expired first.
    pub fn list_expired(&self, now: DateTime<Utc>) -> Vec<ExpiredBlendView> {
        let grace = Duration::seconds(EXPIRED_GRACE_SECS);
        let mut out: Vec<ExpiredBlendView> = self
            .expired
            .iter()
            .map(|b| {
                let remaining = b.expired_at.map(|at| (at + grace - now).num_seconds()).unwrap_or(EXPIRED_GRACE_SECS);
                ExpiredBlendView { blend: b.clone(), time_until_permanent_deletion: remaining.max(0) }
            })
            .collect();
        out.sort_by(|a, b| b.blend.expired_at.cmp(&a.blend.expired_at));
        out
    }

    /// Converts an expired blend into a permanent persona.
    pub fn promote(&mut self, store: &mut PersonaStore, blend_id: &str, now: DateTime<Utc>) -> Result<Persona> {
        let idx = self
            .expired
            .iter()
            .position(|b| b.id == blend_id)
            .ok_or_else(|| PersonaError::invalid(format!("'{}' is not an expired blend", blend_id)))?;

        let mut expertise = Vec::new();
        for source in &self.expired[idx].source_persona_ids {
            if let Some(p) = store.get(source) {
                union_into(&mut expertise, &p.expertise);
            }
        }
        let id = self.next_id("promoted", now);
        let blend = &self.expired[idx];
        let persona = Persona {
            id,
            name: format!("Promoted {}", blend.name),
            description: format!("Promoted from expired blend for: {}", blend.task),
            system_prompt: blend.system_prompt.clone(),
            traits: PROMOTED_TRAITS.iter().map(|s| s.to_string()).collect(),
            communication_style: PROMOTED_STYLE.to_string(),
            expertise,
        };
        store.create(persona.clone())?;
        self.expired.remove(idx);
        info!(blend = %blend_id, id = %persona.id, "expired blend promoted");
        Ok(persona)
    }

    /// Drops a live blend whose persona was deleted out from under it.
    pub fn discard(&mut self, id: &str) -> bool {
        let before = self.active.len();
        self.active.retain(|b| b.id != id);
        before != self.active.len()
    }

    pub fn is_active_blend(&self, id: &str) -> bool {
        self.active.iter().any(|b| b.id == id)
    }

    /// Blends not yet moved to expired. May include ones past their TTL until
    /// the next sweep.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, id: &str, expires_at: DateTime<Utc>) {
        if let Some(b) = self.active.iter_mut().find(|b| b.id == id) {
            b.expires_at = expires_at;
        }
    }
}

fn merge_prompt(sources: &[Persona], expertise: &[String], task: &str) -> String {
    let mut prompt = format!(
        "You are a blended assistant combining the strengths of {} personas for this task: {}\n\nCombined expertise: {}\n",
        sources.len(),
        task,
        expertise.join(", ")
    );
    for s in sources {
        prompt.push_str(&format!("\nFrom {} ({}):\n{}\n", s.name, s.expertise.join(", "), s.system_prompt));
    }
    prompt.push_str("\nSynthesize these perspectives into one unified approach: draw on whichever expertise fits each part of the task while keeping a single consistent voice.");
    prompt
}

fn sequential_prompt(sources: &[Persona], task: &str) -> String {
    let mut prompt = format!("You are a multi-phase assistant for this task: {}\n\nWork through these perspectives in order:\n", task);
    for (i, s) in sources.iter().enumerate() {
        prompt.push_str(&format!("\n{}. {} (expertise: {})\n{}\n", i + 1, s.name, s.expertise.join(", "), s.system_prompt));
    }
    prompt.push_str("\nChannel each perspective in the order listed and say explicitly when you transition from one to the next.");
    prompt
}
