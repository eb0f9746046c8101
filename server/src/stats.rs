use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::scoring::tokenize;
use crate::storage::StateBackend;

pub const COMMON_TASKS_CAPACITY: usize = 10;
pub const MAX_RECOMMENDATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaUsageStat {
    pub persona_id: String,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
    /// Rolling average, seconds.
    pub average_session_duration: f64,
    pub success_rate: f64,
    #[serde(default)]
    pub common_tasks: Vec<String>,
}

impl PersonaUsageStat {
    fn new(persona_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            persona_id: persona_id.to_string(),
            usage_count: 0,
            last_used: now,
            average_session_duration: 0.0,
            success_rate: 0.0,
            common_tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecommendation {
    pub persona_id: String,
    pub score: u32,
    pub reasoning: String,
}

pub struct UsageStatsTracker {
    stats: Vec<PersonaUsageStat>,
    sessions: HashMap<String, DateTime<Utc>>,
    backend: Arc<dyn StateBackend>,
}

/// Short keyword fragment of a context: first three words longer than four
/// characters, lowercased.
pub fn task_fragment(context: &str) -> Option<String> {
    let words: Vec<String> = context.split_whitespace().filter(|w| w.chars().count() > 4).take(3).map(|w| w.to_lowercase()).collect();
    (!words.is_empty()).then(|| words.join(" "))
}

fn hour_distance(a: u32, b: u32) -> u32 {
    let d = a.abs_diff(b) % 24;
    d.min(24 - d)
}

impl UsageStatsTracker {
    pub fn load(backend: Arc<dyn StateBackend>) -> Self {
        let stats = match backend.load_stats() {
            Ok(stats) => stats,
            Err(err) => {
                warn!(%err, "usage stats unreadable, starting empty");
                Vec::new()
            }
        };
        Self { stats, sessions: HashMap::new(), backend }
    }

    fn save(&self) {
        if let Err(err) = self.backend.save_stats(&self.stats) {
            error!(%err, "failed to persist usage stats");
        }
    }

    fn entry(&mut self, id: &str, now: DateTime<Utc>) -> &mut PersonaUsageStat {
        match self.stats.iter().position(|s| s.persona_id == id) {
            Some(idx) => &mut self.stats[idx],
            None => {
                self.stats.push(PersonaUsageStat::new(id, now));
                let last = self.stats.len() - 1;
                &mut self.stats[last]
            }
        }
    }

    pub fn record_switch_to(&mut self, id: &str, context: Option<&str>, now: DateTime<Utc>) {
        let stat = self.entry(id, now);
        stat.usage_count += 1;
        stat.last_used = now;
        if let Some(fragment) = context.and_then(task_fragment) {
            if !stat.common_tasks.contains(&fragment) {
                stat.common_tasks.push(fragment);
                if stat.common_tasks.len() > COMMON_TASKS_CAPACITY {
                    stat.common_tasks.remove(0);
                }
            }
        }
        debug!(persona = %id, count = stat.usage_count, "recorded switch to persona");
        self.sessions.insert(id.to_string(), now);
        self.save();
    }

    pub fn record_switch_away(&mut self, id: &str, was_successful: bool, now: DateTime<Utc>) {
        let Some(started) = self.sessions.remove(id) else {
            return;
        };
        let Some(stat) = self.stats.iter_mut().find(|s| s.persona_id == id) else {
            return;
        };
        let n = stat.usage_count.max(1) as f64;
        let elapsed = (now - started).num_milliseconds().max(0) as f64 / 1000.0;
        stat.average_session_duration = (stat.average_session_duration * (n - 1.0) + elapsed) / n;
        let previous_successes = (stat.success_rate * (n - 1.0)).round();
        stat.success_rate = (previous_successes + if was_successful { 1.0 } else { 0.0 }) / n;
        debug!(persona = %id, elapsed, success_rate = stat.success_rate, "recorded switch away");
        self.save();
    }

    pub fn get(&self, id: &str) -> Option<&PersonaUsageStat> {
        self.stats.iter().find(|s| s.persona_id == id)
    }

    /// All records, most used first.
    pub fn all(&self) -> Vec<PersonaUsageStat> {
        let mut out = self.stats.clone();
        out.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
        out
    }

    /// Clears one record, or everything when `id` is `None`. Returns how many
    /// records were removed.
    pub fn reset(&mut self, id: Option<&str>) -> Result<usize> {
        let removed = match id {
            Some(id) => {
                let before = self.stats.len();
                self.stats.retain(|s| s.persona_id != id);
                self.sessions.remove(id);
                before - self.stats.len()
            }
            None => {
                self.sessions.clear();
                std::mem::take(&mut self.stats).len()
            }
        };
        self.save();
        Ok(removed)
    }

    /// Usage-based scoring pass, independent of content relevance. `exists`
    /// filters out records for personas that are gone.
    pub fn recommendations(&self, context: &str, now: DateTime<Utc>, exists: impl Fn(&str) -> bool) -> Vec<UsageRecommendation> {
        let context_tokens = tokenize(context);
        let mut out: Vec<UsageRecommendation> = self
            .stats
            .iter()
            .filter(|s| exists(&s.persona_id))
            .filter_map(|s| {
                let mut score = 0;
                let mut reasons = Vec::new();

                let task_hits = s
                    .common_tasks
                    .iter()
                    .filter(|task| task.split_whitespace().any(|w| context_tokens.iter().any(|t| t == w)))
                    .count() as u32;
                if task_hits > 0 {
                    score += 15 * task_hits;
                    reasons.push(format!("matches {} frequent task(s)", task_hits));
                }

                let age = now - s.last_used;
                if age <= Duration::hours(24) {
                    score += 10;
                    reasons.push("used in the last day".to_string());
                } else if age <= Duration::hours(72) {
                    score += 5;
                    reasons.push("used in the last 3 days".to_string());
                }

                if s.success_rate > 0.8 {
                    score += 8;
                    reasons.push(format!("high success rate ({:.0}%)", s.success_rate * 100.0));
                }
                if hour_distance(now.hour(), s.last_used.hour()) <= 2 {
                    score += 5;
                    reasons.push("often used at this time of day".to_string());
                }
                if s.usage_count > 10 {
                    score += 3;
                    reasons.push("frequently used".to_string());
                }

                (score > 0).then(|| UsageRecommendation { persona_id: s.persona_id.clone(), score, reasoning: reasons.join("; ") })
            })
            .collect();
        out.sort_by(|a, b| b.score.cmp(&a.score));
        out.truncate(MAX_RECOMMENDATIONS);
        out
    }
}
