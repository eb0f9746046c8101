use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::persona::Persona;
use crate::stats::PersonaUsageStat;
use crate::templates::PromptTemplate;

const PERSONA_STATE_KEY: &str = "persona_state";
const USAGE_STATS_KEY: &str = "usage_stats";
const TEMPLATES_KEY: &str = "prompt_templates";

/// Serialized form of the persona collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaState {
    #[serde(default)]
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub active_persona_id: Option<String>,
    #[serde(default)]
    pub default_persona_id: Option<String>,
}

pub trait StateBackend: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// `Ok(None)` means nothing has been stored yet.
    fn load_persona_state(&self) -> Result<Option<PersonaState>> {
        load_json(self, PERSONA_STATE_KEY)
    }

    fn save_persona_state(&self, state: &PersonaState) -> Result<()> {
        save_json(self, PERSONA_STATE_KEY, state)
    }

    fn load_stats(&self) -> Result<Vec<PersonaUsageStat>> {
        Ok(load_json(self, USAGE_STATS_KEY)?.unwrap_or_default())
    }

    fn save_stats(&self, stats: &[PersonaUsageStat]) -> Result<()> {
        save_json(self, USAGE_STATS_KEY, &stats)
    }

    fn load_templates(&self) -> Result<Option<Vec<PromptTemplate>>> {
        load_json(self, TEMPLATES_KEY)
    }

    fn save_templates(&self, templates: &[PromptTemplate]) -> Result<()> {
        save_json(self, TEMPLATES_KEY, &templates)
    }
}

fn load_json<T: DeserializeOwned, B: StateBackend + ?Sized>(backend: &B, key: &str) -> Result<Option<T>> {
    match backend.get_raw(key)? {
        Some(bytes) => {
            let v = serde_json::from_slice(&bytes).with_context(|| format!("corrupt value under '{}'", key))?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

fn save_json<T: Serialize + ?Sized, B: StateBackend + ?Sized>(backend: &B, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    backend.put_raw(key, bytes)
}

/// sled-backed store rooted at `<data_dir>/kv`.
pub struct SledBackend {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledBackend {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let root = data_dir.as_ref();
        std::fs::create_dir_all(root).with_context(|| format!("creating data dir {}", root.display()))?;
        let db = sled::open(root.join("kv"))?;
        let tree = db.open_tree("personas")?;
        Ok(Self { db, tree })
    }
}

impl StateBackend for SledBackend {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.tree.insert(key.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }
}

/// Volatile backend for tests and `--in-memory` runs.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write errors; reads still work.
    pub fn failing_writes() -> Self {
        Self { entries: Mutex::new(HashMap::new()), fail_writes: true }
    }

    pub fn with_raw(key: &str, bytes: &[u8]) -> Self {
        let backend = Self::new();
        if let Ok(mut map) = backend.entries.lock() {
            map.insert(key.to_string(), bytes.to_vec());
        }
        backend
    }
}

impl StateBackend for MemoryBackend {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.entries.lock().map_err(|_| anyhow::anyhow!("memory backend poisoned"))?;
        Ok(map.get(key).cloned())
    }

    fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("write rejected for '{}'", key);
        }
        let mut map = self.entries.lock().map_err(|_| anyhow::anyhow!("memory backend poisoned"))?;
        map.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) const TEST_PERSONA_STATE_KEY: &str = PERSONA_STATE_KEY;
