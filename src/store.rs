//! Key/value persistence for settings and history.
//!
//! Every key is independent; there is no transactional grouping. Values are
//! plain JSON so the on-disk file stays readable.

use crate::error::{PopupError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const KEY_API_KEY: &str = "apiKey";
pub const KEY_TEMPERATURE: &str = "temperature";
pub const KEY_HISTORY: &str = "history";
pub const KEY_THEME: &str = "theme";
pub const KEY_SELECTED_MODEL: &str = "selectedModel";
pub const KEY_INCLUDE_PAGE_CONTENT: &str = "includePageContent";
pub const KEY_ENABLE_MODEL_SEARCH: &str = "enableModelSearch";

pub trait SettingsStore: Send + Sync {
    /// Fetch the requested keys. Absent keys are simply missing from the map.
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>>;

    /// Merge `values` into the store.
    fn set(&self, values: Map<String, Value>) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn get_one(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(&[key])?.remove(key))
    }

    fn set_one(&self, key: &str, value: Value) -> Result<()> {
        let mut values = Map::new();
        values.insert(key.to_string(), value);
        self.set(values)
    }
}

/// Store backed by a single JSON object on disk.
///
/// Writes go to a `.tmp` sibling and are renamed into place; the previous
/// file is kept as `.json.bak`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// `<config dir>/settings.json`, if a config dir can be determined.
    pub fn default_location() -> Option<Self> {
        crate::config::config_dir().map(|dir| Self::new(dir.join("settings.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            other => Err(PopupError::Storage(format!(
                "expected a JSON object in {}, found {}",
                self.path.display(),
                other
            ))),
        }
    }

    fn write_all(&self, values: &Map<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(values)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if self.path.exists() {
            let backup_path = self.path.with_extension("json.bak");
            fs::copy(&self.path, &backup_path)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SettingsStore for FileStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let _guard = self.guard();
        let mut all = self.read_all()?;
        Ok(keys
            .iter()
            .filter_map(|key| all.remove(*key).map(|value| (key.to_string(), value)))
            .collect())
    }

    fn set(&self, values: Map<String, Value>) -> Result<()> {
        let _guard = self.guard();
        let mut all = self.read_all()?;
        all.extend(values);
        self.write_all(&all)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.guard();
        let mut all = self.read_all()?;
        if all.remove(key).is_some() {
            self.write_all(&all)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let values = self.values();
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    fn set(&self, values: Map<String, Value>) -> Result<()> {
        self.values().extend(values);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values().remove(key);
        Ok(())
    }
}
