use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

pub const ALLOW_AUDIO_AUTOPLAY: &str = "allow_audio_autoplay";
pub const SELECTED_IMAGE: &str = "selected_image";
pub const SELECTED_ROLE: &str = "selected_role";
pub const SELECTED_GENDER: &str = "selected_gender";
pub const SELECTED_SPECIALTY: &str = "selected_specialty";

/// Persona keys cleared when the user goes back to persona selection.
pub const PERSONA_KEYS: [&str; 4] = [
    SELECTED_IMAGE,
    SELECTED_ROLE,
    SELECTED_GENDER,
    SELECTED_SPECIALTY,
];

/// Small JSON-file key/value store for user preferences that outlive a session.
///
/// Writes only flush the keys this process touched, so two sessions sharing the
/// file do not clobber each other's unrelated keys.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: Option<PathBuf>,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
    removed_keys: Vec<String>,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            payload: None,
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
        }
    }

    /// Store that keeps everything in memory.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            payload: Some(Map::new()),
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.ensure_loaded().get(key).cloned()
    }

    pub fn get_str(&mut self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|value| value.as_str().map(str::trim).map(str::to_string))
            .filter(|value| !value.is_empty())
    }

    pub fn get_bool(&mut self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(flag)) => flag,
            Some(Value::String(raw)) => raw.trim().eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let payload = self.ensure_loaded();
        if payload.get(key) == Some(&value) {
            return Ok(());
        }
        payload.insert(key.to_string(), value);
        self.removed_keys.retain(|existing| existing != key);
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        let payload = self.ensure_loaded();
        if payload.remove(key).is_none() {
            return Ok(());
        }
        self.dirty_keys.retain(|existing| existing != key);
        if !self.removed_keys.iter().any(|existing| existing == key) {
            self.removed_keys.push(key.to_string());
        }
        self.flush()
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.dirty_keys.is_empty() && self.removed_keys.is_empty() {
            return Ok(());
        }
        let Some(path) = self.path.clone() else {
            self.dirty_keys.clear();
            self.removed_keys.clear();
            return Ok(());
        };

        let mut on_disk = read_json_object(&path).unwrap_or_default();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        for key in &self.removed_keys {
            on_disk.remove(key);
        }
        write_json_object(&path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        self.removed_keys.clear();
        Ok(())
    }

    fn ensure_loaded(&mut self) -> &mut Map<String, Value> {
        let path = self.path.clone();
        self.payload.get_or_insert_with(|| {
            path.as_deref()
                .and_then(read_json_object)
                .unwrap_or_default()
        })
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
