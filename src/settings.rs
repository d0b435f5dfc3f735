//! Persisted selection store - a small JSON key/value document.
//!
//! - Reading a missing file yields an empty document (no selection)
//! - Writing merges keys into the existing document instead of replacing it;
//!   a document that fails to parse is never overwritten
//!
//! The store is injected into the session and the selection adapters; none
//! of them touch the settings file directly.

use anyhow::{Context, Result};
use log::debug;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const KEY_SELECTED_DEVICE: &str = "selected_device";
pub const KEY_SELECTED_THEME: &str = "selected_theme";
pub const KEY_RESOLUTION: &str = "resolution";
pub const KEY_ROTATION: &str = "rotation";
pub const KEY_BRIGHTNESS: &str = "brightness";

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole document. Missing file -> empty map.
    pub fn load(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings: {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw)
            .with_context(|| format!("Failed to parse settings: {}", self.path.display()))?
        {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!(
                "Settings root must be an object, found {}",
                json_kind(&other)
            ),
        }
    }

    /// Single key. Missing file, unreadable file or missing key -> None.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.load() {
            Ok(mut map) => map.remove(key),
            Err(e) => {
                debug!("Settings unavailable: {:#}", e);
                None
            }
        }
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    /// `[w, h]` pair
    pub fn get_resolution(&self) -> Option<(u32, u32)> {
        let value = self.get(KEY_RESOLUTION)?;
        let arr = value.as_array()?;
        match (arr.first()?.as_u64(), arr.get(1)?.as_u64()) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w as u32, h as u32)),
            _ => None,
        }
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.set_many([(key.to_string(), value)])
    }

    /// Read-merge-write. An unreadable document is left untouched and the
    /// write fails, so existing keys are never lost.
    pub fn set_many<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut map = self.load()?;
        for (k, v) in entries {
            map.insert(k, v);
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&Value::Object(map))?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write settings: {}", self.path.display()))?;
        Ok(())
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
