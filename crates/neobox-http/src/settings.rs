//! Settings Store
//!
//! Read-only view over the suite's JSON settings. Keys are dotted paths;
//! numeric segments index into arrays (`http.headers.0`).

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::SettingsError;

/// JSON settings with nested lookup and typed extraction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    root: Value,
}

impl Settings {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Parse settings from JSON text
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(Self::new(serde_json::from_str(text)?))
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Look up a dotted path. An empty path is the root.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.lookup(path)?.as_str()
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.lookup(path)?.as_i64()
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.lookup(path)?.as_u64()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.lookup(path)?.as_bool()
    }

    /// Deserialize the value at `path`. Missing keys are `Ok(None)`.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, SettingsError> {
        match self.lookup(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| SettingsError::Invalid {
                    key: path.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}
