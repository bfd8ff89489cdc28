//! Persisted key-value storage for session state.
//!
//! # Design
//! Values are stored as JSON text under string keys, mirroring browser
//! `localStorage`. Storage never fails loudly: read, write and parse errors
//! are logged as warnings and treated as a missing value, so a broken store
//! degrades to "signed out" instead of breaking every request.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

pub trait Storage: Send + Sync {
    fn get_raw(&self, key: &str) -> Option<String>;
    fn set_raw(&self, key: &str, value: String);
    fn remove(&self, key: &str);
    fn clear(&self);
}

/// Typed JSON access on top of any [`Storage`].
pub trait StorageExt {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T>;
    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T);
}

impl<S: Storage + ?Sized> StorageExt for S {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to decode stored value");
                None
            }
        }
    }

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, raw),
            Err(e) => tracing::warn!(key, error = %e, "failed to encode value for storage"),
        }
    }
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_raw(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set_raw(&self, key: &str, value: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}

/// Storage backed by a single JSON document on disk.
///
/// Each key maps to a JSON value in the top-level object. The whole document
/// is rewritten on every change.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStorage").field("path", &self.path).finish()
    }
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Map<String, Value> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to read storage file"
                );
                return Map::new();
            }
        };
        match serde_json::from_str::<Map<String, Value>>(&content) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "storage file is not a JSON object"
                );
                Map::new()
            }
        }
    }

    fn save(&self, map: &Map<String, Value>) {
        let result = serde_json::to_string_pretty(map)
            .map_err(std::io::Error::other)
            .and_then(|content| {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&self.path, content)
            });
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write storage file");
        }
    }
}

impl Storage for FileStorage {
    fn get_raw(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load().get(key).map(Value::to_string)
    }

    fn set_raw(&self, key: &str, value: String) {
        let parsed = match serde_json::from_str::<Value>(&value) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(value),
        };
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.load();
        map.insert(key.to_string(), parsed);
        self.save(&map);
    }

    fn remove(&self, key: &str) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.load();
        if map.remove(key).is_some() {
            self.save(&map);
        }
    }

    fn clear(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.save(&Map::new());
    }
}
