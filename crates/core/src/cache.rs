//! Session Cache Store
//!
//! A durable mapping from string keys to JSON values. Every stage consults the
//! cache before doing expensive work and writes its result back afterwards,
//! which is what makes an interrupted run resumable.
//!
//! The store has no expiry, size bound or locking. Entries are keyed by step
//! index and stage name only, so a cached result survives prompt or schema
//! changes until the entry is removed by hand (`clear-cache`).

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Errors raised by a cache backend. Write failures are never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cached value for '{key}' does not match the expected shape: {source}")]
    Shape {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The cache port handed to every stage.
///
/// `set` is a synchronous, durable write: when it returns `Ok` the value is
/// on disk (or wherever the implementation keeps it).
pub trait CacheStore: Send {
    fn get(&self, key: &str) -> Option<Value>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), CacheError>;

    /// Removes a key, returning whether it was present.
    fn remove(&mut self, key: &str) -> Result<bool, CacheError>;

    /// Removes every key.
    fn clear(&mut self) -> Result<(), CacheError>;
}

/// Typed helpers over any [`CacheStore`].
pub trait CacheExt: CacheStore {
    /// Reads and deserializes `key`. An absent key is `Ok(None)`; a present
    /// value of the wrong shape is an error.
    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| CacheError::Shape {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn store<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), CacheError> {
        let value = serde_json::to_value(value).map_err(|source| CacheError::Shape {
            key: key.to_string(),
            source,
        })?;
        self.set(key, value)
    }
}

impl<C: CacheStore + ?Sized> CacheExt for C {}

/// Cache key scheme. These names are persisted, so changing them breaks
/// resumption of existing sessions.
pub mod keys {
    pub const CURRICULUM: &str = "curriculum";
    pub const CURRENT_STEP_INDEX: &str = "current_step_index";

    pub fn script(step: usize) -> String {
        format!("step_{step}_script")
    }

    pub fn storyboard(step: usize) -> String {
        format!("step_{step}_storyboard")
    }

    pub fn critic(step: usize) -> String {
        format!("step_{step}_critic")
    }

    pub fn audio_metadata(step: usize) -> String {
        format!("step_{step}_audio_metadata")
    }

    pub fn manim_code(step: usize, iteration: u32) -> String {
        format!("step_{step}_manim_code_{iteration}")
    }

    pub fn code_critic(step: usize, iteration: u32) -> String {
        format!("step_{step}_code_critic_{iteration}")
    }

    pub fn mp4_file_path(step: usize) -> String {
        format!("step_{step}_mp4_file_path")
    }
}

/// A cache persisted as one pretty-printed JSON object.
///
/// The whole document is loaded on open and rewritten on every change, via
/// a temporary sibling file that is renamed over the original.
#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl JsonFileCache {
    /// Opens the cache at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| CacheError::Corrupt {
                path: path.clone(),
                source,
            })?
        } else {
            Map::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "Cache loaded");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flush(&self) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };
        let serialized = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            CacheError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, serialized).map_err(io_err)?;
        std::fs::rename(&temp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl CacheStore for JsonFileCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<bool, CacheError> {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.flush()?;
        }
        Ok(existed)
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        self.flush()
    }
}

/// A non-durable cache, for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryCache {
    entries: HashMap<String, Value>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}
