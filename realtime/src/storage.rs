//! Session-scoped key/value storage backing the cursor store.
//!
//! Backends may fail (read-only disks, corrupt files); callers that must never
//! fail wrap them, see [`crate::cursor::CursorStore`].

use crate::error::{storage_error, Error, StorageErrorKind};
use crate::lock;
use log::*;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, Error>;
    fn set(&self, key: &str, value: &str) -> Result<(), Error>;
}

/// Process-scoped storage; its lifetime matches one client session.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Storage persisted as a single JSON object file.
///
/// Every `set` rewrites the whole file, which lets a restarted process resume
/// from the cursor a previous run left behind.
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, Error> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            _ => Err(storage_error(
                StorageErrorKind::Corrupt,
                "session file does not contain a JSON object",
            )),
        }
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let values = self.read_all()?;
        Ok(values.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let _guard = lock(&self.write_lock);

        let mut values = self.read_all().unwrap_or_else(|e| {
            warn!(
                "Discarding unreadable session file {}: {e}",
                self.path.display()
            );
            Map::new()
        });
        values.insert(key.to_string(), Value::String(value.to_string()));

        let serialized = serde_json::to_string_pretty(&Value::Object(values))?;
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }
}
