//! Named-object registry for cross-component handoff.
//!
//! Entries are typed: `get::<T>` on a key holding another type is an error,
//! never a silent default.

use std::any::{Any, type_name};
use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Result, VisionError};

type Entry = Box<dyn Any + Send + Sync>;

/// Process-wide key/value store with typed access.
#[derive(Default)]
pub struct Datastore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Datastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new entry. Fails if the key already exists.
    pub fn make<T: Any + Send + Sync>(&self, key: &str, value: T) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(VisionError::Datastore(format!(
                "key \"{}\" already exists",
                key
            )));
        }
        entries.insert(key.to_string(), Box::new(value));
        Ok(())
    }

    /// Replace the value of an existing entry of the same type, or create it.
    pub fn assign<T: Any + Send + Sync>(&self, key: &str, value: T) -> Result<()> {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(existing) => match existing.downcast_mut::<T>() {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(type_mismatch::<T>(key)),
            },
            None => {
                entries.insert(key.to_string(), Box::new(value));
                Ok(())
            }
        }
    }

    /// Copy of the value stored under `key`.
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Result<T> {
        let entries = self.entries.read();
        let entry = entries
            .get(key)
            .ok_or_else(|| VisionError::NotFound(format!("datastore key \"{}\"", key)))?;
        entry
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| type_mismatch::<T>(key))
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Remove an entry, returning whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("keys", &self.keys())
            .finish()
    }
}

fn type_mismatch<T>(key: &str) -> VisionError {
    VisionError::Datastore(format!(
        "key \"{}\" does not hold a {}",
        key,
        type_name::<T>()
    ))
}
