//! Named pose sources sampled by the host's data logger.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::core::Transform;

/// Callback returning the current value of a logged pose
pub type TransformSource = Box<dyn Fn() -> Transform + Send + Sync>;

/// Host logging facility: components register named sources, the host
/// samples them once per control cycle.
pub trait Logger: Send + Sync {
    /// Add or replace the entry `name`.
    fn add_log_entry(&self, name: &str, source: TransformSource);
    fn remove_log_entry(&self, name: &str);
}

/// In-process [`Logger`] keeping sources in name order.
#[derive(Default)]
pub struct LogTable {
    entries: RwLock<BTreeMap<String, TransformSource>>,
}

impl LogTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Evaluate every source.
    pub fn sample(&self) -> Vec<(String, Transform)> {
        self.entries
            .read()
            .iter()
            .map(|(name, source)| (name.clone(), source()))
            .collect()
    }
}

impl Logger for LogTable {
    fn add_log_entry(&self, name: &str, source: TransformSource) {
        self.entries.write().insert(name.to_string(), source);
    }

    fn remove_log_entry(&self, name: &str) {
        self.entries.write().remove(name);
    }
}

impl std::fmt::Debug for LogTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogTable")
            .field("entries", &self.names())
            .finish()
    }
}
