//! Durable key-value storage used to keep the offline queue across restarts.

mod sqlite;

use color_eyre::Result;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub use sqlite::SqliteStore;

/// Persistent text storage keyed by string.
///
/// The queue is the only writer, so implementations need no coordination
/// beyond making each call atomic.
pub trait DurableStore: Send + Sync {
  /// Read the value stored under `key`.
  fn load(&self, key: &str) -> Result<Option<String>>;

  /// Replace the value stored under `key`.
  fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// Store that lives only as long as the process. Used in tests and when no
/// durable location is available.
#[derive(Debug, Default)]
pub struct MemoryStore {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl DurableStore for MemoryStore {
  fn load(&self, key: &str) -> Result<Option<String>> {
    let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(values.get(key).cloned())
  }

  fn save(&self, key: &str, value: &str) -> Result<()> {
    let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
    values.insert(key.to_string(), value.to_string());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_memory_store_roundtrip() {
    let store = MemoryStore::new();
    assert_eq!(store.load("offline_queue").unwrap(), None);

    store.save("offline_queue", "[]").unwrap();
    store.save("offline_queue", "[1]").unwrap();
    assert_eq!(store.load("offline_queue").unwrap().as_deref(), Some("[1]"));
  }
}
