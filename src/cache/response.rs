//! Time-to-live cache for read responses.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A cached read response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub payload: Value,
  pub stored_at: Instant,
}

impl CacheEntry {
  fn age(&self) -> Duration {
    self.stored_at.elapsed()
  }
}

/// In-memory response cache keyed by resource name.
///
/// Entries are valid while `now - stored_at < ttl`. Reading an expired entry
/// removes it. There is no size bound; the key space is limited to the
/// resources the facade knows about.
pub struct ResponseCache {
  entries: Mutex<HashMap<String, CacheEntry>>,
  /// How long before cached data is considered stale
  ttl: Duration,
}

impl ResponseCache {
  pub fn new(ttl: Duration) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      ttl,
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Look up `key`, evicting it if it has outlived the ttl.
  pub fn get(&self, key: &str) -> Option<Value> {
    let mut entries = self.entries();
    let entry = entries.get(key)?;

    if entry.age() >= self.ttl {
      entries.remove(key);
      debug!(key, "cache expired");
      return None;
    }

    debug!(key, "cache hit");
    Some(entry.payload.clone())
  }

  /// Look up `key` but only accept it if it was stored within `window`.
  ///
  /// An entry older than `window` but younger than the ttl is left in place;
  /// only ttl expiry evicts.
  pub fn get_within(&self, key: &str, window: Duration) -> Option<Value> {
    let payload = self.get(key)?;
    let age = self.entries().get(key).map(CacheEntry::age)?;

    if age < window {
      Some(payload)
    } else {
      debug!(key, age_ms = age.as_millis() as u64, "cache entry outside recency window");
      None
    }
  }

  /// Insert or overwrite `key`, resetting its timestamp.
  pub fn set(&self, key: impl Into<String>, payload: Value) {
    let key = key.into();
    debug!(key = %key, "cache updated");
    self.entries().insert(
      key,
      CacheEntry {
        payload,
        stored_at: Instant::now(),
      },
    );
  }

  /// Remove every entry whose key matches `predicate`. Returns how many were removed.
  pub fn invalidate<P>(&self, predicate: P) -> usize
  where
    P: Fn(&str) -> bool,
  {
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|key, _| {
      let hit = predicate(key);
      if hit {
        debug!(key = %key, "cache invalidated");
      }
      !hit
    });
    before - entries.len()
  }

  pub fn clear(&self) {
    self.entries().clear();
    debug!("cache cleared");
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }
}
