//! Online/offline and slow-connection tracking.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Read-only connection view for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
  pub is_online: bool,
  pub is_slow: bool,
  pub queue_size: usize,
  pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ConnectionState {
  is_online: bool,
  is_slow: bool,
  last_success_at: Option<DateTime<Utc>>,
}

/// Process-wide connection state.
///
/// `is_online` follows the external network signal. `is_slow` is a global
/// heuristic written by the executor: set when a call outlives the slow
/// threshold, cleared by the next completed attempt anywhere.
#[derive(Debug)]
pub struct ConnectionMonitor {
  state: Mutex<ConnectionState>,
}

impl ConnectionMonitor {
  pub fn new(initially_online: bool) -> Self {
    Self {
      state: Mutex::new(ConnectionState {
        is_online: initially_online,
        is_slow: false,
        last_success_at: None,
      }),
    }
  }

  fn state(&self) -> MutexGuard<'_, ConnectionState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn is_online(&self) -> bool {
    self.state().is_online
  }

  pub fn is_slow(&self) -> bool {
    self.state().is_slow
  }

  pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
    self.state().last_success_at
  }

  /// Apply an online/offline signal. Returns true if the state changed.
  pub fn set_online(&self, online: bool) -> bool {
    let mut state = self.state();
    if state.is_online == online {
      return false;
    }
    state.is_online = online;
    drop(state);

    if online {
      info!("connection restored");
    } else {
      info!("connection lost, mutations will be queued");
    }
    true
  }

  /// Flag the connection as slow. Returns true if it was not already flagged.
  pub fn mark_slow(&self) -> bool {
    let mut state = self.state();
    let newly_slow = !state.is_slow;
    state.is_slow = true;
    newly_slow
  }

  pub fn clear_slow(&self) {
    self.state().is_slow = false;
  }

  /// An attempt reached the server: clear the slow flag and stamp the time.
  pub fn record_response(&self) {
    let mut state = self.state();
    state.is_slow = false;
    state.last_success_at = Some(Utc::now());
  }

  pub fn snapshot(&self, queue_size: usize) -> ConnectionSnapshot {
    let state = self.state();
    ConnectionSnapshot {
      is_online: state.is_online,
      is_slow: state.is_slow,
      queue_size,
      last_success_at: state.last_success_at,
    }
  }

  /// Follow `signal` until its sender is dropped.
  ///
  /// On every offline→online transition `on_online` runs in its own task
  /// after `debounce`, provided the monitor is still online by then.
  pub fn spawn_watcher<F>(
    self: &Arc<Self>,
    mut signal: watch::Receiver<bool>,
    debounce: Duration,
    on_online: F,
  ) -> JoinHandle<()>
  where
    F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
  {
    let monitor = Arc::clone(self);
    let on_online = Arc::new(on_online);

    tokio::spawn(async move {
      loop {
        let online = *signal.borrow_and_update();
        if monitor.set_online(online) && online {
          let monitor = Arc::clone(&monitor);
          let on_online = Arc::clone(&on_online);
          tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if monitor.is_online() {
              on_online().await;
            } else {
              debug!("went offline again before replay");
            }
          });
        }

        if signal.changed().await.is_err() {
          break;
        }
      }

      warn!("network signal closed, connection state no longer tracked");
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::ManualSignal;
  use crate::net::NetworkSignal;
  use futures::FutureExt;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[test]
  fn test_set_online_reports_transitions() {
    let monitor = ConnectionMonitor::new(true);
    assert!(!monitor.set_online(true));
    assert!(monitor.set_online(false));
    assert!(!monitor.is_online());
    assert!(monitor.set_online(true));
  }

  #[test]
  fn test_slow_flag_lifecycle() {
    let monitor = ConnectionMonitor::new(true);
    assert!(monitor.mark_slow());
    assert!(!monitor.mark_slow());
    assert!(monitor.is_slow());
    assert!(monitor.last_success_at().is_none());

    monitor.record_response();
    assert!(!monitor.is_slow());
    assert!(monitor.last_success_at().is_some());
  }

  #[test]
  fn test_snapshot_serializes_camel_case() {
    let monitor = ConnectionMonitor::new(false);
    let snapshot = monitor.snapshot(2);
    assert_eq!(snapshot.queue_size, 2);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["isOnline"], false);
    assert_eq!(json["isSlow"], false);
    assert_eq!(json["queueSize"], 2);
    assert!(json["lastSuccessAt"].is_null());
  }

  fn counting_watcher(
    monitor: &Arc<ConnectionMonitor>,
    signal: &ManualSignal,
  ) -> (Arc<AtomicU32>, JoinHandle<()>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let handle = monitor.spawn_watcher(signal.subscribe(), Duration::from_secs(1), move || {
      let counter = Arc::clone(&counter);
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
      }
      .boxed()
    });
    (calls, handle)
  }

  #[tokio::test(start_paused = true)]
  async fn test_online_transition_fires_after_debounce() {
    let monitor = Arc::new(ConnectionMonitor::new(true));
    let signal = ManualSignal::new(false);
    let (calls, _handle) = counting_watcher(&monitor, &signal);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!monitor.is_online());

    signal.set_online(true);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(monitor.is_online());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_flapping_back_offline_skips_replay() {
    let monitor = Arc::new(ConnectionMonitor::new(false));
    let signal = ManualSignal::new(false);
    let (calls, _handle) = counting_watcher(&monitor, &signal);

    tokio::time::sleep(Duration::from_millis(10)).await;
    signal.set_online(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    signal.set_online(false);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!monitor.is_online());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_transition_does_not_fire() {
    let monitor = Arc::new(ConnectionMonitor::new(true));
    let signal = ManualSignal::new(true);
    let (calls, _handle) = counting_watcher(&monitor, &signal);

    tokio::time::sleep(Duration::from_millis(10)).await;
    signal.set_online(false);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!monitor.is_online());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
