//! Progress notifications emitted while a logical call runs.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::ApiError;

/// Something that happened during one logical call.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
  /// Attempt `attempt` failed; the next one starts after `delay`.
  Retry {
    attempt: u32,
    delay: Duration,
    error: ApiError,
  },
  /// The call has been running longer than the slow-connection threshold.
  /// Emitted at most once per call.
  SlowConnection,
  /// Attempt `attempt` succeeded.
  Succeeded { attempt: u32, payload: Value },
  /// The last allowed attempt failed with `error`.
  Failed { attempts: u32, error: ApiError },
}

/// Receives [`ExecutionEvent`]s synchronously, in the order they happen.
///
/// Every operation takes an observer explicitly; pass [`Silent`] to ignore them.
pub trait ExecutionObserver: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// Observer that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl ExecutionObserver for Silent {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Forward events to another task, e.g. a status line renderer.
impl ExecutionObserver for mpsc::UnboundedSender<ExecutionEvent> {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may be gone
    let _ = self.send(event);
  }
}
