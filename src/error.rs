//! Error taxonomy for the network core.

use std::time::Duration;

/// Failure of a logical API operation.
///
/// `Network`, `Timeout` and `HttpStatus` are attempt-level failures that the
/// executor retries internally. Only the last one is ever surfaced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
  /// Transport failure: connection refused, reset, DNS, unreadable body.
  #[error("network error: {0}")]
  Network(String),

  /// The attempt exceeded the hard per-attempt timeout and was aborted.
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  /// The server answered with a non-2xx status.
  #[error("{message} (HTTP {status})")]
  HttpStatus { status: u16, message: String },

  /// Mutation was deferred because the client is offline. The action is
  /// accepted and pending replay.
  #[error("offline: action {action_id} saved for replay when back online")]
  OfflineQueued { action_id: String },

  /// A successful response did not contain the expected resource.
  #[error("unexpected response: {0}")]
  Decode(String),
}

impl ApiError {
  /// HTTP status carried by the error, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::HttpStatus { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// True for 4xx statuses that repeating the same request cannot fix.
  /// Request Timeout (408) and Too Many Requests (429) are excluded.
  pub fn is_client_error(&self) -> bool {
    matches!(self.status(), Some(s) if (400..500).contains(&s) && s != 408 && s != 429)
  }

  pub fn is_offline_queued(&self) -> bool {
    matches!(self, ApiError::OfflineQueued { .. })
  }
}
