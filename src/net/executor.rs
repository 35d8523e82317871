//! Bounded, timed, backed-off execution of one logical API call.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::events::{ExecutionEvent, ExecutionObserver};
use super::request::ApiRequest;
use super::transport::Transport;
use crate::config::RetryConfig;
use crate::error::ApiError;
use crate::monitor::ConnectionMonitor;

/// Attempt budget and timing for logical calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  /// Hard limit for a single attempt; the attempt is aborted when it elapses
  pub attempt_timeout: Duration,
  /// Backoff unit: the wait after failed attempt k is `base_delay * k`
  pub base_delay: Duration,
  /// Advisory per-call threshold after which the connection is flagged slow
  pub slow_threshold: Duration,
  pub retry_client_errors: bool,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from(&RetryConfig::default())
  }
}

impl From<&RetryConfig> for RetryPolicy {
  fn from(config: &RetryConfig) -> Self {
    Self {
      max_attempts: config.max_attempts.max(1),
      attempt_timeout: Duration::from_millis(config.timeout_ms),
      base_delay: Duration::from_millis(config.base_delay_ms),
      slow_threshold: Duration::from_millis(config.slow_threshold_ms),
      retry_client_errors: config.retry_client_errors,
    }
  }
}

impl RetryPolicy {
  /// Linear backoff, no jitter.
  pub fn backoff(&self, failed_attempt: u32) -> Duration {
    self.base_delay * failed_attempt
  }

  /// Whether `error` is worth another attempt (and, for mutations, a replay).
  pub fn is_retryable(&self, error: &ApiError) -> bool {
    match error {
      ApiError::Network(_) | ApiError::Timeout(_) => true,
      ApiError::HttpStatus { .. } => self.retry_client_errors || !error.is_client_error(),
      ApiError::OfflineQueued { .. } | ApiError::Decode(_) => false,
    }
  }
}

/// Runs logical calls as a sequence of attempts against a [`Transport`],
/// keeping the [`ConnectionMonitor`] up to date.
pub struct RequestExecutor {
  transport: Arc<dyn Transport>,
  monitor: Arc<ConnectionMonitor>,
  policy: RetryPolicy,
}

impl RequestExecutor {
  pub fn new(
    transport: Arc<dyn Transport>,
    monitor: Arc<ConnectionMonitor>,
    policy: RetryPolicy,
  ) -> Self {
    Self {
      transport,
      monitor,
      policy,
    }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Execute `request` with retries.
  ///
  /// The slow-connection timer spans the whole call, backoff waits included,
  /// and never cancels anything. The attempt timeout cancels only the
  /// in-flight attempt.
  pub async fn execute(
    &self,
    request: &ApiRequest,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    let attempts = self.run_attempts(request, observer);
    tokio::pin!(attempts);

    let slow_timer = tokio::time::sleep(self.policy.slow_threshold);
    tokio::pin!(slow_timer);
    let mut slow_reported = false;

    loop {
      tokio::select! {
        biased;
        result = &mut attempts => return result,
        _ = &mut slow_timer, if !slow_reported => {
          slow_reported = true;
          self.monitor.mark_slow();
          warn!(request = %request, threshold_ms = self.policy.slow_threshold.as_millis() as u64, "slow connection");
          observer.notify(ExecutionEvent::SlowConnection);
        }
      }
    }
  }

  async fn run_attempts(
    &self,
    request: &ApiRequest,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    let max_attempts = self.policy.max_attempts;
    let mut attempt = 1;

    loop {
      debug!(request = %request, attempt, max_attempts, "sending request");

      let outcome = match tokio::time::timeout(
        self.policy.attempt_timeout,
        self.transport.send(request),
      )
      .await
      {
        Ok(outcome) => outcome,
        Err(_) => Err(ApiError::Timeout(self.policy.attempt_timeout)),
      };

      let error = match outcome {
        Ok(payload) => {
          self.monitor.record_response();
          observer.notify(ExecutionEvent::Succeeded {
            attempt,
            payload: payload.clone(),
          });
          return Ok(payload);
        }
        Err(error) => error,
      };

      // The server answered, so the link itself is fine
      if matches!(error, ApiError::HttpStatus { .. }) {
        self.monitor.record_response();
      }

      if attempt >= max_attempts || !self.policy.is_retryable(&error) {
        self.monitor.clear_slow();
        warn!(request = %request, attempts = attempt, error = %error, "request failed");
        observer.notify(ExecutionEvent::Failed {
          attempts: attempt,
          error: error.clone(),
        });
        return Err(error);
      }

      let delay = self.policy.backoff(attempt);
      warn!(request = %request, attempt, error = %error, delay_ms = delay.as_millis() as u64, "attempt failed, retrying");
      observer.notify(ExecutionEvent::Retry {
        attempt,
        delay,
        error,
      });
      tokio::time::sleep(delay).await;
      attempt += 1;
    }
  }
}
