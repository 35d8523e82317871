//! Fakes shared by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::ApiError;
use crate::net::{ApiRequest, ExecutionEvent, ExecutionObserver, Transport};

/// What the scripted transport does for one request.
pub enum Step {
  Respond(Value),
  Fail(ApiError),
  /// Wait before responding; long enough stalls hit the executor timeout.
  Stall(Duration, Value),
}

/// Transport that plays back a fixed script and records every request.
/// Once the script runs out it answers `{}`.
pub struct ScriptedTransport {
  steps: Mutex<VecDeque<Step>>,
  requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
  pub fn new(steps: Vec<Step>) -> Self {
    Self {
      steps: Mutex::new(steps.into()),
      requests: Mutex::new(Vec::new()),
    }
  }

  pub fn requests(&self) -> Vec<ApiRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn request_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn push(&self, step: Step) {
    self.steps.lock().unwrap().push_back(step);
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError> {
    self.requests.lock().unwrap().push(request.clone());
    let step = self.steps.lock().unwrap().pop_front();

    match step {
      Some(Step::Respond(value)) => Ok(value),
      Some(Step::Fail(error)) => Err(error),
      Some(Step::Stall(delay, value)) => {
        tokio::time::sleep(delay).await;
        Ok(value)
      }
      None => Ok(json!({})),
    }
  }
}

/// Observer that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
  events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingObserver {
  pub fn events(&self) -> Vec<ExecutionEvent> {
    self.events.lock().unwrap().clone()
  }

  pub fn retries(&self) -> Vec<(u32, Duration)> {
    self
      .events()
      .into_iter()
      .filter_map(|event| match event {
        ExecutionEvent::Retry { attempt, delay, .. } => Some((attempt, delay)),
        _ => None,
      })
      .collect()
  }

  pub fn count<F>(&self, predicate: F) -> usize
  where
    F: Fn(&ExecutionEvent) -> bool,
  {
    self.events().iter().filter(|event| predicate(event)).count()
  }
}

impl ExecutionObserver for RecordingObserver {
  fn notify(&self, event: ExecutionEvent) {
    self.events.lock().unwrap().push(event);
  }
}

pub fn server_error() -> ApiError {
  ApiError::HttpStatus {
    status: 500,
    message: "Internal Server Error".into(),
  }
}
