//! Durable queue of mutations deferred while offline, with sequential replay.
//!
//! The queue is mirrored to a [`DurableStore`] after every append or removal,
//! as a JSON array under [`QUEUE_STORAGE_KEY`]. Replay walks the actions in
//! enqueue order, removes each one that succeeds and leaves failures in place
//! (at-least-once).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::api::NewTask;
use crate::error::ApiError;
use crate::net::{ApiRequest, RequestExecutor, Silent};
use crate::store::DurableStore;

/// Storage key holding the serialized queue.
pub const QUEUE_STORAGE_KEY: &str = "offline_queue";

/// A deferred mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingAction {
  #[serde(rename_all = "camelCase")]
  ToggleTask { task_id: u64, user_id: u64 },
  CreateTask { task: NewTask },
  #[serde(rename_all = "camelCase")]
  UpdateTask { task_id: u64, changes: Value },
  #[serde(rename_all = "camelCase")]
  DeleteTask { task_id: u64 },
}

impl PendingAction {
  /// Tag stored in the `type` field.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::ToggleTask { .. } => "toggle_task",
      Self::CreateTask { .. } => "create_task",
      Self::UpdateTask { .. } => "update_task",
      Self::DeleteTask { .. } => "delete_task",
    }
  }

  /// The API call that performs this action.
  pub fn to_request(&self) -> ApiRequest {
    match self {
      Self::ToggleTask { task_id, user_id } => ApiRequest::post(
        format!("/tasks/{}/toggle", task_id),
        json!({ "user_id": user_id }),
      ),
      Self::CreateTask { task } => ApiRequest::post("/tasks", json!(task)),
      Self::UpdateTask { task_id, changes } => {
        ApiRequest::put(format!("/tasks/{}", task_id), changes.clone())
      }
      Self::DeleteTask { task_id } => ApiRequest::delete(format!("/tasks/{}", task_id)),
    }
  }
}

/// A [`PendingAction`] as stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
  pub id: String,
  #[serde(flatten)]
  pub action: PendingAction,
  #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
  pub enqueued_at: DateTime<Utc>,
}

/// Performs one deferred action during replay.
#[async_trait]
pub trait ActionRunner: Send + Sync {
  async fn run(&self, action: &PendingAction) -> Result<Value, ApiError>;
}

#[async_trait]
impl ActionRunner for RequestExecutor {
  async fn run(&self, action: &PendingAction) -> Result<Value, ApiError> {
    self.execute(&action.to_request(), &Silent).await
  }
}

/// Result of replaying one action.
#[derive(Debug, Clone)]
pub enum ReplayOutcome {
  Replayed { action: QueuedAction, payload: Value },
  Failed { action: QueuedAction, error: ApiError },
}

impl ReplayOutcome {
  pub fn action(&self) -> &QueuedAction {
    match self {
      Self::Replayed { action, .. } | Self::Failed { action, .. } => action,
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Self::Replayed { .. })
  }
}

/// Per-action outcomes of one replay pass, in replay order.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
  pub outcomes: Vec<ReplayOutcome>,
}

impl ReplayReport {
  pub fn succeeded(&self) -> usize {
    self.outcomes.iter().filter(|o| o.is_success()).count()
  }

  pub fn failed(&self) -> usize {
    self.outcomes.len() - self.succeeded()
  }

  pub fn is_empty(&self) -> bool {
    self.outcomes.is_empty()
  }
}

/// Resets the processing flag when a replay pass ends, however it ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for ProcessingGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

pub struct OfflineActionQueue {
  store: Arc<dyn DurableStore>,
  actions: Mutex<Vec<QueuedAction>>,
  processing: AtomicBool,
}

impl OfflineActionQueue {
  /// Restore the queue from `store`. Missing or unreadable data yields an
  /// empty queue; individual malformed entries are dropped.
  pub fn load(store: Arc<dyn DurableStore>) -> Self {
    let actions = match store.load(QUEUE_STORAGE_KEY) {
      Ok(Some(text)) => parse_queue(&text),
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!(error = %e, "failed to read offline queue, starting empty");
        Vec::new()
      }
    };

    if !actions.is_empty() {
      info!(count = actions.len(), "restored offline queue");
    }

    Self {
      store,
      actions: Mutex::new(actions),
      processing: AtomicBool::new(false),
    }
  }

  fn actions(&self) -> MutexGuard<'_, Vec<QueuedAction>> {
    self.actions.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Write the current queue through to the store. The in-memory queue stays
  /// authoritative if that fails.
  ///
  /// Callers hold the queue lock while this runs so the store never sees an
  /// older snapshot overwrite a newer one. The store call is blocking; the
  /// queue is the only writer of its key and a save is a single small row.
  fn persist(&self, actions: &[QueuedAction]) {
    let text = match serde_json::to_string(actions) {
      Ok(text) => text,
      Err(e) => {
        warn!(error = %e, "failed to serialize offline queue");
        return;
      }
    };

    if let Err(e) = self.store.save(QUEUE_STORAGE_KEY, &text) {
      warn!(error = %e, "failed to persist offline queue");
    }
  }

  /// Append `action` with a fresh id and the current time.
  pub fn enqueue(&self, action: PendingAction) -> QueuedAction {
    let queued = QueuedAction {
      id: uuid::Uuid::new_v4().simple().to_string(),
      action,
      enqueued_at: Utc::now(),
    };

    let mut actions = self.actions();
    actions.push(queued.clone());
    self.persist(&actions);

    info!(id = %queued.id, kind = queued.action.kind(), queue_size = actions.len(), "action queued");
    queued
  }

  fn remove(&self, id: &str) {
    let mut actions = self.actions();
    actions.retain(|a| a.id != id);
    self.persist(&actions);
  }

  pub fn len(&self) -> usize {
    self.actions().len()
  }

  pub fn is_empty(&self) -> bool {
    self.actions().is_empty()
  }

  /// Copy of the queued actions in enqueue order.
  pub fn snapshot(&self) -> Vec<QueuedAction> {
    self.actions().clone()
  }

  pub fn clear(&self) {
    let mut actions = self.actions();
    actions.clear();
    self.persist(&actions);
    info!("offline queue cleared");
  }

  pub fn is_processing(&self) -> bool {
    self.processing.load(Ordering::Acquire)
  }

  /// Replay every queued action once, in enqueue order.
  ///
  /// Returns `None` without doing anything if another pass is already
  /// running. A failed action stays where it is and the pass moves on.
  pub async fn replay(&self, runner: &dyn ActionRunner) -> Option<ReplayReport> {
    let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
      debug!("replay already in progress");
      return None;
    };

    let pending = self.snapshot();
    let mut report = ReplayReport::default();
    if pending.is_empty() {
      return Some(report);
    }

    info!(count = pending.len(), "replaying offline queue");

    for queued in pending {
      match runner.run(&queued.action).await {
        Ok(payload) => {
          self.remove(&queued.id);
          debug!(id = %queued.id, kind = queued.action.kind(), "replayed action");
          report.outcomes.push(ReplayOutcome::Replayed {
            action: queued,
            payload,
          });
        }
        Err(error) => {
          warn!(id = %queued.id, kind = queued.action.kind(), error = %error, "replay failed, keeping action");
          report.outcomes.push(ReplayOutcome::Failed {
            action: queued,
            error,
          });
        }
      }
    }

    info!(
      succeeded = report.succeeded(),
      failed = report.failed(),
      remaining = self.len(),
      "offline queue processed"
    );
    Some(report)
  }
}

fn parse_queue(text: &str) -> Vec<QueuedAction> {
  let entries: Vec<Value> = match serde_json::from_str(text) {
    Ok(entries) => entries,
    Err(e) => {
      warn!(error = %e, "offline queue data is not a JSON array, discarding");
      return Vec::new();
    }
  };

  entries
    .into_iter()
    .filter_map(|entry| match serde_json::from_value::<QueuedAction>(entry) {
      Ok(action) => Some(action),
      Err(e) => {
        warn!(error = %e, "discarding malformed queued action");
        None
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::monitor::ConnectionMonitor;
  use crate::net::RetryPolicy;
  use crate::store::MemoryStore;
  use crate::testing::{server_error, ScriptedTransport, Step};
  use std::time::Duration;

  fn toggle(task_id: u64, user_id: u64) -> PendingAction {
    PendingAction::ToggleTask { task_id, user_id }
  }

  fn stored(store: &MemoryStore) -> Vec<Value> {
    let text = store.load(QUEUE_STORAGE_KEY).unwrap().unwrap();
    serde_json::from_str(&text).unwrap()
  }

  fn executor(steps: Vec<Step>) -> (RequestExecutor, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new(steps));
    let policy = RetryPolicy {
      max_attempts: 1,
      ..RetryPolicy::default()
    };
    let executor = RequestExecutor::new(
      transport.clone(),
      Arc::new(ConnectionMonitor::new(true)),
      policy,
    );
    (executor, transport)
  }

  #[test]
  fn test_enqueue_persists_record_format() {
    let store = Arc::new(MemoryStore::new());
    let queue = OfflineActionQueue::load(store.clone());

    let queued = queue.enqueue(toggle(4, 2));

    assert_eq!(queue.len(), 1);
    let records = stored(&store);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], queued.id.as_str());
    assert_eq!(records[0]["type"], "toggle_task");
    assert_eq!(records[0]["taskId"], 4);
    assert_eq!(records[0]["userId"], 2);
    assert!(records[0]["timestamp"].is_i64());
  }

  #[test]
  fn test_ids_are_unique() {
    let queue = OfflineActionQueue::load(Arc::new(MemoryStore::new()));
    let a = queue.enqueue(toggle(1, 1));
    let b = queue.enqueue(toggle(1, 1));
    assert_ne!(a.id, b.id);
  }

  #[test]
  fn test_queue_survives_reload() {
    let store = Arc::new(MemoryStore::new());
    {
      let queue = OfflineActionQueue::load(store.clone());
      queue.enqueue(toggle(1, 9));
      queue.enqueue(PendingAction::DeleteTask { task_id: 3 });
    }

    let restored = OfflineActionQueue::load(store);
    let actions: Vec<PendingAction> = restored.snapshot().into_iter().map(|q| q.action).collect();
    assert_eq!(
      actions,
      vec![toggle(1, 9), PendingAction::DeleteTask { task_id: 3 }]
    );
  }

  #[test]
  fn test_malformed_entries_are_discarded() {
    let store = Arc::new(MemoryStore::new());
    store
      .save(
        QUEUE_STORAGE_KEY,
        r#"[
          {"id": "a", "type": "toggle_task", "taskId": 1, "userId": 2, "timestamp": 1700000000000},
          {"id": "b", "type": "launch_rocket", "timestamp": 1700000000000},
          "garbage",
          {"id": "c", "type": "delete_task", "taskId": 5, "timestamp": 1700000000001}
        ]"#,
      )
      .unwrap();

    let queue = OfflineActionQueue::load(store);
    let ids: Vec<String> = queue.snapshot().into_iter().map(|q| q.id).collect();
    assert_eq!(ids, vec!["a", "c"]);
  }

  #[test]
  fn test_unparsable_data_is_empty_queue() {
    let store = Arc::new(MemoryStore::new());
    store.save(QUEUE_STORAGE_KEY, "{not json").unwrap();
    assert!(OfflineActionQueue::load(store).is_empty());
  }

  #[test]
  fn test_action_requests() {
    let toggle = toggle(7, 3).to_request();
    assert_eq!(toggle.method, reqwest::Method::POST);
    assert_eq!(toggle.path, "/tasks/7/toggle");
    assert_eq!(toggle.body, Some(json!({"user_id": 3})));

    let create = PendingAction::CreateTask {
      task: NewTask {
        day: "Segunda".into(),
        task_name: "Lavar louça".into(),
        assigned_user_id: 2,
      },
    }
    .to_request();
    assert_eq!(create.path, "/tasks");
    assert_eq!(create.body.unwrap()["task_name"], "Lavar louça");

    let delete = PendingAction::DeleteTask { task_id: 5 }.to_request();
    assert_eq!(delete.method, reqwest::Method::DELETE);
    assert!(delete.body.is_none());
  }

  #[tokio::test]
  async fn test_replay_empty_queue_does_nothing() {
    let queue = OfflineActionQueue::load(Arc::new(MemoryStore::new()));
    let (executor, transport) = executor(vec![]);

    let report = queue.replay(&executor).await.unwrap();

    assert!(report.is_empty());
    assert_eq!(transport.request_count(), 0);
    assert!(!queue.is_processing());
  }

  #[tokio::test]
  async fn test_replay_keeps_failed_action_in_place() {
    let store = Arc::new(MemoryStore::new());
    let queue = OfflineActionQueue::load(store.clone());
    queue.enqueue(toggle(1, 1));
    let b = queue.enqueue(toggle(2, 1));
    queue.enqueue(toggle(3, 1));

    let (executor, transport) = executor(vec![
      Step::Respond(json!({"ok": true})),
      Step::Fail(server_error()),
      Step::Respond(json!({"ok": true})),
    ]);

    let report = queue.replay(&executor).await.unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.outcomes[1].action().id, b.id);
    assert_eq!(transport.request_count(), 3);

    assert_eq!(queue.snapshot(), vec![b.clone()]);
    let records = stored(&store);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], b.id.as_str());
  }

  #[tokio::test]
  async fn test_replay_preserves_enqueue_order() {
    let queue = OfflineActionQueue::load(Arc::new(MemoryStore::new()));
    queue.enqueue(toggle(10, 1));
    queue.enqueue(PendingAction::DeleteTask { task_id: 11 });
    queue.enqueue(toggle(12, 1));
    let (executor, transport) = executor(vec![]);

    queue.replay(&executor).await.unwrap();

    let paths: Vec<String> = transport.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/tasks/10/toggle", "/tasks/11", "/tasks/12/toggle"]);
    assert!(queue.is_empty());
  }

  #[test]
  fn test_concurrent_enqueues_all_reach_the_store() {
    let store = Arc::new(MemoryStore::new());
    let queue = OfflineActionQueue::load(store.clone());

    std::thread::scope(|s| {
      for user_id in 0..8 {
        let queue = &queue;
        s.spawn(move || {
          for task_id in 0..5 {
            queue.enqueue(toggle(task_id, user_id));
          }
        });
      }
    });

    assert_eq!(queue.len(), 40);
    assert_eq!(stored(&store).len(), 40);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_replay_is_single_flight() {
    let queue = OfflineActionQueue::load(Arc::new(MemoryStore::new()));
    queue.enqueue(toggle(1, 1));
    let (executor, transport) = executor(vec![Step::Stall(Duration::from_secs(1), json!({}))]);

    let (first, second) = tokio::join!(queue.replay(&executor), async {
      assert!(queue.is_processing());
      queue.replay(&executor).await
    });

    assert_eq!(first.map(|r| r.succeeded()), Some(1));
    assert!(second.is_none());
    assert_eq!(transport.request_count(), 1);
    assert!(!queue.is_processing());
  }
}
