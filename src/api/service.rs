//! Resource-level API facade combining cache, executor and offline queue.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::types::NewTask;
use crate::cache::{CacheKey, ResponseCache};
use crate::config::Config;
use crate::error::ApiError;
use crate::monitor::{ConnectionMonitor, ConnectionSnapshot};
use crate::net::{
  ApiRequest, ExecutionObserver, NetworkSignal, RequestExecutor, RetryPolicy, Silent, Transport,
};
use crate::queue::{ActionRunner, OfflineActionQueue, PendingAction, QueuedAction, ReplayReport};
use crate::store::DurableStore;

/// Entry point for every remote operation.
///
/// Reads are served from the response cache when possible. Mutations go
/// straight to the offline queue while offline, and fall back to it when all
/// attempts fail while online.
///
/// Construct once at the application root and share it behind an `Arc`.
pub struct ApiService {
  executor: RequestExecutor,
  cache: ResponseCache,
  queue: OfflineActionQueue,
  monitor: Arc<ConnectionMonitor>,
  ranking_window: Duration,
  replay_debounce: Duration,
}

impl ApiService {
  pub fn new(
    config: &Config,
    transport: Arc<dyn Transport>,
    store: Arc<dyn DurableStore>,
    initially_online: bool,
  ) -> Self {
    let monitor = Arc::new(ConnectionMonitor::new(initially_online));
    let executor = RequestExecutor::new(
      transport,
      Arc::clone(&monitor),
      RetryPolicy::from(&config.retry),
    );

    Self {
      executor,
      cache: ResponseCache::new(config.cache.ttl()),
      queue: OfflineActionQueue::load(store),
      monitor,
      ranking_window: config.cache.ranking_window(),
      replay_debounce: config.queue.replay_debounce(),
    }
  }

  pub fn cache(&self) -> &ResponseCache {
    &self.cache
  }

  /// Follow `signal` and replay the offline queue after each online transition.
  pub fn connect(self: &Arc<Self>, signal: &dyn NetworkSignal) -> JoinHandle<()> {
    let service = Arc::clone(self);
    self
      .monitor
      .spawn_watcher(signal.subscribe(), self.replay_debounce, move || {
        let service = Arc::clone(&service);
        async move {
          service.replay_queue().await;
        }
        .boxed()
      })
  }

  // ==========================================================================
  // Auth
  // ==========================================================================

  pub async fn login(
    &self,
    username: &str,
    password: &str,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    let body = json!({ "username": username, "password": password });
    self
      .executor
      .execute(&ApiRequest::post("/login", body), observer)
      .await
  }

  pub async fn health_check(&self, observer: &dyn ExecutionObserver) -> Result<Value, ApiError> {
    self
      .executor
      .execute(&ApiRequest::get("/health"), observer)
      .await
  }

  // ==========================================================================
  // Users
  // ==========================================================================

  pub async fn users(&self, observer: &dyn ExecutionObserver) -> Result<Value, ApiError> {
    self
      .cached_read(CacheKey::Users, ApiRequest::get("/users"), "users", observer)
      .await
  }

  pub async fn user(&self, user_id: u64, observer: &dyn ExecutionObserver) -> Result<Value, ApiError> {
    let payload = self
      .executor
      .execute(&ApiRequest::get(format!("/users/{}", user_id)), observer)
      .await?;
    take_field(payload, "user")
  }

  // ==========================================================================
  // Tasks
  // ==========================================================================

  /// Task list, optionally filtered by day of the week. An empty day means
  /// no filter.
  pub async fn tasks(
    &self,
    day: Option<&str>,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    let day = day.filter(|d| !d.is_empty());
    let mut request = ApiRequest::get("/tasks");
    if let Some(day) = day {
      request = request.with_query("day", day);
    }

    self
      .cached_read(CacheKey::tasks(day), request, "tasks", observer)
      .await
  }

  pub async fn task(&self, task_id: u64, observer: &dyn ExecutionObserver) -> Result<Value, ApiError> {
    let payload = self
      .executor
      .execute(&ApiRequest::get(format!("/tasks/{}", task_id)), observer)
      .await?;
    take_field(payload, "task")
  }

  pub async fn toggle_task(
    &self,
    task_id: u64,
    user_id: u64,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    self
      .mutate(PendingAction::ToggleTask { task_id, user_id }, observer)
      .await
  }

  pub async fn create_task(
    &self,
    task: NewTask,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    self.mutate(PendingAction::CreateTask { task }, observer).await
  }

  pub async fn update_task(
    &self,
    task_id: u64,
    changes: Value,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    self
      .mutate(PendingAction::UpdateTask { task_id, changes }, observer)
      .await
  }

  pub async fn delete_task(
    &self,
    task_id: u64,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    self.mutate(PendingAction::DeleteTask { task_id }, observer).await
  }

  // ==========================================================================
  // Stats
  // ==========================================================================

  pub async fn stats(&self, observer: &dyn ExecutionObserver) -> Result<Value, ApiError> {
    if let Some(cached) = self.cache.get(&CacheKey::Stats.to_string()) {
      return Ok(cached);
    }

    let payload = self
      .executor
      .execute(&ApiRequest::get("/stats"), observer)
      .await?;
    self.cache.set(CacheKey::Stats, payload.clone());
    Ok(payload)
  }

  /// Points ranking. Cached entries are only trusted within the ranking
  /// recency window, which is much shorter than the general ttl.
  pub async fn ranking(&self, observer: &dyn ExecutionObserver) -> Result<Value, ApiError> {
    let key = CacheKey::Ranking.to_string();
    if let Some(cached) = self.cache.get_within(&key, self.ranking_window) {
      return Ok(cached);
    }

    let payload = self
      .executor
      .execute(&ApiRequest::get("/ranking"), observer)
      .await?;
    self.cache.set(key, payload.clone());
    Ok(payload)
  }

  // ==========================================================================
  // Control
  // ==========================================================================

  /// Drop cached ranking and stats so the next read hits the server.
  pub fn invalidate_game_data(&self) {
    let removed = self.cache.invalidate(CacheKey::is_game_data);
    debug!(removed, "game data invalidated");
  }

  pub fn clear_cache(&self) {
    self.cache.clear();
  }

  pub fn clear_queue(&self) {
    self.queue.clear();
  }

  pub fn pending_actions(&self) -> Vec<QueuedAction> {
    self.queue.snapshot()
  }

  pub fn is_replaying(&self) -> bool {
    self.queue.is_processing()
  }

  /// Replay the offline queue now. `None` if a replay is already running.
  pub async fn replay_queue(&self) -> Option<ReplayReport> {
    self.queue.replay(self).await
  }

  pub fn status(&self) -> ConnectionSnapshot {
    self.monitor.snapshot(self.queue.len())
  }

  // ==========================================================================
  // Internals
  // ==========================================================================

  async fn cached_read(
    &self,
    key: CacheKey,
    request: ApiRequest,
    field: &str,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    let key = key.to_string();
    if let Some(cached) = self.cache.get(&key) {
      return Ok(cached);
    }

    let payload = self.executor.execute(&request, observer).await?;
    let data = take_field(payload, field)?;
    self.cache.set(key, data.clone());
    Ok(data)
  }

  async fn mutate(
    &self,
    action: PendingAction,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    if !self.monitor.is_online() {
      let queued = self.queue.enqueue(action);
      return Err(ApiError::OfflineQueued {
        action_id: queued.id,
      });
    }

    match self.execute_action(&action, observer).await {
      Ok(payload) => Ok(payload),
      Err(error) => {
        if self.executor.policy().is_retryable(&error) {
          let queued = self.queue.enqueue(action);
          info!(id = %queued.id, error = %error, "mutation failed, queued for replay");
        }
        Err(error)
      }
    }
  }

  /// Run `action` once through the executor and invalidate what it stales.
  async fn execute_action(
    &self,
    action: &PendingAction,
    observer: &dyn ExecutionObserver,
  ) -> Result<Value, ApiError> {
    let payload = self.executor.execute(&action.to_request(), observer).await?;
    let removed = self.cache.invalidate(CacheKey::is_task_dependent);
    debug!(kind = action.kind(), removed, "cache invalidated after mutation");
    Ok(payload)
  }
}

/// Replay runs the live mutation path without re-queueing.
#[async_trait]
impl ActionRunner for ApiService {
  async fn run(&self, action: &PendingAction) -> Result<Value, ApiError> {
    self.execute_action(action, &Silent).await
  }
}

/// Extract the resource field from a successful response body.
fn take_field(payload: Value, field: &str) -> Result<Value, ApiError> {
  match payload {
    Value::Object(mut body) => body
      .remove(field)
      .ok_or_else(|| ApiError::Decode(format!("response has no `{}` field", field))),
    _ => Err(ApiError::Decode(format!(
      "expected an object with `{}`",
      field
    ))),
  }
}
