use serde::{Deserialize, Serialize};

/// Body for creating a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
  /// Day of the week the task belongs to
  pub day: String,
  pub task_name: String,
  pub assigned_user_id: u64,
}
