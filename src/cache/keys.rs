//! Cache key naming for the task board resources.

use std::fmt;

/// Keys under which read responses are cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheKey {
  /// All users
  Users,
  /// Task list, optionally filtered by day
  Tasks { day: Option<String> },
  /// General statistics
  Stats,
  /// Points ranking
  Ranking,
}

const TASKS_PREFIX: &str = "tasks_";

impl CacheKey {
  pub fn tasks(day: Option<&str>) -> Self {
    Self::Tasks {
      day: day.map(String::from),
    }
  }

  /// True if a successful task mutation can make `key` stale.
  ///
  /// Any task change moves points around, so besides every task list the
  /// derived `ranking` and `stats` keys go too.
  pub fn is_task_dependent(key: &str) -> bool {
    key.starts_with(TASKS_PREFIX)
      || key == CacheKey::Ranking.to_string()
      || key == CacheKey::Stats.to_string()
  }

  /// Keys holding gamification aggregates.
  pub fn is_game_data(key: &str) -> bool {
    key == CacheKey::Ranking.to_string() || key == CacheKey::Stats.to_string()
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Users => f.write_str("users"),
      Self::Tasks { day } => write!(f, "{}{}", TASKS_PREFIX, day.as_deref().unwrap_or("all")),
      Self::Stats => f.write_str("stats"),
      Self::Ranking => f.write_str("ranking"),
    }
  }
}

impl From<CacheKey> for String {
  fn from(key: CacheKey) -> Self {
    key.to_string()
  }
}
