use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use tasklink::net::{ExecutionEvent, HttpTransport, ProbeSignal, Transport};
use tasklink::queue::ReplayOutcome;
use tasklink::store::SqliteStore;
use tasklink::{ApiError, ApiService, Config, NewTask};

#[derive(Parser, Debug)]
#[command(name = "tasklink")]
#[command(about = "Offline-aware client for the household task board")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tasklink/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Start offline: mutations are queued instead of sent
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Check that the API is reachable
  Health,
  /// Log in (password read from TASKLINK_PASSWORD)
  Login { username: String },
  /// List users
  Users,
  /// Show one user
  User { id: u64 },
  /// List tasks, optionally for one day
  Tasks {
    #[arg(short, long)]
    day: Option<String>,
  },
  /// Show one task
  Task { id: u64 },
  /// Mark a task done or undone
  Toggle {
    task: u64,
    #[arg(short, long)]
    user: u64,
  },
  /// Create a task
  Create {
    #[arg(long)]
    day: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    assignee: u64,
  },
  /// Update a task with a JSON object of changed fields
  Update {
    id: u64,
    #[arg(long)]
    json: String,
  },
  /// Delete a task
  Delete { id: u64 },
  /// General statistics
  Stats,
  /// Points ranking
  Ranking,
  /// Connection status
  Status,
  /// List actions waiting for replay
  Queue,
  /// Replay queued actions now
  Replay,
  /// Drop all queued actions
  ClearQueue,
  /// Track connectivity and replay the queue on reconnect until Ctrl-C
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging()?;

  let config = Config::load(args.config.as_deref())?;

  let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.api.url)?);
  let store = match &config.queue.path {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  };
  let service = Arc::new(ApiService::new(
    &config,
    Arc::clone(&transport),
    Arc::new(store),
    !args.offline,
  ));

  // Progress notices go to stderr so stdout stays clean JSON
  let (events_tx, events_rx) = mpsc::unbounded_channel();
  let printer = tokio::spawn(print_events(events_rx));

  let result = run(args, &config, &service, transport, &events_tx).await;

  drop(events_tx);
  if let Err(e) = printer.await {
    warn!(error = %e, "event printer task failed");
  }

  if let Err(e) = &result {
    if let Some(ApiError::OfflineQueued { action_id }) = e.downcast_ref::<ApiError>() {
      eprintln!("offline: saved as {} and will be sent when back online", action_id);
      return Ok(());
    }
  }
  result
}

async fn run(
  args: Args,
  config: &Config,
  service: &Arc<ApiService>,
  transport: Arc<dyn Transport>,
  events: &mpsc::UnboundedSender<ExecutionEvent>,
) -> Result<()> {
  match args.command {
    Command::Health => print_json(&service.health_check(events).await?),
    Command::Login { username } => {
      let password = Config::get_password()?;
      print_json(&service.login(&username, &password, events).await?)
    }
    Command::Users => print_json(&service.users(events).await?),
    Command::User { id } => print_json(&service.user(id, events).await?),
    Command::Tasks { day } => print_json(&service.tasks(day.as_deref(), events).await?),
    Command::Task { id } => print_json(&service.task(id, events).await?),
    Command::Toggle { task, user } => print_json(&service.toggle_task(task, user, events).await?),
    Command::Create {
      day,
      name,
      assignee,
    } => {
      let task = NewTask {
        day,
        task_name: name,
        assigned_user_id: assignee,
      };
      print_json(&service.create_task(task, events).await?)
    }
    Command::Update { id, json } => {
      let changes = serde_json::from_str(&json).map_err(|e| eyre!("--json is not valid JSON: {}", e))?;
      print_json(&service.update_task(id, changes, events).await?)
    }
    Command::Delete { id } => print_json(&service.delete_task(id, events).await?),
    Command::Stats => print_json(&service.stats(events).await?),
    Command::Ranking => print_json(&service.ranking(events).await?),
    Command::Status => print_json(&service.status()),
    Command::Queue => print_json(&service.pending_actions()),
    Command::Replay => {
      match service.replay_queue().await {
        Some(report) => {
          for outcome in &report.outcomes {
            print_outcome(outcome);
          }
          eprintln!(
            "replayed {} of {} queued actions",
            report.succeeded(),
            report.outcomes.len()
          );
        }
        None => eprintln!("a replay is already running"),
      }
      Ok(())
    }
    Command::ClearQueue => {
      service.clear_queue();
      Ok(())
    }
    Command::Watch => watch(config, service, transport, args.offline).await,
  }
}

async fn watch(
  config: &Config,
  service: &Arc<ApiService>,
  transport: Arc<dyn Transport>,
  start_offline: bool,
) -> Result<()> {
  let signal = ProbeSignal::spawn(
    transport,
    config.probe.interval(),
    config.probe.timeout(),
    !start_offline,
  );
  let watcher = service.connect(&signal);

  if service.status().is_online && !service.pending_actions().is_empty() {
    service.replay_queue().await;
  }

  let mut ticker = tokio::time::interval(Duration::from_secs(1));
  let mut last = None;
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      _ = ticker.tick() => {
        let status = service.status();
        if last.as_ref() != Some(&status) {
          print_json(&status)?;
          last = Some(status);
        }
      }
    }
  }

  watcher.abort();
  Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", text);
  Ok(())
}

fn print_outcome(outcome: &ReplayOutcome) {
  let action = outcome.action();
  match outcome {
    ReplayOutcome::Replayed { .. } => {
      eprintln!("  ok    {} {}", action.action.kind(), action.id)
    }
    ReplayOutcome::Failed { error, .. } => {
      eprintln!("  kept  {} {}: {}", action.action.kind(), action.id, error)
    }
  }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<ExecutionEvent>) {
  while let Some(event) = events.recv().await {
    match event {
      ExecutionEvent::Retry {
        attempt,
        delay,
        error,
      } => eprintln!(
        "attempt {} failed ({}), retrying in {}s",
        attempt,
        error,
        delay.as_secs()
      ),
      ExecutionEvent::SlowConnection => eprintln!("slow connection, still trying..."),
      ExecutionEvent::Failed { attempts, error } => {
        eprintln!("giving up after {} attempts: {}", attempts, error)
      }
      ExecutionEvent::Succeeded { .. } => {}
    }
  }
}

/// Log to a daily file in the data directory; stdout and stderr belong to the
/// command output.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("tasklink");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "tasklink.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("TASKLINK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
