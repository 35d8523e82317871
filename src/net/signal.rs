//! Sources of online/offline transitions.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::request::ApiRequest;
use super::transport::Transport;

/// Publishes the current online state; `true` means online.
pub trait NetworkSignal: Send + Sync {
  fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Signal driven explicitly by the caller.
#[derive(Debug)]
pub struct ManualSignal {
  tx: watch::Sender<bool>,
}

impl ManualSignal {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  pub fn set_online(&self, online: bool) {
    self.tx.send_replace(online);
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }
}

impl NetworkSignal for ManualSignal {
  fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Signal derived from periodically calling the health endpoint.
///
/// Only changes are published. The probe task stops when this is dropped.
pub struct ProbeSignal {
  rx: watch::Receiver<bool>,
  task: JoinHandle<()>,
}

impl ProbeSignal {
  pub fn spawn(
    transport: Arc<dyn Transport>,
    interval: Duration,
    timeout: Duration,
    initially_online: bool,
  ) -> Self {
    let (tx, rx) = watch::channel(initially_online);

    let task = tokio::spawn(async move {
      let request = ApiRequest::get("/health");
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;

        let online = matches!(
          tokio::time::timeout(timeout, transport.send(&request)).await,
          Ok(Ok(_))
        );
        debug!(online, "health probe");

        tx.send_if_modified(|current| {
          if *current == online {
            return false;
          }
          *current = online;
          true
        });
      }
    });

    Self { rx, task }
  }
}

impl NetworkSignal for ProbeSignal {
  fn subscribe(&self) -> watch::Receiver<bool> {
    self.rx.clone()
  }
}

impl Drop for ProbeSignal {
  fn drop(&mut self) {
    self.task.abort();
  }
}
