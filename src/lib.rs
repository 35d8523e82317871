//! Resilient, offline-aware client for the task board API.
//!
//! Remote calls run through a [`net::RequestExecutor`] with bounded retries,
//! linear backoff, a per-attempt timeout and slow-connection detection. Reads
//! are cached with a time-to-live, and mutations made while offline (or that
//! exhaust their retries) are kept in a durable queue and replayed when the
//! connection comes back. [`api::ApiService`] ties it all together.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod monitor;
pub mod net;
pub mod queue;
pub mod store;

#[cfg(test)]
mod testing;

pub use api::{ApiService, NewTask};
pub use config::Config;
pub use error::ApiError;
pub use monitor::ConnectionSnapshot;
