//! Task board API surface.

mod service;
mod types;

pub use service::ApiService;
pub use types::NewTask;
