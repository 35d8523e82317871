//! Network plumbing: request shape, transport, retrying executor and
//! connectivity signals.

mod events;
mod executor;
mod request;
mod signal;
mod transport;

pub use events::{ExecutionEvent, ExecutionObserver, Silent};
pub use executor::{RequestExecutor, RetryPolicy};
pub use request::ApiRequest;
pub use signal::{ManualSignal, NetworkSignal, ProbeSignal};
pub use transport::{HttpTransport, Transport};
