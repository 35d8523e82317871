//! Response caching for read operations.
//!
//! Reads are cached in memory with a time-to-live. Mutations invalidate the
//! keys they can affect through predicates over the key names.

mod keys;
mod response;

pub use keys::CacheKey;
pub use response::{CacheEntry, ResponseCache};
