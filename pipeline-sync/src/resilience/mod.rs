//! Retry policy for entity store calls
//!
//! Store writes against SQLite can transiently fail (busy/locked database,
//! pool exhaustion). Each individual call is retried with exponential backoff
//! and jitter; permanent failures are returned on the first attempt.

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
