//! Retry policy for transient transfer failures.
//!
//! The task owns the retry loop itself because every attempt has to consult
//! connectivity first; this module only answers "retry, and after how long"
//! and maps libcurl failures into the download error taxonomy.

mod classify;
mod policy;

pub use classify::{classify_curl_error, TransferPhase};
pub use policy::{RetryDecision, RetryPolicy};
