//! Utility modules for anki-helper

pub mod pacing;
pub mod process_runner;
pub mod retry;

pub use pacing::PacingGate;
pub use process_runner::{ProcessError, ProcessParams, ProcessRunner, ScriptExecutor};
pub use retry::{retry_with_backoff, RetryFailure, RetryPolicy};
