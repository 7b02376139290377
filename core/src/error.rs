/*!
# Error Module

This module defines the error handling infrastructure for MuxQ.

A consistent error system is essential for:
- Providing clear, actionable error messages
- Distinguishing transient store failures from terminal message failures
- Enabling proper error propagation through the async call chain
- Facilitating debugging

The module includes:
- The `MuxqError` enum that categorizes different error types
- A `Result` type alias for convenience
- Specialized error variants for each subsystem (store, dispatcher, etc.)
- Integration with the standard error handling traits

Callers that poll queues should treat `StoreError` as retryable and back
off, while `ExpiredMessage` and `SerializationError` describe a single
message that is already out of circulation.
*/

use thiserror::Error;

/// Result type alias for MuxQ operations
pub type Result<T> = std::result::Result<T, MuxqError>;

/// Errors that can occur during MuxQ operations
#[derive(Debug, Error)]
pub enum MuxqError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Message expired: {0}")]
    ExpiredMessage(String),

    #[error("Dispatcher error: {0}")]
    DispatcherError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
