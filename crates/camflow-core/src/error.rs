//! Error types for camflow messages

use thiserror::Error;

/// Errors raised while validating a received message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Publish timestamp {published_at}ns is ahead of receive time {now}ns")]
    FromTheFuture { published_at: i64, now: i64 },
}

/// Result type for message validation
pub type MessageResult<T> = Result<T, MessageError>;
