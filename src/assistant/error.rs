//! Error taxonomy for the chat path.

/// A send that will not be retried. The user sees an apology instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardFailure {
  #[error("API call failed with status: {0}")]
  Status(u16),
  #[error("still rate limited after {attempts} attempts")]
  RetriesExhausted { attempts: u32 },
  #[error("request failed: {0}")]
  Transport(String),
  #[error("unreadable response: {0}")]
  InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
  /// Another send for this conversation has not resolved yet
  #[error("a message is already being sent")]
  Busy,
  #[error("message is empty")]
  EmptyMessage,
}
