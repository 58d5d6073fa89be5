//! Tag communication errors

use thiserror::Error;

/// Failures reported by a tag transceiver.
///
/// `TagLost` aborts whatever multi-step operation is in flight. `Rejected`
/// and `Timeout` are recoverable inside sweep loops, where they simply mean
/// "try the next candidate".
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TagError {
    #[error("tag left the field")]
    TagLost,
    #[error("command timed out")]
    Timeout,
    #[error("command rejected by tag")]
    Rejected,
}

impl TagError {
    /// Only tag loss aborts a multi-sector operation.
    pub fn is_fatal(self) -> bool {
        matches!(self, TagError::TagLost)
    }
}
