//! Errors reported by queue operations

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// No storage for a new element
    #[error("could not allocate a queue element")]
    ElementAlloc,

    /// No storage for the copy of an inserted string
    #[error("could not allocate {len} bytes for an element value")]
    ValueAlloc { len: usize },

    /// Removal from a queue with no elements
    #[error("queue is empty")]
    Empty,

    /// The links, the count and the storage disagree
    #[error("queue structure is inconsistent: {0}")]
    Inconsistent(&'static str),
}
