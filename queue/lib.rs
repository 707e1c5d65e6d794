//! A string queue built on a singly-linked list.
//!
//! - `Queue`: the list itself, with O(1) insertion at both ends and O(1)
//!   removal from the front
//! - `handle`: the same operations for callers that may not hold a queue
//! - `heap`: an instrumented allocator for checking what the queue allocates

pub use self::error::QueueError;
pub use self::queue::Queue;

mod arena;
mod error;
mod queue;

pub mod handle;
pub mod heap;
