//! Queue operations for callers that may not hold a queue
//!
//! Each function accepts `None` where a queue is expected. Mutations and
//! removals on `None` report failure, queries return 0 and `free`/`reverse`
//! do nothing. Failures are reported as `false`; use the `Queue` methods
//! directly for the reason.

use crate::queue::Queue;

/// Create a new empty queue
pub fn new() -> Queue {
    Queue::new()
}

/// Release the queue, its elements and their strings
pub fn free(q: Option<Queue>) {
    drop(q);
}

/// Insert a copy of `s` at the head. Returns whether it was inserted.
pub fn insert_head(q: Option<&mut Queue>, s: &str) -> bool {
    match q {
        Some(q) => q.insert_head(s).is_ok(),
        None => false,
    }
}

/// Insert a copy of `s` at the tail. Returns whether it was inserted.
pub fn insert_tail(q: Option<&mut Queue>, s: &str) -> bool {
    match q {
        Some(q) => q.insert_tail(s).is_ok(),
        None => false,
    }
}

/// Remove the head, copying its value into `buf` if one is given (see
/// `Queue::remove_head_into`). Returns false if there is no queue or it is
/// empty.
pub fn remove_head(q: Option<&mut Queue>, buf: Option<&mut [u8]>) -> bool {
    let q = match q {
        Some(q) => q,
        None => return false,
    };

    match buf {
        Some(buf) => q.remove_head_into(buf).is_ok(),
        None => q.remove_head().is_ok(),
    }
}

/// Return the number of elements, or 0 if there is no queue
pub fn size(q: Option<&Queue>) -> usize {
    q.map_or(0, Queue::size)
}

/// Reverse the queue if there is one
pub fn reverse(q: Option<&mut Queue>) {
    if let Some(q) = q {
        q.reverse();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_absent_queue() {
        let mut buf = [0x55u8; 4];

        assert!(!insert_head(None, "a"));
        assert!(!insert_tail(None, "a"));
        assert!(!remove_head(None, Some(&mut buf[..])));
        assert!(!remove_head(None, None));
        assert_eq!(size(None), 0);
        reverse(None);
        free(None);

        assert_eq!(buf, [0x55; 4]);
    }

    #[test]
    fn test_present_queue() {
        let mut q = new();
        let mut buf = [0u8; 8];

        assert!(insert_tail(Some(&mut q), "a"));
        assert!(insert_tail(Some(&mut q), "b"));
        assert!(insert_head(Some(&mut q), "c"));
        assert_eq!(size(Some(&q)), 3);

        assert!(remove_head(Some(&mut q), Some(&mut buf[..])));
        assert_eq!(&buf[..2], b"c\0");
        assert_eq!(size(Some(&q)), 2);

        reverse(Some(&mut q));
        assert!(remove_head(Some(&mut q), Some(&mut buf[..])));
        assert_eq!(&buf[..2], b"b\0");

        assert!(remove_head(Some(&mut q), None));
        assert!(!remove_head(Some(&mut q), None));
        assert_eq!(size(Some(&q)), 0);

        free(Some(q));
    }
}
