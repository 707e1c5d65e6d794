//! A singly-linked string queue

use std::cmp::min;
use std::fmt;

use tracing::debug;

use crate::arena::Arena;
use crate::error::QueueError;

/// A queue of strings.
/// - O(1) insert at head/tail
/// - O(1) remove from head
/// - O(1) size
/// - O(n) in-place reverse
///
/// The queue owns a copy of every string it holds. Elements are kept in an
/// arena owned by the queue and linked by slot index, so dropping the queue
/// releases every element and every string.
pub struct Queue {
    elements: Arena<Element>,
    head: Option<usize>,
    tail: Option<usize>,
    size: usize,
}

/// An element in the `Queue`
struct Element {
    value: String,
    next: Option<usize>,
}

impl Queue {
    /// Create a new empty queue. Does not allocate.
    pub const fn new() -> Queue {
        Queue {
            elements: Arena::new(),
            head: None,
            tail: None,
            size: 0,
        }
    }

    /// Insert a copy of `s` at the front of the queue. On failure the queue is
    /// unchanged.
    pub fn insert_head(&mut self, s: &str) -> Result<(), QueueError> {
        self.elements
            .try_reserve()
            .map_err(|_| QueueError::ElementAlloc)?;
        let value = copy_value(s)?;

        let index = self.elements.insert(Element {
            value,
            next: self.head,
        });

        // First element is also the tail
        if self.tail.is_none() {
            self.tail = Some(index);
        }
        self.head = Some(index);
        self.size += 1;

        Ok(())
    }

    /// Insert a copy of `s` at the back of the queue. On failure the queue is
    /// unchanged.
    pub fn insert_tail(&mut self, s: &str) -> Result<(), QueueError> {
        self.elements
            .try_reserve()
            .map_err(|_| QueueError::ElementAlloc)?;
        let value = copy_value(s)?;

        let index = self.elements.insert(Element { value, next: None });

        match self.tail {
            Some(tail) => self.elements[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.size += 1;

        Ok(())
    }

    /// Remove the front element and return its value.
    pub fn remove_head(&mut self) -> Result<String, QueueError> {
        let head = self.head.ok_or(QueueError::Empty)?;
        let element = match self.elements.remove(head) {
            Some(element) => element,
            None => return Err(QueueError::Inconsistent("head refers to a vacant slot")),
        };

        self.head = element.next;

        // Removed the last element; hand the slot storage back too
        if self.head.is_none() {
            self.tail = None;
            self.elements.clear();
        }
        self.size = self.size.saturating_sub(1);

        Ok(element.value)
    }

    /// Remove the front element, copying its value into `buf`.
    ///
    /// `buf` is zeroed, then receives at most `buf.len() - 1` bytes of the
    /// value followed by a zero byte. An empty `buf` receives nothing. Returns
    /// the number of value bytes copied. The removed value is released before
    /// returning.
    pub fn remove_head_into(&mut self, buf: &mut [u8]) -> Result<usize, QueueError> {
        let value = self.remove_head()?;
        Ok(copy_bounded(&value, buf))
    }

    /// Return the number of elements
    pub fn size(&self) -> usize {
        self.size
    }

    /// Return true if there are no elements
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Reverse the order of the elements in place. Relinks elements only;
    /// nothing is allocated or copied.
    pub fn reverse(&mut self) {
        let mut prev = None;
        let mut current = self.head;

        while let Some(index) = current {
            let element = &mut self.elements[index];
            current = element.next;
            element.next = prev;
            prev = Some(index);
        }

        self.tail = self.head;
        self.head = prev;
    }

    /// Walk the chain and check it against the count and the storage.
    pub fn verify(&self) -> Result<(), QueueError> {
        let result = self.check_links();
        if let Err(e) = &result {
            debug!(size = self.size, slots = self.elements.slots(), "verify failed: {}", e);
        }
        result
    }

    fn check_links(&self) -> Result<(), QueueError> {
        if self.head.is_none() != self.tail.is_none() {
            return Err(QueueError::Inconsistent("only one of head and tail is set"));
        }
        if self.elements.live() != self.size {
            return Err(QueueError::Inconsistent("stored elements differ from size"));
        }

        let mut steps = 0;
        let mut last = None;
        let mut current = self.head;

        // A cycle would walk forever; stop one step past the count.
        while let Some(index) = current {
            if steps > self.size {
                return Err(QueueError::Inconsistent("chain is longer than size"));
            }
            let element = match self.elements.get(index) {
                Some(element) => element,
                None => return Err(QueueError::Inconsistent("link to a vacant slot")),
            };
            steps += 1;
            last = Some(index);
            current = element.next;
        }

        if steps != self.size {
            return Err(QueueError::Inconsistent("chain is shorter than size"));
        }
        if last != self.tail {
            return Err(QueueError::Inconsistent("chain does not end at tail"));
        }

        Ok(())
    }

    /// Values from head to tail
    fn values(&self) -> Values<'_> {
        Values {
            elements: &self.elements,
            next: self.head,
        }
    }
}

impl Default for Queue {
    fn default() -> Queue {
        Queue::new()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.values()).finish()
    }
}

/// Follows `next` links without touching the queue
struct Values<'a> {
    elements: &'a Arena<Element>,
    next: Option<usize>,
}

impl<'a> Iterator for Values<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let element = self.elements.get(self.next?)?;
        self.next = element.next;
        Some(&element.value)
    }
}

/// Copy `s` into storage of its own, reporting allocation failure instead of
/// aborting.
fn copy_value(s: &str) -> Result<String, QueueError> {
    let mut value = String::new();
    value
        .try_reserve_exact(s.len())
        .map_err(|_| QueueError::ValueAlloc { len: s.len() })?;
    value.push_str(s);
    Ok(value)
}

/// Zero `buf`, then copy at most `buf.len() - 1` bytes of `value` into it so
/// the result is always zero-terminated.
fn copy_bounded(value: &str, buf: &mut [u8]) -> usize {
    if buf.is_empty() {
        return 0;
    }

    buf.fill(0);
    let len = min(value.len(), buf.len() - 1);
    buf[..len].copy_from_slice(&value.as_bytes()[..len]);
    len
}
