//! Fixed-capacity FIFO buffer that drops its oldest entry once full.
//!
//! The backing storage is allocated once at construction and never grows, so
//! the memory bound is the capacity passed to [`RingBuffer::new`].

use std::collections::VecDeque;
use std::collections::vec_deque;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` entries. A capacity
    /// of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `item`, returning the entry that was evicted to make room.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.slots.len() == self.capacity {
            self.slots.pop_front()
        } else {
            None
        };
        self.slots.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.slots.iter()
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.slots.iter().cloned().collect()
    }
}

impl RingBuffer<String> {
    /// Concatenates the retained chunks and keeps the last `max_chars`
    /// characters.
    pub fn tail_chars(&self, max_chars: usize) -> String {
        if max_chars == 0 {
            return String::new();
        }
        let joined: String = self.slots.iter().map(String::as_str).collect();
        match joined.char_indices().rev().nth(max_chars - 1) {
            Some((start, _)) => joined[start..].to_string(),
            None => joined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keeps_most_recent_entries_in_order() {
        let capacity = 4;
        for writes in (capacity + 1)..(capacity * 5) {
            let mut buffer = RingBuffer::new(capacity);
            for value in 0..writes {
                buffer.push(value);
            }
            assert_eq!(buffer.len(), capacity);
            let expected: Vec<usize> = ((writes - capacity)..writes).collect();
            assert_eq!(buffer.to_vec(), expected);
        }
    }

    #[test]
    fn push_returns_evicted_entry() {
        let mut buffer = RingBuffer::new(2);
        assert_eq!(buffer.push("a"), None);
        assert_eq!(buffer.push("b"), None);
        assert_eq!(buffer.len(), buffer.capacity());
        assert_eq!(buffer.push("c"), Some("a"));
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_holds_one_entry() {
        let mut buffer = RingBuffer::new(0);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.to_vec(), vec![2]);
    }

    #[test]
    fn tail_chars_counts_characters_not_bytes() {
        let mut buffer = RingBuffer::new(8);
        buffer.push("héllo ".to_string());
        buffer.push("wörld".to_string());
        assert_eq!(buffer.tail_chars(5), "wörld");
        assert_eq!(buffer.tail_chars(7), "o wörld");
        assert_eq!(buffer.tail_chars(100), "héllo wörld");
        assert_eq!(buffer.tail_chars(0), "");
    }
}
