//! Fixed-capacity ring buffer

use std::collections::VecDeque;

use crate::error::StorageError;
use crate::Result;

/// Bounded FIFO that overwrites its oldest entry when full
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
    evicted: u64,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StorageError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
            evicted: 0,
        })
    }

    /// Append an item, returning the entry it displaced if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.evicted += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many entries have been overwritten so far
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Oldest to newest
    pub fn get_all(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// The newest `n` entries, oldest first
    pub fn get_last(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_overwrites_oldest() {
        let mut ring = RingBuffer::new(3).unwrap();
        assert_eq!(ring.push("A"), None);
        assert_eq!(ring.push("B"), None);
        assert_eq!(ring.push("C"), None);
        assert_eq!(ring.push("D"), Some("A"));
        assert_eq!(ring.get_all(), vec!["B", "C", "D"]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.evicted_count(), 1);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut ring = RingBuffer::new(5).unwrap();
        for i in 0..100 {
            ring.push(i);
            assert!(ring.len() <= 5);
        }
        assert_eq!(ring.get_all(), vec![95, 96, 97, 98, 99]);
    }

    #[test]
    fn test_get_last() {
        let mut ring = RingBuffer::new(4).unwrap();
        for i in 1..=4 {
            ring.push(i);
        }
        assert_eq!(ring.get_last(2), vec![3, 4]);
        assert_eq!(ring.get_last(10), vec![1, 2, 3, 4]);
        assert!(ring.get_last(0).is_empty());
        // reads do not consume
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_matches!(
            RingBuffer::<u8>::new(0),
            Err(StorageError::InvalidCapacity(0))
        );
    }
}
