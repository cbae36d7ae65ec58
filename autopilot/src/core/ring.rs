//! Fixed-capacity ring buffer for bounded session memory.

use serde::{Deserialize, Serialize};

/// Keeps the most recent `capacity` items. Pushing into a full buffer
/// overwrites the oldest slot.
///
/// Deserialization rejects layouts `push` and `iter` cannot index safely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "RingParts<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: Vec<T>,
    /// Index of the oldest item once the buffer is full.
    head: usize,
}

/// Serialized shape of a [`RingBuffer`], checked before use.
#[derive(Deserialize)]
struct RingParts<T> {
    capacity: usize,
    items: Vec<T>,
    head: usize,
}

impl<T> TryFrom<RingParts<T>> for RingBuffer<T> {
    type Error = String;

    fn try_from(parts: RingParts<T>) -> Result<Self, Self::Error> {
        let RingParts {
            capacity,
            items,
            head,
        } = parts;
        if capacity == 0 {
            return Err("ring capacity must be > 0".to_string());
        }
        if items.len() > capacity {
            return Err(format!(
                "ring holds {} items but capacity is {capacity}",
                items.len()
            ));
        }
        // The head only moves once the buffer is full.
        if head != 0 && (items.len() < capacity || head >= capacity) {
            return Err(format!(
                "ring head {head} is out of range for {} of {capacity} items",
                items.len()
            ));
        }
        Ok(Self {
            capacity,
            items,
            head,
        })
    }
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
            head: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            self.items[self.head] = item;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        let (newer, older) = self.items.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    pub fn latest(&self) -> Option<&T> {
        self.iter().next_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_items_in_order() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=5 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(ring.latest(), Some(&5));
    }

    #[test]
    fn survives_serde_round_trip_with_wrapped_head() {
        let mut ring = RingBuffer::new(2);
        for s in ["a", "b", "c"] {
            ring.push(s.to_string());
        }
        let json = serde_json::to_string(&ring).expect("serialize");
        let back: RingBuffer<String> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, ring);
        assert_eq!(back.latest().map(String::as_str), Some("c"));
    }

    #[test]
    fn corrupt_layouts_are_rejected_on_load() {
        for raw in [
            r#"{"capacity": 0, "items": [], "head": 0}"#,
            r#"{"capacity": 2, "items": [1, 2, 3], "head": 0}"#,
            r#"{"capacity": 3, "items": [1], "head": 2}"#,
            r#"{"capacity": 2, "items": [1, 2], "head": 2}"#,
        ] {
            let err = serde_json::from_str::<RingBuffer<u32>>(raw).unwrap_err();
            assert!(err.to_string().contains("ring"), "{raw}: {err}");
        }
    }

    #[test]
    fn loaded_ring_keeps_pushing_in_order() {
        let mut ring: RingBuffer<u32> =
            serde_json::from_str(r#"{"capacity": 2, "items": [3, 2], "head": 1}"#)
                .expect("deserialize");
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
        ring.push(4);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3, 4]);
    }
}
