//! Cyclic round-robin selection.
//!
//! One generic rotor backs both the connection pool and the per-bucket
//! fingerprint profile rotation. It provides no thread safety of its own;
//! callers serialize access.

/// An ordered collection with a rotating cursor.
#[derive(Debug, Clone)]
pub struct Rotor<T> {
    items: Vec<T>,
    cursor: usize,
}

impl<T> Rotor<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, cursor: 0 }
    }

    /// Append an item. The cyclic order is the append order.
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// The next item in cyclic order, with no skipping: every item is
    /// visited exactly once before any repeats.
    pub fn next(&mut self) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.items.len();
        Some(&self.items[index])
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for Rotor<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_rotor() {
        let mut rotor: Rotor<u32> = Rotor::default();
        assert!(rotor.is_empty());
        assert!(rotor.next().is_none());
    }

    #[test]
    fn test_round_robin_visits_every_item() {
        let mut rotor = Rotor::new(vec!["a", "b", "c"]);
        let picks: Vec<_> = (0..6).map(|_| *rotor.next().unwrap()).collect();
        assert_eq!(picks, ["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_round_robin_after_push() {
        let mut rotor = Rotor::new(vec![1, 2]);
        assert_eq!(*rotor.next().unwrap(), 1);
        rotor.push(3);
        assert_eq!(*rotor.next().unwrap(), 2);
        assert_eq!(*rotor.next().unwrap(), 3);
        assert_eq!(*rotor.next().unwrap(), 1);
    }

    #[test]
    fn test_single_item_repeats() {
        let mut rotor = Rotor::new(vec![7]);
        for _ in 0..3 {
            assert_eq!(*rotor.next().unwrap(), 7);
        }
    }
}
