//! Bounded object ring.
//!
//! A fixed-capacity FIFO used to recycle pre-allocated descriptors without
//! allocating on the hot path. One storage slot is always left unused so that
//! "full" and "empty" can be told apart from the two indices alone.
//!
//! The ring is not synchronized; owners serialize access themselves.

/// Error returned by ring operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingError {
    /// Inserting would overwrite the oldest entry.
    Full,

    /// There is nothing to extract.
    Empty,
}

/// Bounded circular FIFO.
#[derive(Debug, Clone)]
pub struct Ring<T> {
    slots: Vec<Option<T>>,
    next_insert: usize,
    next_extract: usize,
}
impl<T> Ring<T> {
    /// Makes a new `Ring` able to hold `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.resize_with(capacity + 1, || None);
        Ring {
            slots,
            next_insert: 0,
            next_extract: 0,
        }
    }

    /// Returns the number of items the ring can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Returns the number of items currently held.
    pub fn len(&self) -> usize {
        (self.next_insert + self.slots.len() - self.next_extract) % self.slots.len()
    }

    /// Returns `true` if the ring holds no item.
    pub fn is_empty(&self) -> bool {
        self.next_insert == self.next_extract
    }

    /// Returns `true` if the ring holds at least one item.
    pub fn non_empty(&self) -> bool {
        !self.is_empty()
    }

    /// Appends `item`, handing it back if the ring is full.
    pub fn insert(&mut self, item: T) -> Result<(), (RingError, T)> {
        let next = (self.next_insert + 1) % self.slots.len();
        if next == self.next_extract {
            return Err((RingError::Full, item));
        }
        self.slots[self.next_insert] = Some(item);
        self.next_insert = next;
        Ok(())
    }

    /// Removes the oldest item.
    pub fn extract(&mut self) -> Result<T, RingError> {
        if self.is_empty() {
            return Err(RingError::Empty);
        }
        let item = self.slots[self.next_extract].take();
        self.next_extract = (self.next_extract + 1) % self.slots.len();
        item.ok_or(RingError::Empty)
    }

    /// Returns the oldest item without removing it.
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            self.slots[self.next_extract].as_ref()
        }
    }

    /// Iterates over the held items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let len = self.slots.len();
        (0..self.len()).filter_map(move |i| self.slots[(self.next_extract + i) % len].as_ref())
    }
}
