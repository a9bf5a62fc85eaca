//! Fixed-capacity ring of the most recent epoch penalties.
//!
//! Slots are addressed by index from `head` (the oldest entry). Resizing keeps
//! logical order: growing leaves room for newer entries, shrinking drops the
//! oldest ones.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRing<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> SliceRing<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, head: 0, len: 0 }
    }

    /// Rebuild from entries in oldest-to-newest order. Entries beyond the
    /// capacity are dropped from the oldest end.
    pub fn from_entries(capacity: usize, entries: Vec<T>) -> Self {
        let mut ring = Self::new(capacity);
        for e in entries {
            ring.push(e);
        }
        ring
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append, overwriting the oldest entry when full. A zero-capacity ring
    /// ignores pushes.
    pub fn push(&mut self, value: T) {
        let cap = self.capacity();
        if cap == 0 {
            return;
        }
        if self.len < cap {
            let idx = (self.head + self.len) % cap;
            self.slots[idx] = Some(value);
            self.len += 1;
        } else {
            self.slots[self.head] = Some(value);
            self.head = (self.head + 1) % cap;
        }
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }

    pub fn resize(&mut self, capacity: usize) {
        if capacity == self.capacity() {
            return;
        }
        let cap = self.capacity();
        let mut entries: Vec<T> = Vec::with_capacity(self.len);
        for i in 0..self.len {
            if let Some(v) = self.slots[(self.head + i) % cap].take() {
                entries.push(v);
            }
        }
        if entries.len() > capacity {
            entries.drain(..entries.len() - capacity);
        }
        *self = Self::from_entries(capacity, entries);
    }
}

impl<T: Clone> SliceRing<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}
