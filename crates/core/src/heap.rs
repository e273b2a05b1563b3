use std::sync::Arc;

/// Keeps shared values alive until nothing but the heap refers to them.
///
/// Every song version (and every track or pattern list) handed to the engine
/// is registered here first. The audio thread then only ever drops a
/// reference that is not the last one, and the final release happens in
/// [`Heap::gc`] on the control thread.
#[derive(Debug)]
pub struct Heap<T> {
    entries: Vec<Arc<T>>,
}

impl<T> Default for Heap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Heap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.entries.push(value.clone());
        value
    }

    /// Registers a value that is already shared. Registering the same value
    /// twice is a no-op.
    pub fn insert(&mut self, value: &Arc<T>) {
        if !self.entries.iter().any(|entry| Arc::ptr_eq(entry, value)) {
            self.entries.push(value.clone());
        }
    }

    /// Drops every entry the heap holds the only reference to. Returns the
    /// number of entries released.
    pub fn gc(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| Arc::strong_count(entry) > 1);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
