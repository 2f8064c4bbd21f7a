//! Heap configuration.

/// Configuration for a [`Heap`](crate::Heap).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Allocation records to reserve room for up front.
    pub record_capacity: usize,
    /// Handle slots to reserve room for up front.
    pub handle_capacity: usize,
    /// Number of recent collections kept by [`Heap::history`](crate::Heap::history).
    /// The latest collection is always available through
    /// [`Heap::last_collection`](crate::Heap::last_collection), even when this is 0.
    pub history_len: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            record_capacity: 64,
            handle_capacity: 256,
            history_len: 64,
        }
    }
}

impl HeapConfig {
    /// Set the initial record capacity.
    #[must_use]
    pub const fn with_record_capacity(mut self, capacity: usize) -> Self {
        self.record_capacity = capacity;
        self
    }

    /// Set the initial handle capacity.
    #[must_use]
    pub const fn with_handle_capacity(mut self, capacity: usize) -> Self {
        self.handle_capacity = capacity;
        self
    }

    /// Set how many collections the history keeps.
    #[must_use]
    pub const fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len;
        self
    }
}
