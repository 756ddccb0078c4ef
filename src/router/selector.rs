//! Round-robin replica selection
//!
//! Distributes `Any`-targeted statements evenly across the eligible
//! backends. Sessions are single-threaded state machines, so a plain
//! counter suffices; no atomics are needed.

use tracing::debug;

use crate::types::BackendId;

/// Round-robin position for `Any` routing
#[derive(Debug, Default)]
pub struct ReplicaSelector {
    current: usize,
}

impl ReplicaSelector {
    /// Create a selector starting at the first eligible backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next backend from the eligible set
    ///
    /// The eligible set varies call to call as backends drain their queues
    /// or fail; rotation stays even as long as the set is stable.
    pub fn select(&mut self, eligible: &[BackendId]) -> Option<BackendId> {
        if eligible.is_empty() {
            return None;
        }

        let index = self.current % eligible.len();
        self.current = self.current.wrapping_add(1);
        let backend = eligible[index];

        debug!(%backend, index, eligible = eligible.len(), "Round-robin selected backend");

        Some(backend)
    }
}
