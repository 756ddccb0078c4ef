//! Core identifier types for sessions, backends and session commands
//!
//! This module provides the unique identifiers used throughout the router.

use uuid::Uuid;

/// Unique identifier for client sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for backend servers
///
/// Backends are fixed for the lifetime of a session, so an index into the
/// session's backend roster is sufficient and cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(usize);

impl BackendId {
    /// Create a backend ID from a roster index
    #[must_use]
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Get the underlying roster index
    #[must_use]
    #[inline]
    pub const fn as_index(&self) -> usize {
        self.0
    }
}

impl From<usize> for BackendId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Backend({})", self.0)
    }
}

/// Position of a session command within a session
///
/// Strictly increasing per session, allocated once per fan-out (all
/// per-backend copies of one session command share the same sequence id),
/// never reused. Correlates replies across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SequenceId(u64);

impl SequenceId {
    /// The zero sequence id; no session command ever carries it
    pub const ZERO: Self = Self(0);

    /// Create a sequence id from a raw counter value
    #[must_use]
    #[inline]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw counter value
    #[must_use]
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The sequence id immediately after this one
    #[must_use]
    #[inline]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether `other` is the direct successor of this id
    #[must_use]
    #[inline]
    pub const fn is_followed_by(&self, other: Self) -> bool {
        self.0 + 1 == other.0
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
