//! Backend connection state
//!
//! One [`BackendConnection`] represents one logical connection from the
//! router to one database server. It owns that backend's session command
//! queue, a readiness state machine and the bulk-load streaming sub-state.
//!
//! The readiness states replace the original bitmask-style initialization
//! flags with named states and guarded transitions; combinations the
//! bitmask permitted but never meant are simply unrepresentable.

use std::collections::VecDeque;

use bytes::Bytes;
use thiserror::Error;

use crate::session::command::SessionCommandQueue;
use crate::types::BackendId;

/// Readiness of a backend connection
///
/// ```text
/// Uninitialized ──(no discovery)──────────► Ready
/// Uninitialized ──(discovery required)───► Discovering ──► Ready
///                                              │
///                                              └──(conflict)──► Failed
/// Ready ──(transport error)──► Failed
/// any ──(session close)──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Session setup done, routing not yet enabled
    Uninitialized,
    /// Waiting for the database-enumeration reply
    Discovering,
    /// Accepting statements
    Ready,
    /// Excluded from routing for the rest of the session
    Failed,
    /// Session torn down; terminal
    Closed,
}

impl BackendState {
    /// Whether statements may be routed to a backend in this state
    #[must_use]
    #[inline]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether the backend is permanently out of the session
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Errors from guarded state transitions
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The requested transition is not defined
    #[error("{backend}: invalid transition {from} -> {to}")]
    InvalidTransition {
        /// The backend whose transition was rejected
        backend: BackendId,
        /// Current state
        from: BackendState,
        /// Requested state
        to: BackendState,
    },

    /// Bulk-load streaming toggled in the wrong state
    #[error("{backend}: load streaming not allowed while {state}")]
    StreamingNotAllowed {
        /// The backend the toggle was attempted on
        backend: BackendId,
        /// Current readiness state
        state: BackendState,
    },
}

/// Bulk-load streaming sub-state, orthogonal to readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadDataState {
    /// No bulk load in progress
    #[default]
    Inactive,
    /// Client is mid-stream; raw bytes pass through verbatim
    Streaming,
}

/// One logical connection to one database server
#[derive(Debug)]
pub struct BackendConnection {
    id: BackendId,
    name: String,
    state: BackendState,
    load_data: LoadDataState,
    queue: SessionCommandQueue,
    /// Writes buffered while the backend is mid bulk-load
    deferred: VecDeque<Bytes>,
    /// A single-backend statement is outstanding; its reply is forwarded
    /// to the client directly
    awaiting_forward: bool,
}

impl BackendConnection {
    /// Create a backend connection in `Uninitialized` state
    #[must_use]
    pub fn new(id: BackendId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: BackendState::Uninitialized,
            load_data: LoadDataState::default(),
            queue: SessionCommandQueue::new(),
            deferred: VecDeque::new(),
            awaiting_forward: false,
        }
    }

    /// The backend's roster id
    #[must_use]
    #[inline]
    pub const fn id(&self) -> BackendId {
        self.id
    }

    /// The backend's configured name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current readiness state
    #[must_use]
    #[inline]
    pub const fn state(&self) -> BackendState {
        self.state
    }

    /// Whether statements may currently be routed here
    #[must_use]
    #[inline]
    pub const fn is_routable(&self) -> bool {
        self.state.is_ready()
    }

    /// Whether all fanned-out session commands have been replied to
    ///
    /// Ordinary statements are only dispatched to synchronized backends so
    /// a backend reply is always unambiguous.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enter discovery
    pub fn begin_discovery(&mut self) -> Result<(), StateError> {
        self.transition_from(&[BackendState::Uninitialized], BackendState::Discovering)
    }

    /// Enable routing
    pub fn mark_ready(&mut self) -> Result<(), StateError> {
        self.transition_from(
            &[BackendState::Uninitialized, BackendState::Discovering],
            BackendState::Ready,
        )
    }

    /// Exclude the backend from routing for the rest of the session
    pub fn mark_failed(&mut self, reason: &str) -> Result<(), StateError> {
        if self.state == BackendState::Closed {
            return Err(StateError::InvalidTransition {
                backend: self.id,
                from: self.state,
                to: BackendState::Failed,
            });
        }
        if self.state != BackendState::Failed {
            tracing::error!(backend = %self.id, name = %self.name, reason, "Backend failed");
            self.state = BackendState::Failed;
            self.load_data = LoadDataState::Inactive;
        }
        Ok(())
    }

    /// Terminal transition at session close; idempotent
    pub fn close(&mut self) {
        self.state = BackendState::Closed;
        self.load_data = LoadDataState::Inactive;
        self.deferred.clear();
    }

    fn transition_from(
        &mut self,
        allowed: &[BackendState],
        to: BackendState,
    ) -> Result<(), StateError> {
        if !allowed.contains(&self.state) {
            return Err(StateError::InvalidTransition {
                backend: self.id,
                from: self.state,
                to,
            });
        }
        tracing::debug!(backend = %self.id, from = %self.state, to = %to, "Backend state change");
        self.state = to;
        Ok(())
    }

    /// Whether a bulk load is streaming through this backend
    #[must_use]
    #[inline]
    pub const fn is_streaming(&self) -> bool {
        matches!(self.load_data, LoadDataState::Streaming)
    }

    /// Enter the bulk-load streaming sub-state
    pub fn begin_load_stream(&mut self) -> Result<(), StateError> {
        if self.state != BackendState::Ready || self.is_streaming() {
            return Err(StateError::StreamingNotAllowed {
                backend: self.id,
                state: self.state,
            });
        }
        self.load_data = LoadDataState::Streaming;
        Ok(())
    }

    /// Leave the streaming sub-state, returning writes deferred while it
    /// was active, in dispatch order
    pub fn end_load_stream(&mut self) -> Result<Vec<Bytes>, StateError> {
        if !self.is_streaming() {
            return Err(StateError::StreamingNotAllowed {
                backend: self.id,
                state: self.state,
            });
        }
        self.load_data = LoadDataState::Inactive;
        Ok(self.deferred.drain(..).collect())
    }

    /// Buffer a write until the active bulk load finishes
    pub fn defer_write(&mut self, bytes: Bytes) {
        debug_assert!(self.is_streaming(), "deferred write outside a bulk load");
        self.deferred.push_back(bytes);
    }

    /// Record that a directly-routed statement is outstanding here
    pub fn expect_forward(&mut self) {
        debug_assert!(!self.awaiting_forward, "statement already outstanding");
        self.awaiting_forward = true;
    }

    /// Whether a directly-routed statement is outstanding
    #[must_use]
    #[inline]
    pub const fn is_awaiting_forward(&self) -> bool {
        self.awaiting_forward
    }

    /// Consume the outstanding-statement expectation
    pub fn take_forward_expectation(&mut self) -> bool {
        std::mem::take(&mut self.awaiting_forward)
    }

    /// The backend's session command queue
    #[must_use]
    pub fn queue(&self) -> &SessionCommandQueue {
        &self.queue
    }

    /// Mutable access to the session command queue
    pub fn queue_mut(&mut self) -> &mut SessionCommandQueue {
        &mut self.queue
    }
}
