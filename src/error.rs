//! Router error types
//!
//! This module provides the structured error channel between the session
//! core and its owner. Errors are reported to the owning session, never
//! thrown across the boundary into backend transports.

use thiserror::Error;

use crate::statement::ReplyStatus;
use crate::types::{BackendId, SequenceId};

/// Errors raised by the session-consistency core
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RouterError {
    /// A reply arrived with no matching outstanding command.
    ///
    /// Fatal to the backend it arrived on: the backend and the router no
    /// longer agree on what is in flight, so nothing further can be
    /// correlated on that connection.
    #[error("reply from {backend} with no outstanding command: protocol desynchronization")]
    ProtocolDesync {
        /// The backend the stray reply arrived on
        backend: BackendId,
    },

    /// The classifier could not resolve a single routing target
    #[error("conflicting routing requirements: {reason}")]
    RoutingConflict {
        /// Human-readable description of the conflict
        reason: String,
    },

    /// Two backends both claim ownership of the same database
    #[error("database '{database}' is owned by both {first} and {second}")]
    ShardConflict {
        /// The doubly-owned database name
        database: String,
        /// The backend already recorded as owner
        first: BackendId,
        /// The backend whose discovery reply collided
        second: BackendId,
    },

    /// Backends disagree on the outcome of a session command
    #[error(
        "backend {backend} replied {actual:?} to session command {sequence} \
         but {expected:?} was forwarded to the client"
    )]
    ReplyMismatch {
        /// The diverging backend
        backend: BackendId,
        /// The session command position
        sequence: SequenceId,
        /// Status of the reply that was forwarded to the client
        expected: ReplyStatus,
        /// Status this backend reported
        actual: ReplyStatus,
    },

    /// A backend was lost at the transport level
    #[error("backend {backend} failed: {reason}")]
    BackendFailed {
        /// The lost backend
        backend: BackendId,
        /// Transport-level failure description
        reason: String,
    },

    /// A statement referenced a database no backend owns
    #[error("unknown database '{database}'")]
    DatabaseNotFound {
        /// The unresolvable database name
        database: String,
    },

    /// The pending-statement queue reached its configured bound
    #[error("pending statement queue limit of {limit} reached")]
    PendingLimitExceeded {
        /// The configured bound
        limit: usize,
    },

    /// A statement arrived after the session was closed
    #[error("session is closed")]
    SessionClosed,

    /// No backend is viable for the statement's required target
    #[error("no backend available for target: {target}")]
    NoBackendAvailable {
        /// Description of the required target
        target: String,
    },
}

impl RouterError {
    /// Whether this error ends the whole session
    ///
    /// Non-fatal errors are reported and the session continues on the
    /// remaining viable backends. Losing every backend also ends the
    /// session, but that is decided where the roster is visible, not here:
    /// a `NoBackendAvailable` for one statement's target only fails that
    /// statement.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionClosed)
    }

    /// Whether the client must be told about this error
    ///
    /// Consistency warnings stay internal; request failures are surfaced as
    /// client-visible errors by the protocol adapter.
    #[must_use]
    pub const fn is_client_visible(&self) -> bool {
        matches!(
            self,
            Self::RoutingConflict { .. }
                | Self::DatabaseNotFound { .. }
                | Self::PendingLimitExceeded { .. }
                | Self::NoBackendAvailable { .. }
        )
    }

    /// The log level this error should be recorded at
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        match self {
            // Divergence warnings: session continues, queries against the
            // diverged backend are unreliable
            Self::ReplyMismatch { .. } => tracing::Level::WARN,
            // Request-level failures reported to the client
            Self::RoutingConflict { .. }
            | Self::DatabaseNotFound { .. }
            | Self::PendingLimitExceeded { .. } => tracing::Level::WARN,
            // Loss of a backend or the whole session
            Self::ProtocolDesync { .. }
            | Self::ShardConflict { .. }
            | Self::BackendFailed { .. }
            | Self::NoBackendAvailable { .. } => tracing::Level::ERROR,
            Self::SessionClosed => tracing::Level::DEBUG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desync_message_names_backend() {
        let err = RouterError::ProtocolDesync {
            backend: BackendId::from_index(2),
        };
        assert!(err.to_string().contains("Backend(2)"));
    }

    #[test]
    fn test_shard_conflict_message() {
        let err = RouterError::ShardConflict {
            database: "db1".to_string(),
            first: BackendId::from_index(0),
            second: BackendId::from_index(1),
        };
        let msg = err.to_string();
        assert!(msg.contains("db1"));
        assert!(msg.contains("Backend(0)"));
        assert!(msg.contains("Backend(1)"));
    }

    #[test]
    fn test_reply_mismatch_message() {
        let err = RouterError::ReplyMismatch {
            backend: BackendId::from_index(3),
            sequence: SequenceId::from_raw(7),
            expected: ReplyStatus::Ok,
            actual: ReplyStatus::Error,
        };
        let msg = err.to_string();
        assert!(msg.contains("#7"));
        assert!(msg.contains("Backend(3)"));
    }

    #[test]
    fn test_fatality() {
        assert!(RouterError::SessionClosed.is_fatal());
        assert!(
            !RouterError::NoBackendAvailable {
                target: "primary".to_string()
            }
            .is_fatal()
        );
        assert!(
            !RouterError::ReplyMismatch {
                backend: BackendId::from_index(0),
                sequence: SequenceId::from_raw(1),
                expected: ReplyStatus::Ok,
                actual: ReplyStatus::Error,
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_client_visibility() {
        assert!(
            RouterError::RoutingConflict {
                reason: "write with replica hint".to_string()
            }
            .is_client_visible()
        );
        assert!(
            RouterError::DatabaseNotFound {
                database: "missing".to_string()
            }
            .is_client_visible()
        );
        assert!(
            !RouterError::ProtocolDesync {
                backend: BackendId::from_index(0)
            }
            .is_client_visible()
        );
    }

    #[test]
    fn test_log_levels() {
        let mismatch = RouterError::ReplyMismatch {
            backend: BackendId::from_index(1),
            sequence: SequenceId::from_raw(2),
            expected: ReplyStatus::Ok,
            actual: ReplyStatus::Error,
        };
        assert_eq!(mismatch.log_level(), tracing::Level::WARN);

        let desync = RouterError::ProtocolDesync {
            backend: BackendId::from_index(1),
        };
        assert_eq!(desync.log_level(), tracing::Level::ERROR);

        assert_eq!(RouterError::SessionClosed.log_level(), tracing::Level::DEBUG);
    }
}
