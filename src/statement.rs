//! Statement and reply units exchanged at the router boundary
//!
//! The router never parses wire packets itself. The client-facing protocol
//! layer hands it a [`Statement`]: the raw bytes of one client message plus
//! the classification produced by the external query classifier. Backend
//! protocol handlers hand it a [`BackendReply`]: the raw reply bytes plus a
//! success/failure classification.
//!
//! Payloads use [`Bytes`], so cloning a statement for fan-out shares the
//! immutable byte buffer instead of copying it.

use bytes::Bytes;

/// Kinds of session-affecting commands
///
/// A session command changes backend session state and must be replicated
/// identically to every backend serving the client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionCommandKind {
    /// Change the default database (`USE db`)
    ChangeDatabase,
    /// Define a prepared statement
    Prepare,
    /// Deallocate a prepared statement; the server sends no reply for these
    Deallocate,
    /// Set a session variable
    SetVariable,
    /// Set a protocol-level option
    SetOption,
    /// Enable or disable autocommit
    Autocommit {
        /// The autocommit state requested by the client
        enable: bool,
    },
    /// Any other statement the classifier marked as session-affecting
    Other,
}

impl SessionCommandKind {
    /// Whether backends send a reply for this command
    ///
    /// Commands without a reply are dispatched to every backend but never
    /// enter reply correlation.
    #[must_use]
    #[inline]
    pub const fn expects_response(&self) -> bool {
        !matches!(self, Self::Deallocate)
    }
}

impl std::fmt::Display for SessionCommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ChangeDatabase => "change-database",
            Self::Prepare => "prepare",
            Self::Deallocate => "deallocate",
            Self::SetVariable => "set-variable",
            Self::SetOption => "set-option",
            Self::Autocommit { .. } => "autocommit",
            Self::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Classification of a client statement, as produced by the external
/// query classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Read-only query
    Read,
    /// Data-modifying query
    Write,
    /// Session-affecting command, replicated to all backends
    Session(SessionCommandKind),
    /// Bulk-load initiation (e.g. `LOAD DATA LOCAL INFILE`)
    BeginLoad,
    /// Raw payload frame sent by the client mid bulk-load; an empty frame
    /// marks the end of the stream
    Raw,
}

impl StatementKind {
    /// Whether this statement must be replicated to every backend
    #[must_use]
    #[inline]
    pub const fn is_session_command(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}

/// An explicit per-statement routing override
///
/// Hints come from the client protocol layer (e.g. comment hints) and take
/// part in classification; a hint that contradicts a mandatory target is a
/// routing conflict, not a tiebreaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingHint {
    /// Route to the primary server
    Primary,
    /// Route to any eligible replica
    Replica,
    /// Route to the named server
    Named(String),
}

/// One client-issued statement: opaque payload plus classification
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    payload: Bytes,
    kind: StatementKind,
    hint: Option<RoutingHint>,
    target_database: Option<String>,
}

impl Statement {
    /// Create a statement from its payload and classified kind
    #[must_use]
    pub fn new(payload: Bytes, kind: StatementKind) -> Self {
        Self {
            payload,
            kind,
            hint: None,
            target_database: None,
        }
    }

    /// Attach a routing hint
    #[must_use]
    pub fn with_hint(mut self, hint: RoutingHint) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Attach the database the statement touches, when the classifier could
    /// resolve one
    #[must_use]
    pub fn with_target_database(mut self, database: impl Into<String>) -> Self {
        self.target_database = Some(database.into());
        self
    }

    /// The classified kind
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> StatementKind {
        self.kind
    }

    /// The raw statement bytes
    #[must_use]
    #[inline]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the statement, keeping only the payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The routing hint, if any
    #[must_use]
    pub fn hint(&self) -> Option<&RoutingHint> {
        self.hint.as_ref()
    }

    /// The database this statement touches, if the classifier resolved one
    #[must_use]
    pub fn target_database(&self) -> Option<&str> {
        self.target_database.as_deref()
    }

    /// Whether the payload is empty
    ///
    /// An empty raw frame is the end-of-stream marker for bulk loads.
    #[must_use]
    #[inline]
    pub fn is_empty_frame(&self) -> bool {
        self.payload.is_empty()
    }

    /// Create an independent copy of the payload bytes
    ///
    /// [`Bytes::clone`] shares the buffer; this allocates.
    #[must_use]
    pub fn deep_copy_payload(&self) -> Bytes {
        Bytes::copy_from_slice(&self.payload)
    }
}

/// Success/failure classification of a backend reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyStatus {
    /// The backend executed the statement
    Ok,
    /// The backend reported an error
    Error,
}

/// One reply unit from a backend: opaque payload plus classification
#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    payload: Bytes,
    status: ReplyStatus,
}

impl BackendReply {
    /// Create a reply from its payload and classification
    #[must_use]
    pub fn new(payload: Bytes, status: ReplyStatus) -> Self {
        Self { payload, status }
    }

    /// Shorthand for a successful reply
    #[must_use]
    pub fn ok(payload: Bytes) -> Self {
        Self::new(payload, ReplyStatus::Ok)
    }

    /// Shorthand for an error reply
    #[must_use]
    pub fn error(payload: Bytes) -> Self {
        Self::new(payload, ReplyStatus::Error)
    }

    /// The reply classification
    #[must_use]
    #[inline]
    pub const fn status(&self) -> ReplyStatus {
        self.status
    }

    /// The raw reply bytes
    #[must_use]
    #[inline]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the reply, keeping only the payload
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Whether the backend reported success
    #[must_use]
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, ReplyStatus::Ok)
    }
}
