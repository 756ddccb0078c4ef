//! Session-consistent read/write-splitting and shard-routing proxy core
//!
//! This crate is the session-consistency core of a database-proxy router:
//! it lets one client connection be transparently split across multiple
//! backend database connections while keeping every backend's session
//! state (current database, prepared statements, session variables,
//! autocommit, temporary tables) identical, even though backends reply
//! asynchronously and in arbitrary order.
//!
//! # What lives here
//!
//! - the session-command sequencing and reply-correlation protocol that
//!   fans a session-affecting statement out to every backend and forwards
//!   exactly one authoritative reply to the client ([`session`]);
//! - the per-backend readiness state machine that gates when ordinary
//!   routing is allowed ([`backend`]);
//! - the routing-target classification deciding which backend(s) receive
//!   each statement ([`router`]);
//! - per-session shard discovery for non-uniform topologies ([`shard`]).
//!
//! Wire-format parsing, connection establishment and query classification
//! are external collaborators: statements arrive as opaque bytes plus an
//! already-classified kind, and leave through the [`transport`] traits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dbsplit::{RouterConfig, RouterSession, SessionEvent};
//!
//! # async fn example(
//! #     transport: Arc<dyn dbsplit::transport::BackendTransport>,
//! #     client: Arc<dyn dbsplit::transport::ClientSink>,
//! # ) -> anyhow::Result<()> {
//! let config = RouterConfig::load("router.toml")?;
//! let session = RouterSession::new(config, transport, client)?;
//!
//! let (events, rx) = tokio::sync::mpsc::channel::<SessionEvent>(64);
//! tokio::spawn(session.run(rx));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod router;
pub mod session;
pub mod shard;
pub mod statement;
pub mod stats;
pub mod transport;
pub mod types;

pub use config::{BackendConfig, BackendRole, RouterConfig, RoutingMode, ShardConflictPolicy};
pub use error::RouterError;
pub use router::{RouteTarget, RoutingClassifier, SessionContext};
pub use session::{RouterSession, SessionEvent};
pub use shard::ShardMap;
pub use statement::{
    BackendReply, ReplyStatus, RoutingHint, SessionCommandKind, Statement, StatementKind,
};
pub use types::{BackendId, SequenceId, SessionId};
