//! Transport boundary traits
//!
//! The session core never touches sockets. It dispatches statement bytes to
//! a [`BackendTransport`] and delivers authoritative replies (or
//! client-visible errors) through a [`ClientSink`]. Protocol adapters
//! implement both over their actual connections.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::error::RouterError;
use crate::types::BackendId;

/// Errors surfaced by transport implementations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The connection to the peer is gone
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The write could not be completed
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Outbound path to the backend servers
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Send raw statement bytes to one backend
    async fn send(&self, backend: BackendId, bytes: Bytes) -> Result<(), TransportError>;
}

/// Outbound path to the client
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Deliver reply bytes to the client; called exactly once per forwarded
    /// reply
    async fn deliver(&self, bytes: Bytes) -> Result<(), TransportError>;

    /// Report a client-visible error; the protocol adapter encodes it as an
    /// error frame in its own wire format
    async fn deliver_error(&self, error: &RouterError) -> Result<(), TransportError>;
}

pub mod mock {
    //! Recording transport doubles for tests
    //!
    //! Exported so integration tests can drive a session without sockets.

    use std::sync::Mutex;

    use super::*;

    /// Records every dispatched (backend, bytes) pair
    #[derive(Debug, Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<(BackendId, Bytes)>>,
        fail_backends: Mutex<Vec<BackendId>>,
    }

    impl RecordingTransport {
        /// Create an empty recording transport
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make sends to the given backend fail with `ConnectionLost`
        pub fn fail_backend(&self, backend: BackendId) {
            self.fail_backends.lock().unwrap().push(backend);
        }

        /// Everything sent so far, in dispatch order
        #[must_use]
        pub fn sent(&self) -> Vec<(BackendId, Bytes)> {
            self.sent.lock().unwrap().clone()
        }

        /// Bytes sent to one backend, in dispatch order
        #[must_use]
        pub fn sent_to(&self, backend: BackendId) -> Vec<Bytes> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| *id == backend)
                .map(|(_, bytes)| bytes.clone())
                .collect()
        }
    }

    #[async_trait]
    impl BackendTransport for RecordingTransport {
        async fn send(&self, backend: BackendId, bytes: Bytes) -> Result<(), TransportError> {
            if self.fail_backends.lock().unwrap().contains(&backend) {
                return Err(TransportError::ConnectionLost(format!(
                    "mock failure on {}",
                    backend
                )));
            }
            self.sent.lock().unwrap().push((backend, bytes));
            Ok(())
        }
    }

    /// Records everything delivered to the client
    #[derive(Debug, Default)]
    pub struct RecordingClient {
        delivered: Mutex<Vec<Bytes>>,
        errors: Mutex<Vec<String>>,
    }

    impl RecordingClient {
        /// Create an empty recording client sink
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Replies delivered so far, in order
        #[must_use]
        pub fn delivered(&self) -> Vec<Bytes> {
            self.delivered.lock().unwrap().clone()
        }

        /// Rendered error messages delivered so far, in order
        #[must_use]
        pub fn errors(&self) -> Vec<String> {
            self.errors.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClientSink for RecordingClient {
        async fn deliver(&self, bytes: Bytes) -> Result<(), TransportError> {
            self.delivered.lock().unwrap().push(bytes);
            Ok(())
        }

        async fn deliver_error(&self, error: &RouterError) -> Result<(), TransportError> {
            self.errors.lock().unwrap().push(error.to_string());
            Ok(())
        }
    }
}
