//! The per-client router session
//!
//! [`RouterSession`] owns everything one client connection needs: the
//! backend roster with per-backend command queues, the shard map, the
//! sequence counter and reply watermark, and the pending-statement queue.
//! All mutation happens from a single logical thread of control, driven by
//! [`SessionEvent`]s, so no per-session locking exists anywhere.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{BackendConnection, BackendState};
use crate::config::{BackendRole, RouterConfig};
use crate::error::RouterError;
use crate::router::{ReplicaSelector, RouteTarget, RoutingClassifier, SessionContext};
use crate::session::command::{CommandSequencer, SessionCommand};
use crate::session::pending::PendingQueue;
use crate::shard::{self, MergeOutcome, ShardDiscovery, ShardMap};
use crate::statement::{BackendReply, ReplyStatus, SessionCommandKind, Statement, StatementKind};
use crate::stats::SessionStats;
use crate::transport::{BackendTransport, ClientSink};
use crate::types::{BackendId, SequenceId, SessionId};

/// Events driving one session's state machine
#[derive(Debug)]
pub enum SessionEvent {
    /// A statement arrived from the client
    ClientStatement(Statement),
    /// A backend socket produced one reply unit
    BackendReply {
        /// The replying backend
        backend: BackendId,
        /// The reply
        reply: BackendReply,
    },
    /// The connection-health collaborator declared a backend lost
    BackendFailed {
        /// The lost backend
        backend: BackendId,
        /// Transport-level failure description
        reason: String,
    },
    /// The client connection ended
    Close,
}

/// Result of one dispatch attempt
enum Dispatch {
    /// The statement went out
    Done,
    /// Routing is not possible yet; the statement keeps its queue position
    Requeue(Statement),
}

/// Session-context changes that take effect when the authoritative reply
/// confirms success
#[derive(Debug, Clone, PartialEq, Eq)]
enum ContextUpdate {
    Database(String),
    Autocommit(bool),
}

/// One client session split across multiple backend connections
pub struct RouterSession {
    id: SessionId,
    config: RouterConfig,
    classifier: RoutingClassifier,
    selector: ReplicaSelector,
    backends: Vec<BackendConnection>,
    sequencer: CommandSequencer,
    pending: PendingQueue,
    ctx: SessionContext,
    /// Present while discovery is running; replaced by `shards` on
    /// completion
    discovery: Option<ShardDiscovery>,
    shards: Option<ShardMap>,
    /// Database the client asked for at connect time, resolved against the
    /// shard map once discovery finishes
    connect_database: Option<String>,
    /// Backend currently receiving a bulk-load stream
    load_target: Option<BackendId>,
    /// Context updates keyed by the session command that carries them
    context_updates: HashMap<SequenceId, ContextUpdate>,
    stats: SessionStats,
    closed: bool,
    transport: Arc<dyn BackendTransport>,
    client: Arc<dyn ClientSink>,
}

impl std::fmt::Debug for RouterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterSession")
            .field("id", &self.id)
            .field("backends", &self.backends)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl RouterSession {
    /// Create a session over the configured backend roster
    pub fn new(
        config: RouterConfig,
        transport: Arc<dyn BackendTransport>,
        client: Arc<dyn ClientSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let backends = config
            .backends
            .iter()
            .enumerate()
            .map(|(index, b)| BackendConnection::new(BackendId::from_index(index), &b.name))
            .collect();

        Ok(Self {
            id: SessionId::new(),
            classifier: RoutingClassifier::new(&config),
            selector: ReplicaSelector::new(),
            backends,
            sequencer: CommandSequencer::new(),
            pending: PendingQueue::new(config.max_pending_statements),
            ctx: SessionContext::default(),
            discovery: None,
            shards: None,
            connect_database: None,
            load_target: None,
            context_updates: HashMap::new(),
            stats: SessionStats::new(),
            closed: false,
            config,
            transport,
            client,
        })
    }

    /// Set the database the client asked for at connect time
    #[must_use]
    pub fn with_connect_database(mut self, database: impl Into<String>) -> Self {
        self.connect_database = Some(database.into());
        self
    }

    /// The session's unique id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the session has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The session-level classification context
    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Record a transaction boundary observed by the protocol layer
    pub fn set_transaction_open(&mut self, open: bool) {
        self.ctx.transaction_open = open;
    }

    /// The shard map, once discovery has completed
    #[must_use]
    pub fn shard_map(&self) -> Option<&ShardMap> {
        self.shards.as_ref()
    }

    /// Readiness state of one backend
    #[must_use]
    pub fn backend_state(&self, backend: BackendId) -> Option<BackendState> {
        self.backends.get(backend.as_index()).map(|b| b.state())
    }

    /// Number of statements parked in the pending queue
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The last sequence id whose reply reached the client
    #[must_use]
    pub fn highest_replied(&self) -> SequenceId {
        self.sequencer.highest_replied()
    }

    /// The session's accumulated statistics
    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Begin routing: run shard discovery if the topology requires it,
    /// otherwise mark every backend ready immediately
    pub async fn start(&mut self) -> Result<(), RouterError> {
        if self.config.routing_mode.requires_discovery() {
            self.start_discovery().await
        } else {
            for backend in &mut self.backends {
                // Uninitialized -> Ready never fails
                let _ = backend.mark_ready();
            }
            debug!(session = %self.id, "Session ready, no discovery required");
            Ok(())
        }
    }

    async fn start_discovery(&mut self) -> Result<(), RouterError> {
        let probe = Bytes::from(self.config.discovery_probe.clone());
        let mut discovery = ShardDiscovery::new(self.config.conflict_policy);
        discovery.start(self.backends.iter().map(BackendConnection::id));
        self.discovery = Some(discovery);

        info!(session = %self.id, probe = %self.config.discovery_probe, "Starting shard discovery");

        for index in 0..self.backends.len() {
            // Uninitialized -> Discovering never fails at session start
            let _ = self.backends[index].begin_discovery();
            self.send_to(index, probe.clone()).await?;
        }

        self.try_finish_discovery().await
    }

    /// Handle one event; the error return is fatal to the session
    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<(), RouterError> {
        match event {
            SessionEvent::ClientStatement(statement) => self.route_statement(statement).await,
            SessionEvent::BackendReply { backend, reply } => {
                self.on_backend_reply(backend, reply).await
            }
            SessionEvent::BackendFailed { backend, reason } => {
                self.on_backend_failed(backend, &reason).await
            }
            SessionEvent::Close => {
                self.close().await;
                Ok(())
            }
        }
    }

    /// Drive the session from an event channel until it closes
    ///
    /// This is the session's single logical thread of control: events are
    /// consumed strictly one at a time.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> Result<(), RouterError> {
        if let Err(err) = self.start().await {
            self.close().await;
            return Err(err);
        }

        while let Some(event) = events.recv().await {
            let closing = matches!(event, SessionEvent::Close);
            if let Err(err) = self.handle_event(event).await {
                self.close().await;
                return Err(err);
            }
            if closing {
                break;
            }
        }

        if !self.closed {
            self.close().await;
        }
        Ok(())
    }

    /// Route one client statement
    pub async fn route_statement(&mut self, statement: Statement) -> Result<(), RouterError> {
        if self.closed {
            warn!(session = %self.id, "Statement received after session close, dropping");
            return Err(RouterError::SessionClosed);
        }

        // Mid bulk-load, every client frame is raw stream data
        if let Some(target) = self.load_target {
            self.stream_load_frame(target, statement).await?;
            return self.drain_pending().await;
        }

        if self.discovery.is_some() || !self.pending.is_empty() {
            self.park(statement).await?;
        } else {
            match self.dispatch(statement).await {
                Ok(Dispatch::Done) => {}
                Ok(Dispatch::Requeue(statement)) => self.park(statement).await?,
                Err(err) => self.report(err).await?,
            }
        }

        self.drain_pending().await
    }

    async fn park(&mut self, statement: Statement) -> Result<(), RouterError> {
        self.stats.queued_statements += 1;
        if let Err(err) = self.pending.push(statement) {
            return self.report(err).await;
        }
        debug!(
            session = %self.id,
            queued = self.pending.len(),
            "Statement parked until routing is possible"
        );
        Ok(())
    }

    /// Classify and dispatch one statement
    async fn dispatch(&mut self, statement: Statement) -> Result<Dispatch, RouterError> {
        let target = self
            .classifier
            .classify(&statement, &self.ctx, self.shards.as_ref())?;

        match target {
            RouteTarget::All => self.route_session_write(statement).await,
            RouteTarget::Named(backend) => self.route_to_backend(backend, statement).await,
            RouteTarget::Any => self.route_to_any(statement).await,
        }
    }

    /// Fan a session command out to every live backend
    async fn route_session_write(&mut self, statement: Statement) -> Result<Dispatch, RouterError> {
        // A failed backend leaves the all-set for good; the rest must all
        // be ready. A streaming backend's outstanding load reply does not
        // block the fan-out, its bytes are simply deferred.
        let mut ready: SmallVec<[usize; 4]> = SmallVec::new();
        for backend in &self.backends {
            match backend.state() {
                BackendState::Failed | BackendState::Closed => continue,
                BackendState::Ready => {
                    if backend.is_awaiting_forward() && !backend.is_streaming() {
                        return Ok(Dispatch::Requeue(statement));
                    }
                    ready.push(backend.id().as_index());
                }
                BackendState::Uninitialized | BackendState::Discovering => {
                    return Ok(Dispatch::Requeue(statement));
                }
            }
        }

        if ready.is_empty() {
            return Err(RouterError::NoBackendAvailable {
                target: "all backends".to_string(),
            });
        }

        let kind = match statement.kind() {
            StatementKind::Session(kind) => kind,
            _ => unreachable!("target All is only produced for session commands"),
        };

        // One id per fan-out, however many backends receive a copy
        let sequence = self.sequencer.next_id();
        if let Some(update) = context_update_for(kind, &statement) {
            self.context_updates.insert(sequence, update);
        }

        let payload = statement.into_payload();
        self.stats.session_commands += 1;

        debug!(
            session = %self.id,
            %sequence,
            command = %kind,
            backends = ready.len(),
            "Replicating session command"
        );

        for index in ready {
            if kind.expects_response() {
                let command = SessionCommand::new(sequence, kind, payload.clone());
                self.backends[index].queue_mut().push(command);
                let len = self.backends[index].queue().len();
                self.stats.observe_queue_len(len);
            }

            if self.backends[index].is_streaming() {
                self.backends[index].defer_write(payload.clone());
            } else {
                self.send_to(index, payload.clone()).await?;
            }
        }

        Ok(Dispatch::Done)
    }

    /// Dispatch a statement to exactly one backend, outside the session
    /// command protocol
    async fn route_to_backend(
        &mut self,
        backend: BackendId,
        statement: Statement,
    ) -> Result<Dispatch, RouterError> {
        let index = backend.as_index();
        let Some(target) = self.backends.get(index) else {
            return Err(RouterError::NoBackendAvailable {
                target: backend.to_string(),
            });
        };

        match target.state() {
            BackendState::Failed | BackendState::Closed => {
                return Err(RouterError::NoBackendAvailable {
                    target: format!("{} ({})", backend, target.name()),
                });
            }
            BackendState::Uninitialized | BackendState::Discovering => {
                return Ok(Dispatch::Requeue(statement));
            }
            BackendState::Ready => {}
        }

        // The backend must have drained its session commands and have no
        // other statement in flight, so its next reply is unambiguous
        if !target.is_synchronized() || target.is_awaiting_forward() || target.is_streaming() {
            return Ok(Dispatch::Requeue(statement));
        }

        let starts_load = matches!(statement.kind(), StatementKind::BeginLoad);
        match statement.kind() {
            StatementKind::Read => self.stats.reads += 1,
            _ => self.stats.writes += 1,
        }

        let target = &mut self.backends[index];
        target.expect_forward();
        if starts_load {
            target
                .begin_load_stream()
                .expect("guarded: backend is ready and not streaming");
            self.load_target = Some(backend);
            debug!(session = %self.id, %backend, "Bulk load started");
        }

        self.send_to(index, statement.into_payload()).await?;
        Ok(Dispatch::Done)
    }

    /// Load-balance a read across eligible replicas
    async fn route_to_any(&mut self, statement: Statement) -> Result<Dispatch, RouterError> {
        let eligible: SmallVec<[BackendId; 4]> = self
            .backends
            .iter()
            .filter(|b| {
                b.is_routable()
                    && b.is_synchronized()
                    && !b.is_awaiting_forward()
                    && !b.is_streaming()
                    && self.config.backends[b.id().as_index()].role == BackendRole::Replica
            })
            .map(BackendConnection::id)
            .collect();

        if let Some(choice) = self.selector.select(&eligible) {
            return self.route_to_backend(choice, statement).await;
        }

        // No replica can take it right now; fall back to the primary if it
        // is free, otherwise wait
        if let Some(primary) = self.config.primary() {
            let p = &self.backends[primary.as_index()];
            if p.is_routable()
                && p.is_synchronized()
                && !p.is_awaiting_forward()
                && !p.is_streaming()
            {
                return self.route_to_backend(primary, statement).await;
            }
        }

        if self.backends.iter().any(|b| !b.state().is_terminal()) {
            Ok(Dispatch::Requeue(statement))
        } else {
            Err(RouterError::NoBackendAvailable {
                target: "any replica".to_string(),
            })
        }
    }

    /// Forward one raw bulk-load frame to the load target
    async fn stream_load_frame(
        &mut self,
        target: BackendId,
        statement: Statement,
    ) -> Result<(), RouterError> {
        let index = target.as_index();
        let ends_stream = statement.is_empty_frame();

        // The empty frame is forwarded too; it is the server's end marker
        self.send_to(index, statement.into_payload()).await?;

        if ends_stream && self.backends[index].is_streaming() {
            let deferred = self.backends[index]
                .end_load_stream()
                .expect("guarded: backend is streaming");
            self.load_target = None;
            debug!(
                session = %self.id,
                backend = %target,
                deferred = deferred.len(),
                "Bulk load finished, flushing deferred writes"
            );
            for bytes in deferred {
                self.send_to(index, bytes).await?;
            }
        }
        Ok(())
    }

    /// Handle one reply unit from a backend
    pub async fn on_backend_reply(
        &mut self,
        backend: BackendId,
        reply: BackendReply,
    ) -> Result<(), RouterError> {
        if self.closed {
            debug!(session = %self.id, %backend, "Reply after close, dropping");
            return Ok(());
        }

        let index = backend.as_index();
        let Some(state) = self.backends.get(index).map(BackendConnection::state) else {
            debug!(session = %self.id, %backend, "Reply from unknown backend, dropping");
            return Ok(());
        };

        match state {
            // A failed backend is one that "will never reply"; a late
            // reply that still arrives is dropped
            BackendState::Failed | BackendState::Closed => {
                debug!(session = %self.id, %backend, "Reply from excluded backend, dropping");
                Ok(())
            }
            BackendState::Discovering => {
                self.on_discovery_reply(index, reply).await?;
                self.drain_pending().await
            }
            BackendState::Ready | BackendState::Uninitialized => {
                if self.backends[index].take_forward_expectation() {
                    // Directly-routed statement: its reply goes straight
                    // through
                    self.forward_to_client(reply.into_payload()).await;
                } else if !self.backends[index].queue().is_empty() {
                    self.on_session_command_reply(index, reply).await?;
                } else {
                    let err = RouterError::ProtocolDesync { backend };
                    self.fail_backend(index, "protocol desynchronization").await?;
                    self.report(err).await?;
                }
                self.drain_pending().await
            }
        }
    }

    /// Correlate a reply against the backend's session command queue
    async fn on_session_command_reply(
        &mut self,
        index: usize,
        reply: BackendReply,
    ) -> Result<(), RouterError> {
        let backend = self.backends[index].id();
        let mut head = self.backends[index]
            .queue_mut()
            .pop_head()
            .expect("caller checked the queue is non-empty");
        head.mark_reply_received();
        let sequence = head.sequence_id();
        let status = reply.status();

        if self.sequencer.is_unforwarded(sequence) {
            // First arrival for this id: this backend is authoritative
            if status == ReplyStatus::Error {
                warn!(
                    session = %self.id,
                    %backend,
                    %sequence,
                    command = %head.kind(),
                    "Session command failed on authoritative backend"
                );
            }
            self.sequencer.mark_forwarded(sequence, status);
            if let Some(update) = self.context_updates.remove(&sequence) {
                if status == ReplyStatus::Ok {
                    self.apply_context_update(update);
                }
            }
            debug!(
                session = %self.id,
                %backend,
                %sequence,
                "Forwarding authoritative session command reply"
            );
            self.forward_to_client(reply.into_payload()).await;
        } else {
            // A slower backend catching up to an id the client has already
            // seen: verify agreement, never forward
            self.stats.discarded_replies += 1;
            if let Some(expected) = self.sequencer.forwarded_status(sequence) {
                if expected != status {
                    self.stats.reply_mismatches += 1;
                    let err = RouterError::ReplyMismatch {
                        backend,
                        sequence,
                        expected,
                        actual: status,
                    };
                    // Logged, not forwarded: the side effect may already
                    // have applied on the authoritative backend
                    self.report(err).await?;
                }
            }
            debug!(
                session = %self.id,
                %backend,
                %sequence,
                "Discarding verified session command reply"
            );
        }

        self.prune_forwarded();
        Ok(())
    }

    /// Merge a database-enumeration reply into the shard map
    async fn on_discovery_reply(
        &mut self,
        index: usize,
        reply: BackendReply,
    ) -> Result<(), RouterError> {
        let backend = self.backends[index].id();

        if !reply.is_ok() {
            warn!(session = %self.id, %backend, "Discovery probe failed");
            if let Some(discovery) = self.discovery.as_mut() {
                discovery.on_backend_failed(backend);
            }
            self.fail_backend(index, "discovery probe failed").await?;
            return self.try_finish_discovery().await;
        }

        let databases = shard::parse_database_list(reply.payload());
        debug!(
            session = %self.id,
            %backend,
            databases = databases.len(),
            "Discovery reply received"
        );

        let outcome = self
            .discovery
            .as_mut()
            .expect("discovery reply only arrives while discovering")
            .on_reply(backend, databases);

        match outcome {
            Ok(MergeOutcome::Clean { newly_mapped }) => {
                debug!(session = %self.id, %backend, newly_mapped, "Shard map merge clean");
                let _ = self.backends[index].mark_ready();
            }
            Ok(MergeOutcome::ConflictExcluded { conflict }) => {
                // Policy says drop the conflicting backend and keep going
                self.report(conflict).await?;
                self.fail_backend(index, "duplicate database ownership").await?;
            }
            Err(conflict) => {
                // Abort policy: the whole session fails
                let _ = self.client.deliver_error(&conflict).await;
                return Err(conflict);
            }
        }

        self.try_finish_discovery().await
    }

    /// Complete discovery once every backend has replied or failed
    async fn try_finish_discovery(&mut self) -> Result<(), RouterError> {
        let complete = self
            .discovery
            .as_ref()
            .is_some_and(ShardDiscovery::is_complete);
        if !complete {
            return Ok(());
        }

        let discovery = self.discovery.take().expect("checked above");
        let map = discovery.into_map();
        info!(session = %self.id, databases = map.len(), "Shard discovery complete");

        if !self.backends.iter().any(BackendConnection::is_routable) {
            let err = RouterError::NoBackendAvailable {
                target: "any backend after discovery".to_string(),
            };
            let _ = self.client.deliver_error(&err).await;
            return Err(err);
        }

        // Resolve the database the client connected with
        if let Some(database) = self.connect_database.take() {
            if map.owner_of(&database).is_some() {
                self.ctx.current_database = Some(database);
            } else {
                let err = RouterError::DatabaseNotFound { database };
                self.report(err).await?;
            }
        }

        self.shards = Some(map);
        Ok(())
    }

    /// Handle the loss of a backend
    pub async fn on_backend_failed(
        &mut self,
        backend: BackendId,
        reason: &str,
    ) -> Result<(), RouterError> {
        if self.closed {
            return Ok(());
        }
        let index = backend.as_index();
        if index >= self.backends.len() {
            return Ok(());
        }

        if let Some(discovery) = self.discovery.as_mut() {
            discovery.on_backend_failed(backend);
        }
        self.fail_backend(index, reason).await?;
        self.try_finish_discovery().await?;
        self.drain_pending().await
    }

    /// Exclude a backend from routing and from correlation accounting
    ///
    /// Outstanding commands held only by this backend will never resolve;
    /// the client gets an error for each and the watermark skips past
    /// them so replies from the remaining backends keep flowing.
    async fn fail_backend(&mut self, index: usize, reason: &str) -> Result<(), RouterError> {
        let backend = self.backends[index].id();
        if self.backends[index].mark_failed(reason).is_err() {
            // Already closed
            return Ok(());
        }

        if self.load_target == Some(backend) {
            self.load_target = None;
        }

        let owed_forward = self.backends[index].take_forward_expectation();
        let orphaned = self.backends[index].queue_mut().drain();

        if owed_forward {
            let err = RouterError::BackendFailed {
                backend,
                reason: reason.to_string(),
            };
            let _ = self.client.deliver_error(&err).await;
        }

        for command in orphaned {
            let sequence = command.sequence_id();
            if !self.sequencer.is_unforwarded(sequence) {
                continue;
            }
            let held_elsewhere = self
                .backends
                .iter()
                .filter(|b| !b.state().is_terminal())
                .any(|b| b.queue().holds(sequence));
            if held_elsewhere {
                continue;
            }

            // Last holder gone: the statement resolves as an error, never
            // silence
            warn!(
                session = %self.id,
                %backend,
                %sequence,
                "Session command lost its last backend, reporting error"
            );
            let err = RouterError::BackendFailed {
                backend,
                reason: reason.to_string(),
            };
            let _ = self.client.deliver_error(&err).await;
            self.sequencer.skip(sequence);
            self.context_updates.remove(&sequence);
        }

        self.prune_forwarded();

        if !self.backends.iter().any(|b| !b.state().is_terminal()) {
            let err = RouterError::NoBackendAvailable {
                target: "any backend".to_string(),
            };
            let _ = self.client.deliver_error(&err).await;
            return Err(err);
        }

        Ok(())
    }

    /// Close the session, releasing all backend-held resources
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let dropped = self.pending.clear();
        if dropped > 0 {
            warn!(session = %self.id, dropped, "Discarding pending statements at close");
        }

        for backend in &mut self.backends {
            let outstanding = backend.queue_mut().drain();
            if !outstanding.is_empty() {
                debug!(
                    session = %self.id,
                    backend = %backend.id(),
                    outstanding = outstanding.len(),
                    "Discarding outstanding session commands at close"
                );
            }
            backend.close();
        }

        self.discovery = None;
        self.load_target = None;
        self.context_updates.clear();
        self.stats.log_at_close(self.id);
    }

    /// Re-run queued statements through the classifier, oldest first
    ///
    /// Stops at the first statement that still cannot be dispatched so no
    /// statement overtakes an earlier arrival.
    async fn drain_pending(&mut self) -> Result<(), RouterError> {
        while !self.closed && self.discovery.is_none() {
            let Some(statement) = self.pending.pop() else {
                break;
            };
            match self.dispatch(statement).await {
                Ok(Dispatch::Done) => {}
                Ok(Dispatch::Requeue(statement)) => {
                    self.pending.requeue_front(statement);
                    break;
                }
                // A failed statement is reported and the queue keeps
                // draining; later statements are independent of it
                Err(err) => self.report(err).await?,
            }
        }
        Ok(())
    }

    async fn send_to(&mut self, index: usize, bytes: Bytes) -> Result<(), RouterError> {
        let backend = self.backends[index].id();
        let transport = Arc::clone(&self.transport);
        if let Err(err) = transport.send(backend, bytes).await {
            warn!(session = %self.id, %backend, error = %err, "Backend send failed");
            if let Some(discovery) = self.discovery.as_mut() {
                discovery.on_backend_failed(backend);
            }
            self.fail_backend(index, &err.to_string()).await?;
        }
        Ok(())
    }

    async fn forward_to_client(&mut self, payload: Bytes) {
        if let Err(err) = self.client.deliver(payload).await {
            warn!(session = %self.id, error = %err, "Client delivery failed");
        }
    }

    fn apply_context_update(&mut self, update: ContextUpdate) {
        match update {
            ContextUpdate::Database(database) => {
                debug!(session = %self.id, %database, "Default database changed");
                self.ctx.current_database = Some(database);
            }
            ContextUpdate::Autocommit(enable) => {
                debug!(session = %self.id, enable, "Autocommit changed");
                self.ctx.autocommit = enable;
            }
        }
    }

    /// Drop retained reply statuses no live backend can still catch up to
    fn prune_forwarded(&mut self) {
        let floor = self
            .backends
            .iter()
            .filter(|b| !b.state().is_terminal())
            .filter_map(|b| b.queue().head_sequence())
            .min()
            .unwrap_or_else(|| self.sequencer.highest_replied().next());
        self.sequencer.prune_below(floor);
    }

    /// Log an error, surface it to the client when visible, and escalate
    /// only fatal ones
    async fn report(&mut self, err: RouterError) -> Result<(), RouterError> {
        log_router_error(self.id, &err);
        if err.is_client_visible() {
            if let Err(delivery) = self.client.deliver_error(&err).await {
                warn!(session = %self.id, error = %delivery, "Client error delivery failed");
            }
        }
        if err.is_fatal() { Err(err) } else { Ok(()) }
    }
}

fn context_update_for(kind: SessionCommandKind, statement: &Statement) -> Option<ContextUpdate> {
    match kind {
        SessionCommandKind::ChangeDatabase => statement
            .target_database()
            .map(|db| ContextUpdate::Database(db.to_string())),
        SessionCommandKind::Autocommit { enable } => Some(ContextUpdate::Autocommit(enable)),
        _ => None,
    }
}

fn log_router_error(session: SessionId, err: &RouterError) {
    let level = err.log_level();
    if level == tracing::Level::ERROR {
        tracing::error!(%session, error = %err, "Router error");
    } else if level == tracing::Level::WARN {
        tracing::warn!(%session, error = %err, "Router warning");
    } else {
        tracing::debug!(%session, error = %err, "Router notice");
    }
}
