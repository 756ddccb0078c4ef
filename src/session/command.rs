//! Session command sequencing
//!
//! A session command is a statement whose side effects must be replicated
//! identically to every backend serving one client session. Each backend
//! holds its own copy in a FIFO [`SessionCommandQueue`]; the session-wide
//! [`CommandSequencer`] allocates sequence ids and tracks the last reply
//! forwarded to the client.

use std::collections::HashMap;

use bytes::Bytes;

use crate::statement::{ReplyStatus, SessionCommandKind};
use crate::types::SequenceId;

/// One per-backend copy of a replicated session command
///
/// Copies created for a fan-out share the same sequence id and the same
/// refcounted payload bytes; the reply flag is per backend.
#[derive(Debug, Clone)]
pub struct SessionCommand {
    sequence_id: SequenceId,
    kind: SessionCommandKind,
    payload: Bytes,
    reply_received: bool,
}

impl SessionCommand {
    /// Create a new session command
    ///
    /// The payload buffer is shared, not copied; use
    /// [`SessionCommand::deep_copy_payload`] when an independent buffer is
    /// needed.
    #[must_use]
    pub fn new(sequence_id: SequenceId, kind: SessionCommandKind, payload: Bytes) -> Self {
        Self {
            sequence_id,
            kind,
            payload,
            reply_received: false,
        }
    }

    /// The position of this command within the session
    #[must_use]
    #[inline]
    pub const fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    /// The command kind
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> SessionCommandKind {
        self.kind
    }

    /// The command payload
    #[must_use]
    #[inline]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether this backend has replied to the command
    #[must_use]
    #[inline]
    pub const fn is_reply_received(&self) -> bool {
        self.reply_received
    }

    /// Mark the reply as received
    ///
    /// Transitions false to true exactly once over the command's lifetime.
    pub fn mark_reply_received(&mut self) {
        debug_assert!(!self.reply_received, "reply marked received twice");
        self.reply_received = true;
    }

    /// Create an independent copy of the payload bytes
    #[must_use]
    pub fn deep_copy_payload(&self) -> Bytes {
        Bytes::copy_from_slice(&self.payload)
    }
}

/// Per-backend FIFO of outstanding session commands
///
/// Replies from one backend arrive strictly in send order, so a reply is
/// only ever matched against the queue head.
#[derive(Debug, Default)]
pub struct SessionCommandQueue {
    commands: std::collections::VecDeque<SessionCommand>,
}

impl SessionCommandQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command at the tail
    pub fn push(&mut self, command: SessionCommand) {
        self.commands.push_back(command);
    }

    /// Remove and return the head command
    pub fn pop_head(&mut self) -> Option<SessionCommand> {
        self.commands.pop_front()
    }

    /// The head command, if any
    #[must_use]
    pub fn head(&self) -> Option<&SessionCommand> {
        self.commands.front()
    }

    /// The sequence id of the head command
    #[must_use]
    pub fn head_sequence(&self) -> Option<SequenceId> {
        self.commands.front().map(SessionCommand::sequence_id)
    }

    /// Whether any id in the queue equals `id`
    #[must_use]
    pub fn holds(&self, id: SequenceId) -> bool {
        self.commands.iter().any(|c| c.sequence_id() == id)
    }

    /// Number of outstanding commands
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the queue is empty
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop all outstanding commands, returning them for accounting
    pub fn drain(&mut self) -> Vec<SessionCommand> {
        self.commands.drain(..).collect()
    }
}

/// Session-wide sequence allocation and reply watermark
///
/// Shared across all backend queues of one session. The watermark
/// (`highest_replied`) gates at-most-once forwarding: the first backend to
/// reply for `highest_replied + 1` becomes authoritative, every later
/// arrival for the same id is verified and discarded.
#[derive(Debug, Default)]
pub struct CommandSequencer {
    highest_sent: SequenceId,
    highest_replied: SequenceId,
    /// Status of each forwarded reply, kept until every live backend has
    /// drained past its id so late arrivals can be verified against it
    forwarded: HashMap<SequenceId, ReplyStatus>,
}

impl CommandSequencer {
    /// Create a sequencer with no commands sent
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next sequence id
    ///
    /// Called once per fan-out regardless of how many backends receive a
    /// copy of the command.
    pub fn next_id(&mut self) -> SequenceId {
        self.highest_sent = self.highest_sent.next();
        self.highest_sent
    }

    /// The latest allocated sequence id
    #[must_use]
    #[inline]
    pub const fn highest_sent(&self) -> SequenceId {
        self.highest_sent
    }

    /// The last sequence id whose reply was forwarded to the client
    #[must_use]
    #[inline]
    pub const fn highest_replied(&self) -> SequenceId {
        self.highest_replied
    }

    /// Whether a reply for `id` would be the first to reach the client
    #[must_use]
    pub fn is_unforwarded(&self, id: SequenceId) -> bool {
        id > self.highest_replied
    }

    /// Record that the reply for `id` was forwarded with `status`
    ///
    /// Advances the watermark. `id` may skip over ids that became
    /// unanswerable when their last holder failed.
    pub fn mark_forwarded(&mut self, id: SequenceId, status: ReplyStatus) {
        debug_assert!(id > self.highest_replied, "watermark moved backwards");
        self.highest_replied = self.highest_replied.max(id);
        self.forwarded.insert(id, status);
    }

    /// Advance the watermark past an id that will never receive a reply
    pub fn skip(&mut self, id: SequenceId) {
        self.highest_replied = self.highest_replied.max(id);
    }

    /// The status forwarded for `id`, if it is still retained
    #[must_use]
    pub fn forwarded_status(&self, id: SequenceId) -> Option<ReplyStatus> {
        self.forwarded.get(&id).copied()
    }

    /// Drop retained statuses below `floor`
    ///
    /// `floor` is the lowest sequence id still outstanding on any live
    /// backend; statuses below it can no longer be compared against.
    pub fn prune_below(&mut self, floor: SequenceId) {
        self.forwarded.retain(|id, _| *id >= floor);
    }

    /// Number of retained forwarded statuses
    #[must_use]
    pub fn retained(&self) -> usize {
        self.forwarded.len()
    }
}
