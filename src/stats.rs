//! Per-session routing statistics
//!
//! Counters are plain integers: a session mutates its own statistics from
//! its single thread of control, so no atomics are needed.

/// Counters accumulated over the lifetime of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Read statements routed to a single backend
    pub reads: u64,
    /// Write statements routed to a single backend
    pub writes: u64,
    /// Session commands fanned out to all backends
    pub session_commands: u64,
    /// Replies verified against an already-forwarded reply and discarded
    pub discarded_replies: u64,
    /// Replies that disagreed with the forwarded reply's status
    pub reply_mismatches: u64,
    /// Statements held in the pending queue at least once
    pub queued_statements: u64,
    /// Longest observed per-backend session command queue
    pub longest_queue: usize,
}

impl SessionStats {
    /// Create zeroed statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new queue length observation
    #[inline]
    pub fn observe_queue_len(&mut self, len: usize) {
        self.longest_queue = self.longest_queue.max(len);
    }

    /// Total statements routed through the session
    #[must_use]
    pub const fn total_routed(&self) -> u64 {
        self.reads + self.writes + self.session_commands
    }

    /// Log the final counters at session close
    pub fn log_at_close(&self, session: crate::types::SessionId) {
        tracing::info!(
            %session,
            reads = self.reads,
            writes = self.writes,
            session_commands = self.session_commands,
            discarded_replies = self.discarded_replies,
            reply_mismatches = self.reply_mismatches,
            queued_statements = self.queued_statements,
            longest_queue = self.longest_queue,
            "Session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_start_at_zero() {
        let stats = SessionStats::new();
        assert_eq!(stats.total_routed(), 0);
        assert_eq!(stats.longest_queue, 0);
    }

    #[test]
    fn test_total_routed_sums_categories() {
        let stats = SessionStats {
            reads: 3,
            writes: 2,
            session_commands: 4,
            ..SessionStats::default()
        };
        assert_eq!(stats.total_routed(), 9);
    }

    #[test]
    fn test_observe_queue_len_keeps_max() {
        let mut stats = SessionStats::new();
        stats.observe_queue_len(2);
        stats.observe_queue_len(5);
        stats.observe_queue_len(3);
        assert_eq!(stats.longest_queue, 5);
    }
}
