//! Shard map and per-session shard discovery
//!
//! In sharded topologies each database lives on exactly one backend. At
//! session start every backend is asked to enumerate its databases; the
//! replies are merged into a [`ShardMap`] that routing consults for the
//! rest of the session. A database claimed by two backends is a hard
//! conflict, resolved by the configured [`ShardConflictPolicy`]: abort the
//! session, or exclude the conflicting backend and keep going.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use crate::config::ShardConflictPolicy;
use crate::error::RouterError;
use crate::types::BackendId;

/// Decode a database-enumeration reply payload
///
/// The protocol adapter normalizes enumeration resultsets to one database
/// name per line; order is not significant.
#[must_use]
pub fn parse_database_list(payload: &Bytes) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Mapping from database name to its owning backend
///
/// Built once during discovery, immutable afterwards, dropped with the
/// session. Keys are unique; duplicate ownership never overwrites.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShardMap {
    map: HashMap<String, BackendId>,
}

impl ShardMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend owning `database`, if known
    #[must_use]
    pub fn owner_of(&self, database: &str) -> Option<BackendId> {
        self.map.get(database).copied()
    }

    /// Number of mapped databases
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no databases are mapped
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The databases owned by `backend`, sorted for stable output
    #[must_use]
    pub fn databases_of(&self, backend: BackendId) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .map
            .iter()
            .filter(|(_, owner)| **owner == backend)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    fn insert(&mut self, database: String, owner: BackendId) {
        self.map.insert(database, owner);
    }
}

/// Result of merging one backend's enumeration reply
#[derive(Debug)]
pub enum MergeOutcome {
    /// All names merged; `newly_mapped` were previously unknown
    Clean {
        /// Databases added to the map by this reply
        newly_mapped: usize,
    },
    /// A name collided with an existing owner and the policy excludes the
    /// replying backend; none of its names were inserted. The caller marks
    /// the backend failed and reports the carried error.
    ConflictExcluded {
        /// The duplicate-ownership details
        conflict: RouterError,
    },
}

/// Per-session discovery state machine
///
/// Tracks which backends still owe an enumeration reply and merges replies
/// into the shard map. Discovery is complete when every backend has
/// replied or failed.
#[derive(Debug)]
pub struct ShardDiscovery {
    map: ShardMap,
    policy: ShardConflictPolicy,
    awaiting: HashSet<BackendId>,
    started: bool,
}

impl ShardDiscovery {
    /// Create a discovery run with the given conflict policy
    #[must_use]
    pub fn new(policy: ShardConflictPolicy) -> Self {
        Self {
            map: ShardMap::new(),
            policy,
            awaiting: HashSet::new(),
            started: false,
        }
    }

    /// Register the backends that will be probed
    pub fn start(&mut self, backends: impl IntoIterator<Item = BackendId>) {
        self.awaiting.extend(backends);
        self.started = true;
    }

    /// Whether discovery has started and every backend has replied or
    /// failed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.started && self.awaiting.is_empty()
    }

    /// Whether a reply from `backend` is still expected
    #[must_use]
    pub fn is_awaiting(&self, backend: BackendId) -> bool {
        self.awaiting.contains(&backend)
    }

    /// The map built so far
    #[must_use]
    pub fn map(&self) -> &ShardMap {
        &self.map
    }

    /// Consume the discovery run, keeping the finished map
    #[must_use]
    pub fn into_map(self) -> ShardMap {
        self.map
    }

    /// Merge one backend's enumeration reply
    ///
    /// The reply is merged atomically: with the exclude policy a conflict
    /// keeps all of the replying backend's names out of the map, so a
    /// half-merged backend can never be routed to.
    ///
    /// Returns an error only under the abort policy; the session reports
    /// it to the client as a connection-level failure.
    pub fn on_reply(
        &mut self,
        backend: BackendId,
        databases: Vec<String>,
    ) -> Result<MergeOutcome, RouterError> {
        self.awaiting.remove(&backend);

        // Scan before mutating so an excluded backend leaves no residue
        let conflict = databases.iter().find_map(|name| {
            self.map
                .owner_of(name)
                .filter(|owner| *owner != backend)
                .map(|owner| RouterError::ShardConflict {
                    database: name.clone(),
                    first: owner,
                    second: backend,
                })
        });

        if let Some(conflict) = conflict {
            return match self.policy {
                ShardConflictPolicy::AbortSession => Err(conflict),
                ShardConflictPolicy::ExcludeBackend => {
                    Ok(MergeOutcome::ConflictExcluded { conflict })
                }
            };
        }

        let mut newly_mapped = 0;
        for name in databases {
            if self.map.owner_of(&name).is_none() {
                self.map.insert(name, backend);
                newly_mapped += 1;
            }
        }

        Ok(MergeOutcome::Clean { newly_mapped })
    }

    /// Stop expecting a reply from a failed backend
    pub fn on_backend_failed(&mut self, backend: BackendId) {
        self.awaiting.remove(&backend);
    }
}
