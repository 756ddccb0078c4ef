//! Configuration module
//!
//! This module handles all configuration types and loading for the
//! session-consistency router.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::types::BackendId;

/// Routing mode for the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Uniform backends: reads load-balance across replicas, writes go to
    /// the primary
    ReadWriteSplit,
    /// Non-uniform backends: each database lives on exactly one backend and
    /// targets are resolved through a discovered shard map
    Sharded,
}

impl Default for RoutingMode {
    fn default() -> Self {
        Self::ReadWriteSplit
    }
}

impl RoutingMode {
    /// Whether sessions in this mode run shard discovery before routing
    #[must_use]
    pub const fn requires_discovery(&self) -> bool {
        matches!(self, Self::Sharded)
    }
}

/// What to do when two backends both claim ownership of a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardConflictPolicy {
    /// Fail the whole session with a connection-level error
    AbortSession,
    /// Exclude the conflicting backend and continue on the rest
    ExcludeBackend,
}

impl Default for ShardConflictPolicy {
    /// Aborting is the default: a doubly-owned database means the backends
    /// disagree about the data layout, and routing against either copy may
    /// silently read or write the wrong shard.
    fn default() -> Self {
        Self::AbortSession
    }
}

/// Role of a backend within a read/write-split topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    /// Receives writes and consistency-critical reads
    Primary,
    /// Receives load-balanced reads
    Replica,
}

impl Default for BackendRole {
    fn default() -> Self {
        Self::Replica
    }
}

/// Configuration for one backend server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Server name, used for named routing hints and logging
    pub name: String,
    /// Role in a read/write-split topology; ignored in sharded mode
    #[serde(default)]
    pub role: BackendRole,
}

impl BackendConfig {
    /// Create a replica backend entry
    #[must_use]
    pub fn replica(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: BackendRole::Replica,
        }
    }

    /// Create a primary backend entry
    #[must_use]
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: BackendRole::Primary,
        }
    }
}

/// Default database-enumeration probe sent during shard discovery
fn default_discovery_probe() -> String {
    "SHOW DATABASES".to_string()
}

/// Main router configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    /// Backend servers, in roster order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    /// Routing mode
    #[serde(default)]
    pub routing_mode: RoutingMode,
    /// Conflict policy for duplicate database ownership during discovery
    #[serde(default)]
    pub conflict_policy: ShardConflictPolicy,
    /// Statement text sent to every backend to enumerate its databases.
    /// The protocol adapter encodes it; the router treats it as opaque.
    #[serde(default = "default_discovery_probe")]
    pub discovery_probe: String,
    /// Bound on the pending-statement queue. `None` means unbounded, which
    /// is the default; a stalled backend then grows the queue without
    /// limit, so deployments may want a cap.
    #[serde(default)]
    pub max_pending_statements: Option<usize>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            routing_mode: RoutingMode::default(),
            conflict_policy: ShardConflictPolicy::default(),
            discovery_probe: default_discovery_probe(),
            max_pending_statements: None,
        }
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file
    pub fn load(config_path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", config_path, e))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", config_path, e))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(anyhow::anyhow!("at least one backend must be configured"));
        }

        let mut names: Vec<&str> = self.backends.iter().map(|b| b.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.backends.len() {
            return Err(anyhow::anyhow!("backend names must be unique"));
        }

        if self.routing_mode == RoutingMode::ReadWriteSplit {
            let primaries = self
                .backends
                .iter()
                .filter(|b| b.role == BackendRole::Primary)
                .count();
            if primaries != 1 {
                return Err(anyhow::anyhow!(
                    "read/write split requires exactly one primary backend, found {}",
                    primaries
                ));
            }
        }

        if self.discovery_probe.trim().is_empty() {
            return Err(anyhow::anyhow!("discovery_probe must not be empty"));
        }

        if let Some(0) = self.max_pending_statements {
            return Err(anyhow::anyhow!("max_pending_statements must be > 0"));
        }

        Ok(())
    }

    /// The roster id of the primary backend, if one is configured
    #[must_use]
    pub fn primary(&self) -> Option<BackendId> {
        self.backends
            .iter()
            .position(|b| b.role == BackendRole::Primary)
            .map(BackendId::from_index)
    }

    /// Resolve a backend name to its roster id
    #[must_use]
    pub fn backend_by_name(&self, name: &str) -> Option<BackendId> {
        self.backends
            .iter()
            .position(|b| b.name == name)
            .map(BackendId::from_index)
    }

    /// The name of a backend, for logging
    #[must_use]
    pub fn backend_name(&self, id: BackendId) -> Option<&str> {
        self.backends.get(id.as_index()).map(|b| b.name.as_str())
    }

    /// Number of configured backends
    #[must_use]
    #[inline]
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }
}
