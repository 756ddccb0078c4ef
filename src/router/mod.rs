//! Routing-target classification
//!
//! Decides, per incoming statement, which backend(s) must receive it:
//! one named backend, any eligible replica, or every backend. The
//! classifier never guesses: requirements that cannot be reconciled are
//! returned as a [`RouterError::RoutingConflict`] for the caller to
//! surface to the client.

mod selector;

pub use selector::ReplicaSelector;

use crate::config::{RouterConfig, RoutingMode};
use crate::error::RouterError;
use crate::shard::ShardMap;
use crate::statement::{RoutingHint, Statement, StatementKind};
use crate::types::BackendId;

/// The resolved destination(s) for one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Replicate to every backend through the session command protocol
    All,
    /// Load-balance across eligible replicas
    Any,
    /// Exactly this backend
    Named(BackendId),
}

/// Session-level state the classifier consults
///
/// Owned and updated by the session as authoritative replies come back;
/// the classifier only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// An explicit transaction is open
    pub transaction_open: bool,
    /// Autocommit is enabled; with it off, every statement runs inside an
    /// implicit transaction
    pub autocommit: bool,
    /// The session's current default database
    pub current_database: Option<String>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            transaction_open: false,
            autocommit: true,
            current_database: None,
        }
    }
}

impl SessionContext {
    /// Whether reads must see all prior writes and therefore go to the
    /// primary
    #[must_use]
    pub const fn requires_primary(&self) -> bool {
        self.transaction_open || !self.autocommit
    }
}

/// Classifies statements into routing targets
///
/// Built once per session from the router configuration.
#[derive(Debug)]
pub struct RoutingClassifier {
    mode: RoutingMode,
    primary: Option<BackendId>,
    backend_names: Vec<String>,
}

impl RoutingClassifier {
    /// Create a classifier for the configured topology
    #[must_use]
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            mode: config.routing_mode,
            primary: config.primary(),
            backend_names: config.backends.iter().map(|b| b.name.clone()).collect(),
        }
    }

    /// The topology this classifier routes for
    #[must_use]
    #[inline]
    pub const fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Resolve the routing target for one statement
    ///
    /// `shards` is the session's shard map; required in sharded mode once
    /// discovery has completed, ignored otherwise.
    pub fn classify(
        &self,
        statement: &Statement,
        ctx: &SessionContext,
        shards: Option<&ShardMap>,
    ) -> Result<RouteTarget, RouterError> {
        match statement.kind() {
            StatementKind::Session(_) => self.classify_session_command(statement),
            StatementKind::Write | StatementKind::BeginLoad => {
                self.classify_write(statement, ctx, shards)
            }
            StatementKind::Read => self.classify_read(statement, ctx, shards),
            StatementKind::Raw => Err(RouterError::RoutingConflict {
                reason: "raw frame received outside an active bulk load".to_string(),
            }),
        }
    }

    /// Session commands go to every backend; a hint narrowing the target
    /// contradicts that and is rejected rather than resolved
    fn classify_session_command(&self, statement: &Statement) -> Result<RouteTarget, RouterError> {
        match statement.hint() {
            None => Ok(RouteTarget::All),
            Some(hint) => Err(RouterError::RoutingConflict {
                reason: format!(
                    "session command must reach all backends but carries a {} hint",
                    hint_name(hint)
                ),
            }),
        }
    }

    fn classify_write(
        &self,
        statement: &Statement,
        ctx: &SessionContext,
        shards: Option<&ShardMap>,
    ) -> Result<RouteTarget, RouterError> {
        let mandatory = self.consistency_target(statement, ctx, shards)?;

        match statement.hint() {
            None | Some(RoutingHint::Primary) => Ok(RouteTarget::Named(mandatory)),
            Some(RoutingHint::Replica) => Err(RouterError::RoutingConflict {
                reason: "statement pinned to a single server carries a replica hint".to_string(),
            }),
            Some(RoutingHint::Named(name)) => {
                let hinted = self.resolve_name(name)?;
                if hinted == mandatory {
                    Ok(RouteTarget::Named(mandatory))
                } else {
                    Err(RouterError::RoutingConflict {
                        reason: format!(
                            "statement must go to {} but is hinted to '{}'",
                            mandatory, name
                        ),
                    })
                }
            }
        }
    }

    fn classify_read(
        &self,
        statement: &Statement,
        ctx: &SessionContext,
        shards: Option<&ShardMap>,
    ) -> Result<RouteTarget, RouterError> {
        // Sharded reads are pinned to the owning shard like writes
        if self.mode == RoutingMode::Sharded {
            return self.classify_write(statement, ctx, shards);
        }

        match statement.hint() {
            Some(RoutingHint::Primary) => self.primary_target(),
            Some(RoutingHint::Named(name)) => self.resolve_name(name).map(RouteTarget::Named),
            Some(RoutingHint::Replica) => Ok(RouteTarget::Any),
            None if ctx.requires_primary() => self.primary_target(),
            None => Ok(RouteTarget::Any),
        }
    }

    /// The backend a consistency-requiring statement must reach
    fn consistency_target(
        &self,
        statement: &Statement,
        ctx: &SessionContext,
        shards: Option<&ShardMap>,
    ) -> Result<BackendId, RouterError> {
        match self.mode {
            RoutingMode::ReadWriteSplit => match self.primary_target()? {
                RouteTarget::Named(id) => Ok(id),
                _ => unreachable!("primary_target always resolves to a named backend"),
            },
            RoutingMode::Sharded => {
                let database = statement
                    .target_database()
                    .or(ctx.current_database.as_deref())
                    .ok_or_else(|| RouterError::RoutingConflict {
                        reason: "no database selected".to_string(),
                    })?;

                let map = shards.ok_or_else(|| RouterError::RoutingConflict {
                    reason: "shard map not yet discovered".to_string(),
                })?;

                map.owner_of(database)
                    .ok_or_else(|| RouterError::DatabaseNotFound {
                        database: database.to_string(),
                    })
            }
        }
    }

    fn primary_target(&self) -> Result<RouteTarget, RouterError> {
        self.primary
            .map(RouteTarget::Named)
            .ok_or_else(|| RouterError::NoBackendAvailable {
                target: "primary".to_string(),
            })
    }

    fn resolve_name(&self, name: &str) -> Result<BackendId, RouterError> {
        self.backend_names
            .iter()
            .position(|n| n == name)
            .map(BackendId::from_index)
            .ok_or_else(|| RouterError::RoutingConflict {
                reason: format!("routing hint names unknown server '{}'", name),
            })
    }
}

fn hint_name(hint: &RoutingHint) -> &'static str {
    match hint {
        RoutingHint::Primary => "primary",
        RoutingHint::Replica => "replica",
        RoutingHint::Named(_) => "named-server",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ShardConflictPolicy};
    use crate::shard::ShardDiscovery;
    use crate::statement::SessionCommandKind;
    use bytes::Bytes;

    fn split_classifier() -> RoutingClassifier {
        let config = RouterConfig {
            backends: vec![
                BackendConfig::primary("primary-1"),
                BackendConfig::replica("replica-1"),
                BackendConfig::replica("replica-2"),
            ],
            routing_mode: RoutingMode::ReadWriteSplit,
            ..RouterConfig::default()
        };
        RoutingClassifier::new(&config)
    }

    fn sharded_classifier() -> (RoutingClassifier, ShardMap) {
        let config = RouterConfig {
            backends: vec![BackendConfig::replica("shard-a"), BackendConfig::replica("shard-b")],
            routing_mode: RoutingMode::Sharded,
            ..RouterConfig::default()
        };

        let mut discovery = ShardDiscovery::new(ShardConflictPolicy::AbortSession);
        discovery.start([BackendId::from_index(0), BackendId::from_index(1)]);
        discovery
            .on_reply(BackendId::from_index(0), vec!["db1".to_string()])
            .unwrap();
        discovery
            .on_reply(BackendId::from_index(1), vec!["db2".to_string()])
            .unwrap();

        (RoutingClassifier::new(&config), discovery.into_map())
    }

    fn read() -> Statement {
        Statement::new(Bytes::from_static(b"SELECT 1"), StatementKind::Read)
    }

    fn write() -> Statement {
        Statement::new(Bytes::from_static(b"INSERT ..."), StatementKind::Write)
    }

    fn session_command() -> Statement {
        Statement::new(
            Bytes::from_static(b"SET @x = 1"),
            StatementKind::Session(SessionCommandKind::SetVariable),
        )
    }

    #[test]
    fn test_session_command_targets_all() {
        let classifier = split_classifier();
        let target = classifier
            .classify(&session_command(), &SessionContext::default(), None)
            .unwrap();
        assert_eq!(target, RouteTarget::All);
    }

    #[test]
    fn test_session_command_with_hint_conflicts() {
        let classifier = split_classifier();
        let stmt = session_command().with_hint(RoutingHint::Replica);
        let err = classifier
            .classify(&stmt, &SessionContext::default(), None)
            .unwrap_err();
        assert!(matches!(err, RouterError::RoutingConflict { .. }));
    }

    #[test]
    fn test_plain_read_targets_any() {
        let classifier = split_classifier();
        let target = classifier
            .classify(&read(), &SessionContext::default(), None)
            .unwrap();
        assert_eq!(target, RouteTarget::Any);
    }

    #[test]
    fn test_read_in_transaction_targets_primary() {
        let classifier = split_classifier();
        let ctx = SessionContext {
            transaction_open: true,
            ..SessionContext::default()
        };
        let target = classifier.classify(&read(), &ctx, None).unwrap();
        assert_eq!(target, RouteTarget::Named(BackendId::from_index(0)));
    }

    #[test]
    fn test_read_without_autocommit_targets_primary() {
        let classifier = split_classifier();
        let ctx = SessionContext {
            autocommit: false,
            ..SessionContext::default()
        };
        let target = classifier.classify(&read(), &ctx, None).unwrap();
        assert_eq!(target, RouteTarget::Named(BackendId::from_index(0)));
    }

    #[test]
    fn test_write_targets_primary() {
        let classifier = split_classifier();
        let target = classifier
            .classify(&write(), &SessionContext::default(), None)
            .unwrap();
        assert_eq!(target, RouteTarget::Named(BackendId::from_index(0)));
    }

    #[test]
    fn test_write_with_replica_hint_conflicts() {
        let classifier = split_classifier();
        let stmt = write().with_hint(RoutingHint::Replica);
        let err = classifier
            .classify(&stmt, &SessionContext::default(), None)
            .unwrap_err();
        assert!(matches!(err, RouterError::RoutingConflict { .. }));
    }

    #[test]
    fn test_write_hinted_to_named_replica_conflicts() {
        let classifier = split_classifier();
        let stmt = write().with_hint(RoutingHint::Named("replica-2".to_string()));
        let err = classifier
            .classify(&stmt, &SessionContext::default(), None)
            .unwrap_err();
        assert!(matches!(err, RouterError::RoutingConflict { .. }));
    }

    #[test]
    fn test_write_hinted_to_primary_is_allowed() {
        let classifier = split_classifier();
        let stmt = write().with_hint(RoutingHint::Named("primary-1".to_string()));
        let target = classifier
            .classify(&stmt, &SessionContext::default(), None)
            .unwrap();
        assert_eq!(target, RouteTarget::Named(BackendId::from_index(0)));
    }

    #[test]
    fn test_read_hinted_to_named_server() {
        let classifier = split_classifier();
        let stmt = read().with_hint(RoutingHint::Named("replica-2".to_string()));
        let target = classifier
            .classify(&stmt, &SessionContext::default(), None)
            .unwrap();
        assert_eq!(target, RouteTarget::Named(BackendId::from_index(2)));
    }

    #[test]
    fn test_unknown_hint_name_conflicts() {
        let classifier = split_classifier();
        let stmt = read().with_hint(RoutingHint::Named("nope".to_string()));
        let err = classifier
            .classify(&stmt, &SessionContext::default(), None)
            .unwrap_err();
        assert!(matches!(err, RouterError::RoutingConflict { .. }));
    }

    #[test]
    fn test_sharded_routing_by_statement_database() {
        let (classifier, map) = sharded_classifier();
        let stmt = write().with_target_database("db2");
        let target = classifier
            .classify(&stmt, &SessionContext::default(), Some(&map))
            .unwrap();
        assert_eq!(target, RouteTarget::Named(BackendId::from_index(1)));
    }

    #[test]
    fn test_sharded_routing_falls_back_to_current_database() {
        let (classifier, map) = sharded_classifier();
        let ctx = SessionContext {
            current_database: Some("db1".to_string()),
            ..SessionContext::default()
        };
        let target = classifier.classify(&read(), &ctx, Some(&map)).unwrap();
        assert_eq!(target, RouteTarget::Named(BackendId::from_index(0)));
    }

    #[test]
    fn test_sharded_unknown_database() {
        let (classifier, map) = sharded_classifier();
        let stmt = read().with_target_database("absent");
        let err = classifier
            .classify(&stmt, &SessionContext::default(), Some(&map))
            .unwrap_err();
        assert!(matches!(err, RouterError::DatabaseNotFound { .. }));
    }

    #[test]
    fn test_sharded_no_database_selected() {
        let (classifier, map) = sharded_classifier();
        let err = classifier
            .classify(&read(), &SessionContext::default(), Some(&map))
            .unwrap_err();
        assert!(matches!(err, RouterError::RoutingConflict { .. }));
    }

    #[test]
    fn test_raw_frame_outside_load_rejected() {
        let classifier = split_classifier();
        let stmt = Statement::new(Bytes::from_static(b"chunk"), StatementKind::Raw);
        let err = classifier
            .classify(&stmt, &SessionContext::default(), None)
            .unwrap_err();
        assert!(matches!(err, RouterError::RoutingConflict { .. }));
    }
}
