//! Shard discovery integration tests
//!
//! Covers the discovery gate (statements queue until the map is built),
//! both duplicate-ownership policies, and routing through the finished
//! shard map.

use std::sync::Arc;

use bytes::Bytes;

use dbsplit::backend::BackendState;
use dbsplit::transport::mock::{RecordingClient, RecordingTransport};
use dbsplit::{
    BackendConfig, BackendId, BackendReply, RouterConfig, RouterError, RouterSession, RoutingMode,
    ShardConflictPolicy, Statement, StatementKind,
};

fn sharded_config(policy: ShardConflictPolicy) -> RouterConfig {
    RouterConfig {
        backends: vec![BackendConfig::replica("shard-a"), BackendConfig::replica("shard-b")],
        routing_mode: RoutingMode::Sharded,
        conflict_policy: policy,
        ..RouterConfig::default()
    }
}

async fn session(
    policy: ShardConflictPolicy,
) -> (RouterSession, Arc<RecordingTransport>, Arc<RecordingClient>) {
    dbsplit::logging::init_test_logging();
    let transport = Arc::new(RecordingTransport::new());
    let client = Arc::new(RecordingClient::new());
    let mut session =
        RouterSession::new(sharded_config(policy), transport.clone(), client.clone()).unwrap();
    session.start().await.unwrap();
    (session, transport, client)
}

fn discovery_reply(names: &'static str) -> BackendReply {
    BackendReply::ok(Bytes::from_static(names.as_bytes()))
}

fn write_to(db: &str) -> Statement {
    Statement::new(Bytes::from_static(b"INSERT INTO t VALUES (1)"), StatementKind::Write)
        .with_target_database(db)
}

#[tokio::test]
async fn test_probe_goes_to_every_backend() {
    let (session, transport, _client) = session(ShardConflictPolicy::AbortSession).await;

    let probe = Bytes::from_static(b"SHOW DATABASES");
    assert_eq!(transport.sent_to(BackendId::from_index(0)), vec![probe.clone()]);
    assert_eq!(transport.sent_to(BackendId::from_index(1)), vec![probe]);
    assert_eq!(
        session.backend_state(BackendId::from_index(0)),
        Some(BackendState::Discovering)
    );
}

#[tokio::test]
async fn test_clean_discovery_builds_map_and_enables_routing() {
    let (mut session, transport, _client) = session(ShardConflictPolicy::AbortSession).await;
    let a = BackendId::from_index(0);
    let b = BackendId::from_index(1);

    session.on_backend_reply(a, discovery_reply("db1\ndb2")).await.unwrap();
    assert!(session.shard_map().is_none(), "map incomplete until all reply");

    session.on_backend_reply(b, discovery_reply("db3")).await.unwrap();
    let map = session.shard_map().expect("discovery complete");
    assert_eq!(map.owner_of("db1"), Some(a));
    assert_eq!(map.owner_of("db3"), Some(b));

    session.route_statement(write_to("db3")).await.unwrap();
    assert_eq!(transport.sent_to(b).len(), 2); // probe + write
}

#[tokio::test]
async fn test_exclude_policy_keeps_first_owner() {
    // Discovery returns {db1,db2} from A and {db2} from B; B is excluded
    // and the map keeps both databases on A
    let (mut session, _transport, client) = session(ShardConflictPolicy::ExcludeBackend).await;
    let a = BackendId::from_index(0);
    let b = BackendId::from_index(1);

    session.on_backend_reply(a, discovery_reply("db1\ndb2")).await.unwrap();
    session.on_backend_reply(b, discovery_reply("db2")).await.unwrap();

    assert_eq!(session.backend_state(b), Some(BackendState::Failed));
    let map = session.shard_map().expect("discovery complete");
    assert_eq!(map.owner_of("db1"), Some(a));
    assert_eq!(map.owner_of("db2"), Some(a));
    assert_eq!(map.len(), 2);
    // Exclusion is a warning, not a client-visible failure
    assert!(client.errors().is_empty());
    assert!(!session.is_closed());
}

#[tokio::test]
async fn test_abort_policy_fails_the_session() {
    let (mut session, _transport, client) = session(ShardConflictPolicy::AbortSession).await;
    let a = BackendId::from_index(0);
    let b = BackendId::from_index(1);

    session.on_backend_reply(a, discovery_reply("db1")).await.unwrap();
    let err = session
        .on_backend_reply(b, discovery_reply("db1"))
        .await
        .unwrap_err();

    assert!(matches!(err, RouterError::ShardConflict { .. }));
    // The client was told before the session died
    assert_eq!(client.errors().len(), 1);
    assert!(client.errors()[0].contains("db1"));
}

#[tokio::test]
async fn test_statements_queued_during_discovery_drain_in_order() {
    let (mut session, transport, _client) = session(ShardConflictPolicy::AbortSession).await;
    let a = BackendId::from_index(0);
    let b = BackendId::from_index(1);

    // Arrive before the map exists; each targets a different shard
    session.route_statement(write_to("db1")).await.unwrap();
    session.route_statement(write_to("db2")).await.unwrap();
    assert_eq!(session.pending_len(), 2);
    assert_eq!(transport.sent().len(), 2, "only probes on the wire");

    session.on_backend_reply(a, discovery_reply("db1")).await.unwrap();
    assert_eq!(session.pending_len(), 2, "still gated");

    session.on_backend_reply(b, discovery_reply("db2")).await.unwrap();

    // Both writes dispatched, in arrival order
    assert_eq!(session.pending_len(), 0);
    let sent = transport.sent();
    let writes: Vec<BackendId> = sent
        .iter()
        .filter(|(_, bytes)| bytes.as_ref() != b"SHOW DATABASES")
        .map(|(backend, _)| *backend)
        .collect();
    assert_eq!(writes, vec![a, b]);
}

#[tokio::test]
async fn test_connect_database_resolves_against_map() {
    let transport = Arc::new(RecordingTransport::new());
    let client = Arc::new(RecordingClient::new());
    let mut session = RouterSession::new(
        sharded_config(ShardConflictPolicy::AbortSession),
        transport.clone(),
        client.clone(),
    )
    .unwrap()
    .with_connect_database("db2");
    session.start().await.unwrap();

    let a = BackendId::from_index(0);
    let b = BackendId::from_index(1);
    session.on_backend_reply(a, discovery_reply("db1")).await.unwrap();
    session.on_backend_reply(b, discovery_reply("db2")).await.unwrap();

    assert_eq!(session.context().current_database.as_deref(), Some("db2"));

    // A write with no explicit database follows the session's default
    let stmt = Statement::new(Bytes::from_static(b"INSERT ..."), StatementKind::Write);
    session.route_statement(stmt).await.unwrap();
    assert_eq!(transport.sent_to(b).len(), 2);
}

#[tokio::test]
async fn test_unknown_connect_database_is_reported() {
    let transport = Arc::new(RecordingTransport::new());
    let client = Arc::new(RecordingClient::new());
    let mut session = RouterSession::new(
        sharded_config(ShardConflictPolicy::AbortSession),
        transport.clone(),
        client.clone(),
    )
    .unwrap()
    .with_connect_database("missing");
    session.start().await.unwrap();

    session
        .on_backend_reply(BackendId::from_index(0), discovery_reply("db1"))
        .await
        .unwrap();
    session
        .on_backend_reply(BackendId::from_index(1), discovery_reply("db2"))
        .await
        .unwrap();

    assert!(client.errors().iter().any(|e| e.contains("missing")));
    assert_eq!(session.context().current_database, None);
}

#[tokio::test]
async fn test_failed_probe_excludes_backend_but_discovery_completes() {
    let (mut session, _transport, _client) = session(ShardConflictPolicy::AbortSession).await;
    let a = BackendId::from_index(0);
    let b = BackendId::from_index(1);

    session.on_backend_reply(a, discovery_reply("db1")).await.unwrap();
    session
        .on_backend_reply(b, BackendReply::error(Bytes::from_static(b"ERR")))
        .await
        .unwrap();

    assert_eq!(session.backend_state(b), Some(BackendState::Failed));
    let map = session.shard_map().expect("completes without the failed backend");
    assert_eq!(map.owner_of("db1"), Some(a));
    assert_eq!(map.owner_of("db2"), None);
}

#[tokio::test]
async fn test_unknown_database_statement_is_client_error() {
    let (mut session, _transport, client) = session(ShardConflictPolicy::AbortSession).await;

    session
        .on_backend_reply(BackendId::from_index(0), discovery_reply("db1"))
        .await
        .unwrap();
    session
        .on_backend_reply(BackendId::from_index(1), discovery_reply("db2"))
        .await
        .unwrap();

    session.route_statement(write_to("db9")).await.unwrap();
    assert!(client.errors().iter().any(|e| e.contains("db9")));
}

#[tokio::test]
async fn test_backend_loss_during_discovery_completes_it() {
    let (mut session, _transport, _client) = session(ShardConflictPolicy::AbortSession).await;
    let a = BackendId::from_index(0);
    let b = BackendId::from_index(1);

    session.on_backend_reply(a, discovery_reply("db1")).await.unwrap();
    session.on_backend_failed(b, "connect timeout").await.unwrap();

    assert!(session.shard_map().is_some());
    assert_eq!(session.backend_state(a), Some(BackendState::Ready));
    assert_eq!(session.backend_state(b), Some(BackendState::Failed));
}
