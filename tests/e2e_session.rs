//! End-to-end tests for auto-commit sessions.
//!
//! Each test drives the full stack: Client -> pool -> session -> harness
//! driver -> normalizer.

use std::time::Duration;

use bolt_session::driver::harness::FakeServer;
use bolt_session::driver::{RawStream, RawValue, ServerError};
use bolt_session::{Client, ConnectionConfig, Error, Query, SessionConfig, Value};
use pretty_assertions::assert_eq;

fn client(server: &FakeServer) -> Client<bolt_session::driver::harness::HarnessConnector> {
    Client::new(ConnectionConfig::default(), server.connector())
}

// ============================================================================
// 1. RETURN 1 AS x comes back as exactly one record with x = 1
// ============================================================================

#[tokio::test]
async fn test_run_returns_single_record() {
    let server = FakeServer::new();
    server.respond(
        "RETURN 1 AS x",
        RawStream::new(["x"]).with_row(vec![RawValue::Int(1)]),
    );
    let client = client(&server);

    let mut session = client.session(SessionConfig::new("neo4j")).await.unwrap();
    let records = session.run("RETURN 1 AS x").await.unwrap();
    session.close().await.unwrap();

    assert_eq!(records.columns, vec!["x"]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get::<i64>("x").unwrap(), 1);
}

// ============================================================================
// 2. Parameters reach the server by name
// ============================================================================

#[tokio::test]
async fn test_parameters_reach_the_server() {
    let server = FakeServer::new();
    server.handle("RETURN $a + $b AS sum", |ctx| {
        let a = ctx.params.get("a").and_then(|v| v.as_int()).unwrap_or(0);
        let b = ctx.params.get("b").and_then(|v| v.as_int()).unwrap_or(0);
        Ok(RawStream::new(["sum"]).with_row(vec![RawValue::Int(a + b)]))
    });
    let client = client(&server);

    let mut session = client.session(SessionConfig::new("neo4j")).await.unwrap();
    let records = session
        .run(Query::new("RETURN $a + $b AS sum").param("a", 40i64).param("b", 2i64))
        .await
        .unwrap();
    session.close().await.unwrap();

    assert_eq!(records[0].get::<i64>("sum").unwrap(), 42);
}

// ============================================================================
// 3. A deadlock is retried and the unit commits exactly once
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_server_error_is_retried() {
    let server = FakeServer::new();
    server.fail_next_run(ServerError::new(
        "Neo.TransientError.Transaction.DeadlockDetected",
        "deadlock detected",
    ));
    let client = client(&server);

    let mut session = client.session(SessionConfig::new("neo4j")).await.unwrap();
    session.run("CREATE (:Thing)").await.unwrap();
    session.close().await.unwrap();

    let committed = server.committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].query, "CREATE (:Thing)");
    // the connection survived the failed attempt and was reused
    assert_eq!(server.dial_attempts(), 1);
}

// ============================================================================
// 4. Connection loss mid-statement: reconnect and re-execute
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connection_loss_is_retried_on_fresh_connection() {
    let server = FakeServer::new();
    server.drop_connection_on_run(1);
    let client = client(&server);

    let mut session = client.session(SessionConfig::new("neo4j")).await.unwrap();
    session.run("CREATE (:Thing)").await.unwrap();
    session.close().await.unwrap();

    assert_eq!(server.committed().len(), 1);
    assert_eq!(server.dial_attempts(), 2);
}

// ============================================================================
// 5. Client errors surface immediately, diagnostic text intact
// ============================================================================

#[tokio::test]
async fn test_client_error_is_never_retried() {
    let server = FakeServer::new();
    server.fail_next_run(ServerError::new(
        "Neo.ClientError.Statement.SyntaxError",
        "Invalid input 'RETRUN'",
    ));
    let client = client(&server);

    let mut session = client.session(SessionConfig::new("neo4j")).await.unwrap();
    let err = session.run("RETRUN 1").await.unwrap_err();
    session.close().await.unwrap();

    match err {
        Error::Server(e) => {
            assert_eq!(e.code, "Neo.ClientError.Statement.SyntaxError");
            assert_eq!(e.message, "Invalid input 'RETRUN'");
        }
        other => panic!("expected a server error, got {other}"),
    }
    assert!(server.committed().is_empty());
}

// ============================================================================
// 6. Transient errors on every attempt exhaust the retry bound
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_after_bound() {
    let server = FakeServer::new();
    for _ in 0..8 {
        server.fail_next_run(ServerError::new(
            "Neo.TransientError.Transaction.DeadlockDetected",
            "deadlock detected",
        ));
    }
    let client = client(&server);

    let mut session = client.session(SessionConfig::new("neo4j")).await.unwrap();
    let err = session.run("CREATE (:Thing)").await.unwrap_err();

    match err {
        Error::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, Error::Server(_)));
        }
        other => panic!("expected RetriesExhausted, got {other}"),
    }
    assert!(server.committed().is_empty());
}

// ============================================================================
// 7. Bookmark chaining: a write in session A is visible to session B
// ============================================================================

#[tokio::test]
async fn test_bookmark_chaining_gives_read_after_write() {
    let server = FakeServer::new();
    // Simulate a lagging read replica: without a bookmark, readers are
    // behind the write history.
    server.lag_reads(true);
    server.handle("MATCH (n:Thing) RETURN count(n) AS c", |ctx| {
        Ok(RawStream::new(["c"]).with_row(vec![RawValue::Int(ctx.visible.len() as i64)]))
    });
    let client = client(&server);

    let mut writer = client.session(SessionConfig::new("neo4j")).await.unwrap();
    writer.run("CREATE (:Thing)").await.unwrap();
    let bookmarks: Vec<String> = writer.last_bookmarks().to_vec();
    assert!(!bookmarks.is_empty());
    writer.close().await.unwrap();

    // Unchained reader: may not observe the write.
    let mut stale = client
        .session(SessionConfig::new("neo4j").read())
        .await
        .unwrap();
    let records = stale.run("MATCH (n:Thing) RETURN count(n) AS c").await.unwrap();
    assert_eq!(records[0].get::<i64>("c").unwrap(), 0);
    stale.close().await.unwrap();

    // Chained reader: must observe it.
    let mut chained = client
        .session(SessionConfig::new("neo4j").read().with_bookmarks(bookmarks))
        .await
        .unwrap();
    let records = chained.run("MATCH (n:Thing) RETURN count(n) AS c").await.unwrap();
    assert_eq!(records[0].get::<i64>("c").unwrap(), 1);
    chained.close().await.unwrap();
}

// ============================================================================
// 8. A successful commit advances the session's bookmarks
// ============================================================================

#[tokio::test]
async fn test_commit_advances_bookmarks() {
    let server = FakeServer::new();
    let client = client(&server);

    let mut session = client.session(SessionConfig::new("neo4j")).await.unwrap();
    assert!(session.last_bookmarks().is_empty());
    session.run("CREATE (:Thing)").await.unwrap();
    assert_eq!(session.last_bookmarks(), [server.latest_bookmark()]);
    session.close().await.unwrap();
}

// ============================================================================
// 9. An in-flight operation is bounded by the session timeout
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_operation_timeout_discards_connection() {
    let server = FakeServer::new();
    server.delay_runs(Duration::from_secs(60));
    let client = client(&server);

    let mut session = client
        .session(SessionConfig::new("neo4j").with_timeout(Duration::from_millis(100)))
        .await
        .unwrap();
    let err = session.run("RETURN 1 AS x").await.unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout(_)));
    session.close().await.unwrap();

    // The connection was in an unknown state and must not be reused.
    assert_eq!(client.status().idle, 0);
    assert_eq!(server.live_connections(), 0);
}

// ============================================================================
// 10. Empty database names are rejected before touching the pool
// ============================================================================

#[tokio::test]
async fn test_empty_database_name_is_invalid() {
    let server = FakeServer::new();
    let client = client(&server);

    let err = client.session(SessionConfig::new("  ")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(server.dial_attempts(), 0);
}

// ============================================================================
// 11. Client::run shorthand round trip
// ============================================================================

#[tokio::test]
async fn test_client_run_shorthand() {
    let server = FakeServer::new();
    server.respond(
        "RETURN 1 AS x",
        RawStream::new(["x"]).with_row(vec![RawValue::Int(1)]),
    );
    let client = client(&server);

    let records = client.run("RETURN 1 AS x").await.unwrap();
    assert_eq!(records[0].value("x"), Some(&Value::Int(1)));
    // the one-shot session went home
    assert_eq!(client.status().in_use, 0);
}
