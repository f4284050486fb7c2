//! End-to-end tests for the client handle and pool lifecycle.

use std::time::Duration;

use bolt_session::driver::harness::FakeServer;
use bolt_session::{Client, ConnectionConfig, Error, SessionConfig};
use pretty_assertions::assert_eq;

// ============================================================================
// 1. Sequential sessions share one connection
// ============================================================================

#[tokio::test]
async fn test_sequential_sessions_reuse_connection() {
    let server = FakeServer::new();
    let client = Client::new(ConnectionConfig::default(), server.connector());

    for _ in 0..3 {
        let session = client.session(SessionConfig::new("neo4j")).await.unwrap();
        session.close().await.unwrap();
    }
    assert_eq!(server.dial_attempts(), 1);
    assert_eq!(client.status().idle, 1);
}

// ============================================================================
// 2. Concurrent sessions respect the pool bound
// ============================================================================

#[tokio::test]
async fn test_concurrent_sessions_bounded_by_pool() {
    let server = FakeServer::new();
    let config = ConnectionConfig::default().with_max_pool_size(2);
    let client = Client::new(config, server.connector());

    let a = client.session(SessionConfig::new("neo4j")).await.unwrap();
    let b = client.session(SessionConfig::new("neo4j")).await.unwrap();
    assert_eq!(client.status().in_use, 2);
    assert_eq!(server.live_connections(), 2);

    a.close().await.unwrap();
    b.close().await.unwrap();
    assert_eq!(client.status().in_use, 0);
    assert_eq!(client.status().idle, 2);
}

// ============================================================================
// 3. Waiting for a session times out when the pool is exhausted
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_session_waits_then_times_out() {
    let server = FakeServer::new();
    let config = ConnectionConfig::default()
        .with_max_pool_size(1)
        .with_acquire_timeout(Duration::from_millis(100));
    let client = Client::new(config, server.connector());

    let held = client.session(SessionConfig::new("neo4j")).await.unwrap();
    let err = client.session(SessionConfig::new("neo4j")).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout(_)));
    held.close().await.unwrap();
}

// ============================================================================
// 4. A released connection unblocks a waiting caller
// ============================================================================

#[tokio::test]
async fn test_release_unblocks_waiting_acquire() {
    let server = FakeServer::new();
    let config = ConnectionConfig::default().with_max_pool_size(1);
    let client = Client::new(config, server.connector());

    let held = client.session(SessionConfig::new("neo4j")).await.unwrap();
    let waiter = {
        let client = client.clone();
        tokio::spawn(async move {
            let session = client.session(SessionConfig::new("neo4j")).await.unwrap();
            session.close().await.unwrap();
        })
    };
    tokio::task::yield_now().await;
    held.close().await.unwrap();
    waiter.await.unwrap();

    assert_eq!(server.dial_attempts(), 1);
}

// ============================================================================
// 5. Authentication failures pass through the whole stack, unretried
// ============================================================================

#[tokio::test]
async fn test_authentication_error_propagates() {
    let server = FakeServer::with_credentials("ada", "secret");
    let client = Client::new(ConnectionConfig::default(), server.connector());

    let err = client.session(SessionConfig::new("neo4j")).await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert_eq!(server.dial_attempts(), 1);
}

// ============================================================================
// 6. Unreachable server: exactly the configured number of attempts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unreachable_server_attempts_bound() {
    let server = FakeServer::new();
    server.fail_dials(100, "connection refused");
    let client = Client::new(ConnectionConfig::default(), server.connector());

    let err = client.session(SessionConfig::new("neo4j")).await.unwrap_err();
    match err {
        Error::ConnectionUnavailable { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(last.contains("connection refused"));
        }
        other => panic!("expected ConnectionUnavailable, got {other}"),
    }
    assert_eq!(server.dial_attempts(), 3);
}

// ============================================================================
// 7. Shutdown drains the pool and refuses further sessions
// ============================================================================

#[tokio::test]
async fn test_shutdown_then_session_fails() {
    let server = FakeServer::new();
    let client = Client::new(ConnectionConfig::default(), server.connector());

    let session = client.session(SessionConfig::new("neo4j")).await.unwrap();
    session.close().await.unwrap();

    client.shutdown().await.unwrap();
    assert_eq!(server.live_connections(), 0);
    assert!(matches!(
        client.session(SessionConfig::new("neo4j")).await.unwrap_err(),
        Error::ManagerClosed
    ));
    // idempotent
    client.shutdown().await.unwrap();
}

// ============================================================================
// 8. verify_connectivity dials, pings, and releases
// ============================================================================

#[tokio::test]
async fn test_verify_connectivity() {
    let server = FakeServer::new();
    let client = Client::new(ConnectionConfig::default(), server.connector());

    client.verify_connectivity().await.unwrap();
    assert_eq!(client.status().in_use, 0);
    assert_eq!(client.status().idle, 1);
}
