//! # bolt-session: Session Layer for Bolt Graph Databases
//!
//! A clean convenience layer above a Bolt wire driver: pooled connections,
//! scoped sessions, managed transactions, and normalized results.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `Connector`/`Connection` is the contract between this
//!    layer and any wire driver
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Value`, `Record` cross all
//!    boundaries
//! 3. **No hidden state**: the pool is an explicitly constructed
//!    `ConnectionManager`, never a process-wide singleton
//! 4. **Closed value set**: every server value maps to a tagged `Value`
//!    variant or fails loudly, it is never coerced
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bolt_session::{Client, ConnectionConfig, Query, SessionConfig};
//! use bolt_session::driver::harness::FakeServer;
//!
//! # async fn example() -> bolt_session::Result<()> {
//! // Any type implementing `Connector` works here; the in-tree harness
//! // driver stands in for a real Bolt wire driver.
//! let server = FakeServer::new();
//! let client = Client::new(ConnectionConfig::default(), server.connector());
//!
//! let mut session = client.session(SessionConfig::new("neo4j")).await?;
//! let records = session
//!     .run(Query::new("MATCH (n:Person) WHERE n.name = $name RETURN n.age AS age")
//!         .param("name", "Ada"))
//!     .await?;
//!
//! for record in &records {
//!     println!("{}", record.get::<i64>("age")?);
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layering
//!
//! | Layer | Module | Description |
//! |-------|--------|-------------|
//! | Client | (crate root) | Top-level handle, owns the pool |
//! | Sessions | `session` | Scoped contexts, transactions, retry |
//! | Pool | `pool` | Connection lifecycle and checkout |
//! | Records | `record` | Raw record normalization |
//! | Driver seam | `driver` | Traits a wire driver implements |

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod driver;
pub mod model;
pub mod ops;
pub mod pool;
pub mod query;
pub mod record;
pub mod retry;
pub mod session;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{Node, NodeId, Path, PropertyMap, RelId, Relationship, Value};

// ============================================================================
// Re-exports: Driver seam
// ============================================================================

pub use driver::{AccessMode, Connection, Connector, ServerError};

// ============================================================================
// Re-exports: Pool
// ============================================================================

pub use pool::{ConnectionManager, PoolStatus, PooledConnection};

// ============================================================================
// Re-exports: Sessions and queries
// ============================================================================

pub use config::ConnectionConfig;
pub use ops::ServerVersion;
pub use query::Query;
pub use record::{FromValue, Record, RecordSet};
pub use retry::RetryPolicy;
pub use session::{Bookmarks, Session, SessionConfig, Transaction, TxState};

use std::sync::Arc;
use std::time::Duration;

/// Default database name when none is configured, matching the server's
/// out-of-the-box default.
pub const DEFAULT_DATABASE: &str = "neo4j";

// ============================================================================
// Top-level Client handle
// ============================================================================

/// The primary entry point. A `Client` wraps a [`ConnectionManager`] and
/// hands out scoped [`Session`]s.
///
/// Cloning is cheap; all clones share one pool.
pub struct Client<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
}

impl<C: Connector> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self { manager: Arc::clone(&self.manager) }
    }
}

impl<C: Connector> Client<C> {
    /// Create a client over the given wire driver. No connection is dialed
    /// until the first session asks for one.
    pub fn new(config: ConnectionConfig, connector: C) -> Self {
        Self { manager: Arc::new(ConnectionManager::new(config, connector)) }
    }

    /// Open a scoped session bound to a database and access mode.
    ///
    /// Fails with [`Error::InvalidArgument`] on an empty database name;
    /// connection acquisition failures propagate unchanged.
    pub async fn session(&self, config: SessionConfig) -> Result<Session<C>> {
        Session::open(Arc::clone(&self.manager), config).await
    }

    /// Run one auto-committed query against the default database in write
    /// mode. Shorthand for opening a single-use session.
    pub async fn run(&self, query: impl Into<Query>) -> Result<RecordSet> {
        let mut session = self
            .session(SessionConfig::new(self.default_database()))
            .await?;
        let result = session.run(query).await;
        let closed = session.close().await;
        let records = result?;
        closed?;
        Ok(records)
    }

    /// Check that the server is reachable and authenticating.
    pub async fn verify_connectivity(&self) -> Result<()> {
        let mut conn = self.manager.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    /// Snapshot of pool occupancy.
    pub fn status(&self) -> PoolStatus {
        self.manager.status()
    }

    /// Drain and close the pool. Further sessions fail with
    /// [`Error::ManagerClosed`].
    pub async fn shutdown(&self) -> Result<()> {
        self.manager.shutdown().await
    }

    /// The connection configuration this client was built with.
    pub fn config(&self) -> &ConnectionConfig {
        self.manager.config()
    }

    pub(crate) fn default_database(&self) -> String {
        self.config()
            .database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_owned())
    }

    /// Access the underlying pool (for advanced use).
    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed caller input. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server rejected the configured credentials. Never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A wait (pool checkout or in-flight operation) exceeded its bound.
    /// The affected connection is discarded, not reused.
    #[error("timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// Dialing the server kept failing after the configured attempts.
    #[error("server unavailable after {attempts} connection attempts: {last}")]
    ConnectionUnavailable { attempts: u32, last: String },

    /// The pool has been shut down.
    #[error("connection manager is shut down")]
    ManagerClosed,

    /// An operation was invoked on a transaction that is no longer open.
    #[error("transaction is {state}, expected open")]
    InvalidTransactionState { state: TxState },

    /// The driver handed back a value structure this layer does not know.
    #[error("unsupported value structure tag 0x{tag:02X}")]
    UnsupportedValueType { tag: u8 },

    /// A failure reported by the server, diagnostic text preserved verbatim.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// A transient failure survived every configured retry.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the query executor may retry the whole unit of work after
    /// seeing this error. Transient server errors and connection loss
    /// qualify; client errors, auth failures, and misuse never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Server(e) => e.is_transient(),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
