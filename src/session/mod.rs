//! # Sessions
//!
//! A session is a scoped, single-owner context for issuing transactions
//! against one database. It checks a connection out of the pool on open and
//! gives it back on close; everything in between is strictly sequential.
//!
//! Auto-commit queries go through [`Session::run`], which retries the whole
//! unit of work on transient failures. Explicit transactions come from
//! [`Session::begin`] and follow the `OPEN -> (execute)* -> COMMITTED |
//! ROLLED_BACK` state machine.
//!
//! ## Causal chaining
//!
//! Every successful commit updates the session's bookmarks. Feed
//! [`Session::last_bookmarks`] into the next session's
//! [`SessionConfig::with_bookmarks`] to guarantee it observes the committed
//! writes, even across cluster members.

mod tx;

pub use tx::{Transaction, TxState};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use smallvec::{smallvec, SmallVec};
use tracing::{debug, warn};

use crate::driver::{AccessMode, Connection, Connector, TxArgs};
use crate::pool::ConnectionManager;
use crate::query::Query;
use crate::record::{normalize, RecordSet};
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Bookmark set carried by a session. Almost always zero or one entries.
pub type Bookmarks = SmallVec<[String; 1]>;

// ============================================================================
// SessionConfig
// ============================================================================

/// What a session is bound to: target database, access mode, causal floor.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub database: String,
    pub mode: AccessMode,
    /// Bookmarks from earlier sessions this one must causally follow.
    pub bookmarks: Bookmarks,
    /// Per-session fetch size; falls back to the connection config.
    pub fetch_size: Option<usize>,
    /// Bound on every server round trip made through this session. On
    /// expiry the wait is cancelled and the connection discarded.
    pub timeout: Option<Duration>,
}

impl SessionConfig {
    /// A write-mode session against the given database, no causal floor.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            mode: AccessMode::Write,
            bookmarks: Bookmarks::new(),
            fetch_size: None,
            timeout: None,
        }
    }

    pub fn read(mut self) -> Self {
        self.mode = AccessMode::Read;
        self
    }

    pub fn write(mut self) -> Self {
        self.mode = AccessMode::Write;
        self
    }

    pub fn with_bookmarks(mut self, bookmarks: impl IntoIterator<Item = String>) -> Self {
        self.bookmarks = bookmarks.into_iter().collect();
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Session
// ============================================================================

/// A scoped interaction context. Not for concurrent use: one logical unit
/// of work owns it at a time, which the `&mut` API enforces.
pub struct Session<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    conn: Option<crate::pool::PooledConnection<C::Conn>>,
    config: SessionConfig,
    retry: RetryPolicy,
    fetch_size: usize,
    bookmarks: Bookmarks,
    /// An explicit transaction was dropped while open; roll it back before
    /// the connection is used or released again.
    pending_rollback: bool,
}

impl<C: Connector> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("fetch_size", &self.fetch_size)
            .field("bookmarks", &self.bookmarks)
            .field("pending_rollback", &self.pending_rollback)
            .field("has_conn", &self.conn.is_some())
            .finish()
    }
}

/// How one attempt of an auto-commit unit failed.
enum UnitError {
    /// Safe to run the whole unit again on a fresh connection.
    Retryable(Error),
    Fatal(Error),
}

impl<C: Connector> Session<C> {
    pub(crate) async fn open(
        manager: Arc<ConnectionManager<C>>,
        config: SessionConfig,
    ) -> Result<Self> {
        if config.database.trim().is_empty() {
            return Err(Error::InvalidArgument("database name must not be empty".into()));
        }
        // Acquisition failures propagate unchanged; retry policy for dials
        // lives in the pool, not here.
        let conn = manager.acquire().await?;
        let retry = manager.config().retry;
        let fetch_size = config.fetch_size.unwrap_or(manager.config().fetch_size);
        let bookmarks = config.bookmarks.clone();
        debug!(database = %config.database, mode = ?config.mode, "session opened");
        Ok(Self {
            manager,
            conn: Some(conn),
            config,
            retry,
            fetch_size,
            bookmarks,
            pending_rollback: false,
        })
    }

    /// Run one query as its own transaction: begin, execute, commit.
    ///
    /// On a transient failure (deadlock, cluster role change, connection
    /// loss) the whole unit is retried on a fresh connection, up to the
    /// configured bound; exhaustion surfaces [`Error::RetriesExhausted`].
    /// Client errors surface immediately. A successful commit advances the
    /// session's bookmarks.
    pub async fn run(&mut self, query: impl Into<Query>) -> Result<RecordSet> {
        let query = query.into();
        self.settle().await;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run_once(&query).await {
                Ok(records) => return Ok(records),
                Err(UnitError::Fatal(e)) => return Err(e),
                Err(UnitError::Retryable(e)) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    warn!(attempt, error = %e, "transient failure, retrying auto-commit unit");
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                }
            }
        }
    }

    async fn run_once(&mut self, query: &Query) -> std::result::Result<RecordSet, UnitError> {
        self.ensure_connection().await.map_err(UnitError::Fatal)?;
        let op_timeout = self.config.timeout;
        let database = self.config.database.clone();
        let mode = self.config.mode;
        let bookmarks = self.bookmarks.to_vec();
        let fetch_size = self.fetch_size;

        let begun = {
            let conn = self.conn_mut();
            let args = TxArgs {
                database: &database,
                mode,
                bookmarks: &bookmarks,
                timeout: op_timeout,
            };
            with_timeout(op_timeout, conn.begin(args)).await
        };
        if let Err(e) = begun {
            return Err(self.fail_statement(e).await);
        }

        let ran = {
            let conn = self.conn_mut();
            with_timeout(op_timeout, conn.run(query.text(), query.parameters(), fetch_size)).await
        };
        let stream = match ran {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail_statement(e).await),
        };

        let committed = {
            let conn = self.conn_mut();
            with_timeout(op_timeout, conn.commit()).await
        };
        match committed {
            Ok(bookmark) => {
                if let Some(bookmark) = bookmark {
                    self.bookmarks = smallvec![bookmark];
                }
                normalize(stream).map_err(UnitError::Fatal)
            }
            Err(e) => Err(self.fail_commit(e)),
        }
    }

    /// Begin an explicit transaction. At most one per session; a previously
    /// abandoned transaction is rolled back first.
    pub async fn begin(&mut self) -> Result<Transaction<'_, C>> {
        self.settle().await;
        self.ensure_connection().await?;
        let op_timeout = self.config.timeout;
        let database = self.config.database.clone();
        let mode = self.config.mode;
        let bookmarks = self.bookmarks.to_vec();

        let begun = {
            let conn = self.conn_mut();
            let args = TxArgs {
                database: &database,
                mode,
                bookmarks: &bookmarks,
                timeout: op_timeout,
            };
            with_timeout(op_timeout, conn.begin(args)).await
        };
        if let Err(e) = begun {
            if !matches!(e, Error::Server(_)) {
                self.discard_connection(&e);
            }
            return Err(e);
        }
        Ok(Transaction::new(self))
    }

    /// Close the session: roll back anything left open and return the
    /// connection to the pool.
    ///
    /// Dropping a session without closing it also rolls back, but does so
    /// by discarding the connection (the server aborts with the channel);
    /// closing is the graceful path.
    pub async fn close(mut self) -> Result<()> {
        self.settle().await;
        self.conn = None;
        debug!(database = %self.config.database, "session closed");
        Ok(())
    }

    /// Bookmarks covering everything this session has committed. Chain them
    /// into the next session for read-after-write consistency.
    pub fn last_bookmarks(&self) -> &[String] {
        &self.bookmarks
    }

    pub fn database(&self) -> &str {
        &self.config.database
    }

    pub fn mode(&self) -> AccessMode {
        self.config.mode
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn conn_mut(&mut self) -> &mut C::Conn {
        self.conn
            .as_mut()
            .expect("connection present while session is open")
    }

    async fn ensure_connection(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.conn = Some(self.manager.acquire().await?);
        }
        Ok(())
    }

    /// Roll back a transaction a dropped [`Transaction`] handle left open.
    async fn settle(&mut self) {
        if !self.pending_rollback {
            return;
        }
        self.pending_rollback = false;
        if self.conn.is_none() {
            return;
        }
        let op_timeout = self.config.timeout;
        let rolled_back = {
            let conn = self.conn_mut();
            with_timeout(op_timeout, conn.rollback()).await
        };
        if let Err(e) = rolled_back {
            self.discard_connection(&e);
        }
    }

    /// The statement failed before commit. Decide whether the unit may be
    /// retried and leave the connection in a known state.
    async fn fail_statement(&mut self, error: Error) -> UnitError {
        match &error {
            // The server rejected the statement; the channel is healthy but
            // the transaction is failed, so roll it back.
            Error::Server(_) if self.conn.is_some() => {
                let op_timeout = self.config.timeout;
                let rolled_back = {
                    let conn = self.conn_mut();
                    with_timeout(op_timeout, conn.rollback()).await
                };
                if let Err(e) = rolled_back {
                    self.discard_connection(&e);
                }
            }
            Error::Server(_) => {}
            // Timeout or transport failure: connection state unknown.
            _ => self.discard_connection(&error),
        }
        if error.is_retryable() {
            UnitError::Retryable(error)
        } else {
            UnitError::Fatal(error)
        }
    }

    /// The commit itself failed. Only a server-classified transient
    /// rejection is provably safe to retry; a commit lost in flight may
    /// have been applied, so it is surfaced as-is.
    fn fail_commit(&mut self, error: Error) -> UnitError {
        match &error {
            Error::Server(e) if e.is_transient() => UnitError::Retryable(error),
            Error::Server(_) => UnitError::Fatal(error),
            _ => {
                self.discard_connection(&error);
                UnitError::Fatal(error)
            }
        }
    }

    /// Drop the connection instead of returning it to the pool.
    fn discard_connection(&mut self, cause: &Error) {
        if let Some(mut conn) = self.conn.take() {
            warn!(error = %cause, "discarding connection in unknown state");
            conn.mark_dirty();
        }
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        // Dropped with an open transaction and no chance to await: poison
        // the connection so the pool destroys it and the server rolls the
        // transaction back with the channel.
        if self.pending_rollback {
            if let Some(conn) = self.conn.as_mut() {
                conn.mark_dirty();
            }
        }
    }
}

// ============================================================================
// Timeout plumbing
// ============================================================================

/// Bound a server round trip by the caller's timeout, if one is set.
pub(crate) async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionTimeout(limit)),
        },
        None => fut.await,
    }
}
