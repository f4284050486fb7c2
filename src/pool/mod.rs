//! # Connection Manager
//!
//! Owns every live connection: a bounded pool with checkout, return, dial
//! retry, and graceful shutdown. Constructed explicitly and shared by
//! reference; there is no process-wide pool.
//!
//! Checkout discipline: a [`PooledConnection`] goes back to the idle queue
//! when dropped clean, and is destroyed when dropped dirty (I/O failure,
//! timeout mid-operation, or an abandoned transaction), so a connection in
//! an unknown state is never reused.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::driver::{Connection, Connector};
use crate::{Error, Result};

// ============================================================================
// Pool status
// ============================================================================

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections parked in the idle queue.
    pub idle: usize,
    /// Connections checked out to sessions.
    pub in_use: usize,
    /// Upper bound on idle + in_use.
    pub max_size: usize,
}

// ============================================================================
// ConnectionManager
// ============================================================================

struct PoolShared<T: Connection> {
    idle: Mutex<VecDeque<T>>,
    in_use: AtomicUsize,
    closed: AtomicBool,
    /// Signalled each time a checked-out connection comes home; `shutdown`
    /// waits on it.
    drained: Notify,
}

/// The lifecycle owner of all connections to one server.
///
/// Safe to share across tasks behind an `Arc`; `acquire` and release are
/// internally synchronized.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    config: ConnectionConfig,
    permits: Arc<Semaphore>,
    shared: Arc<PoolShared<C::Conn>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(config: ConnectionConfig, connector: C) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_pool_size)),
            shared: Arc::new(PoolShared {
                idle: Mutex::new(VecDeque::new()),
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                drained: Notify::new(),
            }),
            connector,
            config,
        }
    }

    /// Check out a connection, dialing a fresh one if the idle queue is
    /// empty and the pool has headroom.
    ///
    /// Waits up to `acquire_timeout` for headroom, then fails with
    /// [`Error::ConnectionTimeout`]. Dial failures are retried with bounded
    /// backoff per the configured [`RetryPolicy`]; authentication failures
    /// fail fast and are never retried.
    ///
    /// [`RetryPolicy`]: crate::retry::RetryPolicy
    pub async fn acquire(&self) -> Result<PooledConnection<C::Conn>> {
        self.config.validate()?;
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::ManagerClosed);
        }

        let permit = match timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Err(_) => return Err(Error::ConnectionTimeout(self.config.acquire_timeout)),
            // The semaphore only closes on shutdown.
            Ok(Err(_)) => return Err(Error::ManagerClosed),
            Ok(Ok(permit)) => permit,
        };
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::ManagerClosed);
        }

        let reused = loop {
            let candidate = self.shared.idle.lock().pop_front();
            match candidate {
                Some(conn) if conn.is_open() => break Some(conn),
                Some(_dead) => debug!("discarded dead idle connection"),
                None => break None,
            }
        };
        let conn = match reused {
            Some(conn) => conn,
            None => self.dial().await?,
        };

        self.shared.in_use.fetch_add(1, Ordering::AcqRel);
        debug!(in_use = self.shared.in_use.load(Ordering::Relaxed), "connection checked out");
        Ok(PooledConnection {
            conn: Some(conn),
            dirty: false,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Dial and authenticate one connection, retrying transient failures
    /// with exponential backoff.
    async fn dial(&self) -> Result<C::Conn> {
        let policy = self.config.retry;
        let mut last: Option<Error> = None;
        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(policy.delay(attempt - 1)).await;
            }
            match self.connector.connect(&self.config).await {
                Ok(conn) => {
                    if attempt > 1 {
                        info!(attempt, uri = %self.config.uri, "connected after retry");
                    } else {
                        debug!(uri = %self.config.uri, "connected");
                    }
                    return Ok(conn);
                }
                // Bad credentials or bad config will not get better by
                // asking again.
                Err(e @ (Error::Authentication(_) | Error::InvalidArgument(_))) => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, uri = %self.config.uri, "connection attempt failed");
                    last = Some(e);
                }
            }
        }
        Err(Error::ConnectionUnavailable {
            attempts: policy.max_attempts,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Drain the pool: stop new checkouts, wait up to the configured grace
    /// period for in-flight connections to come home, close everything that
    /// did. Connections still out after the grace period are destroyed on
    /// release. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("draining connection pool");
        // Wake queued acquires; they observe the closed flag.
        self.permits.close();

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while self.shared.in_use.load(Ordering::Acquire) > 0 {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(
                    in_use = self.shared.in_use.load(Ordering::Relaxed),
                    "grace period expired, abandoning in-flight connections"
                );
                break;
            }
            let _ = timeout(deadline - now, self.shared.drained.notified()).await;
        }

        let idle: Vec<C::Conn> = {
            let mut queue = self.shared.idle.lock();
            queue.drain(..).collect()
        };
        for mut conn in idle {
            let _ = conn.close().await;
        }
        info!("connection pool shut down");
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.shared.idle.lock().len(),
            in_use: self.shared.in_use.load(Ordering::Acquire),
            max_size: self.config.max_pool_size,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

// ============================================================================
// PooledConnection
// ============================================================================

/// A connection checked out of the pool.
///
/// Dropping it returns the connection to the idle queue, unless it was
/// marked dirty or the pool has shut down, in which case the connection is
/// destroyed and the transport closes with it.
pub struct PooledConnection<T: Connection> {
    conn: Option<T>,
    dirty: bool,
    shared: Arc<PoolShared<T>>,
    _permit: OwnedSemaphorePermit,
}

impl<T: Connection> std::fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("dirty", &self.dirty)
            .field("has_conn", &self.conn.is_some())
            .finish()
    }
}

impl<T: Connection> PooledConnection<T> {
    /// Mark the connection as being in an unknown state (timeout fired
    /// mid-operation, transaction abandoned). A dirty connection is
    /// destroyed on drop instead of being reused.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl<T: Connection> Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<T: Connection> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<T: Connection> Drop for PooledConnection<T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.in_use.fetch_sub(1, Ordering::AcqRel);
            let reusable =
                !self.dirty && conn.is_open() && !self.shared.closed.load(Ordering::Acquire);
            if reusable {
                self.shared.idle.lock().push_back(conn);
            }
            // Not reusable: the connection drops here and the transport
            // closes with it.
            self.shared.drained.notify_waiters();
        }
    }
}
