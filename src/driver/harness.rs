//! In-process reference driver.
//!
//! [`FakeServer`] is a scriptable stand-in for a Bolt server plus wire
//! driver: canned responses per query text, failure injection for dials and
//! statements, and a bookmark-versioned ledger of committed writes.
//!
//! ## Semantics
//!
//! - Every statement run inside a write transaction is recorded in the
//!   transaction frame; `commit` moves the frame into the committed ledger
//!   and mints a `fb:<seq>` bookmark. Rollback or connection death discards
//!   the frame.
//! - Readers observe the committed ledger up to a causal floor: the
//!   server's read horizon, raised by any bookmarks the transaction carries.
//!   With [`FakeServer::lag_reads`] the horizon stops advancing on commit,
//!   which simulates a lagging cluster member and makes bookmark chaining
//!   observable.
//!
//! Use this driver for:
//! - Testing session, transaction, and pool behavior without a server
//! - Embedding bolt-session in applications under test

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::ConnectionConfig;
use crate::model::PropertyMap;
use crate::{Error, Result};

use super::{AccessMode, Connection, Connector, RawStream, ServerError, TxArgs};

/// Bookmarks minted by the fake server look like `fb:42`.
const BOOKMARK_PREFIX: &str = "fb:";

/// What a scripted query handler returns: a result stream, or a server
/// error with its status code.
pub type HandlerResult = std::result::Result<RawStream, ServerError>;

type Handler = Arc<dyn Fn(&QueryContext<'_>) -> HandlerResult + Send + Sync>;

// ============================================================================
// FakeServer
// ============================================================================

/// A scriptable in-process server. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FakeServer {
    inner: Arc<RwLock<ServerState>>,
}

struct ServerState {
    user: String,
    password: String,
    handlers: Vec<(String, Handler)>,
    committed: Vec<CommittedWrite>,
    committed_seq: u64,
    /// What an unbookmarked reader observes. Tracks `committed_seq` unless
    /// `lag_reads` pins it, simulating a lagging cluster member.
    visible_horizon: u64,
    lag_reads: bool,
    dial_failures: VecDeque<String>,
    dial_attempts: u64,
    run_faults: VecDeque<ServerError>,
    run_disconnects: usize,
    run_delay: Option<Duration>,
    live_connections: usize,
}

/// One statement committed through a write transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedWrite {
    pub query: String,
    pub params: PropertyMap,
    /// Position in the server's write history; bookmark `fb:<seq>` covers it.
    pub seq: u64,
}

/// What a query handler gets to look at.
pub struct QueryContext<'a> {
    pub params: &'a PropertyMap,
    pub database: &'a str,
    pub mode: AccessMode,
    /// Committed writes below the transaction's causal floor.
    pub visible: &'a [CommittedWrite],
}

impl FakeServer {
    pub fn new() -> Self {
        Self::with_credentials(
            crate::config::DEFAULT_USER,
            crate::config::DEFAULT_PASSWD,
        )
    }

    /// A server that only accepts the given credentials.
    pub fn with_credentials(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState {
                user: user.into(),
                password: password.into(),
                handlers: Vec::new(),
                committed: Vec::new(),
                committed_seq: 0,
                visible_horizon: 0,
                lag_reads: false,
                dial_failures: VecDeque::new(),
                dial_attempts: 0,
                run_faults: VecDeque::new(),
                run_disconnects: 0,
                run_delay: None,
                live_connections: 0,
            })),
        }
    }

    /// A connector for this server, to hand to a [`Client`].
    ///
    /// [`Client`]: crate::Client
    pub fn connector(&self) -> HarnessConnector {
        HarnessConnector { inner: Arc::clone(&self.inner) }
    }

    /// Script a response for an exact query text. The handler sees the
    /// parameters and the writes visible at the transaction's causal floor.
    pub fn handle(
        &self,
        query: impl Into<String>,
        handler: impl Fn(&QueryContext<'_>) -> HandlerResult + Send + Sync + 'static,
    ) {
        self.inner
            .write()
            .handlers
            .push((query.into(), Arc::new(handler)));
    }

    /// Script a fixed result for an exact query text.
    pub fn respond(&self, query: impl Into<String>, stream: RawStream) {
        self.handle(query, move |_| Ok(stream.clone()));
    }

    /// The next `n` dials fail with a connection-refused I/O error.
    pub fn fail_dials(&self, n: usize, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.inner.write();
        for _ in 0..n {
            state.dial_failures.push_back(message.clone());
        }
    }

    /// The next statement fails with the given server error, once.
    pub fn fail_next_run(&self, error: ServerError) {
        self.inner.write().run_faults.push_back(error);
    }

    /// The next `n` statements kill their connection mid-flight, surfacing
    /// a transport error. Any open transaction dies with the channel.
    pub fn drop_connection_on_run(&self, n: usize) {
        self.inner.write().run_disconnects += n;
    }

    /// Every statement takes this long before the server answers.
    pub fn delay_runs(&self, delay: Duration) {
        self.inner.write().run_delay = Some(delay);
    }

    /// Pin the read horizon: commits still advance the write history, but
    /// unbookmarked readers stop seeing new writes. Turns bookmark chaining
    /// from a no-op into an observable contract.
    pub fn lag_reads(&self, lag: bool) {
        self.inner.write().lag_reads = lag;
    }

    /// How many times a connection was dialed (including failed dials).
    pub fn dial_attempts(&self) -> u64 {
        self.inner.read().dial_attempts
    }

    /// Snapshot of the committed write ledger.
    pub fn committed(&self) -> Vec<CommittedWrite> {
        self.inner.read().committed.clone()
    }

    /// Connections currently alive (dialed and not yet closed or dropped).
    pub fn live_connections(&self) -> usize {
        self.inner.read().live_connections
    }

    /// The bookmark covering everything committed so far.
    pub fn latest_bookmark(&self) -> String {
        format!("{BOOKMARK_PREFIX}{}", self.inner.read().committed_seq)
    }
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bookmark(bookmark: &str) -> Option<u64> {
    bookmark.strip_prefix(BOOKMARK_PREFIX)?.parse().ok()
}

// ============================================================================
// HarnessConnector
// ============================================================================

/// Dials [`HarnessConnection`]s against a [`FakeServer`].
#[derive(Clone)]
pub struct HarnessConnector {
    inner: Arc<RwLock<ServerState>>,
}

#[async_trait]
impl Connector for HarnessConnector {
    type Conn = HarnessConnection;

    async fn connect(&self, config: &ConnectionConfig) -> Result<HarnessConnection> {
        let mut state = self.inner.write();
        state.dial_attempts += 1;
        if let Some(message) = state.dial_failures.pop_front() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                message,
            )));
        }
        if config.user != state.user || config.password != state.password {
            return Err(Error::Authentication(format!(
                "the client is unauthorized for user `{}`",
                config.user
            )));
        }
        state.live_connections += 1;
        Ok(HarnessConnection {
            inner: Arc::clone(&self.inner),
            open: true,
            tx: None,
        })
    }
}

// ============================================================================
// HarnessConnection
// ============================================================================

/// One live channel to a [`FakeServer`].
pub struct HarnessConnection {
    inner: Arc<RwLock<ServerState>>,
    open: bool,
    tx: Option<TxFrame>,
}

struct TxFrame {
    database: String,
    mode: AccessMode,
    /// Causal floor: max of the server's read horizon and the transaction's
    /// bookmarks at begin time.
    floor: u64,
    writes: Vec<(String, PropertyMap)>,
}

impl std::fmt::Debug for HarnessConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessConnection")
            .field("open", &self.open)
            .field("in_tx", &self.tx.is_some())
            .finish()
    }
}

impl HarnessConnection {
    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection is closed",
            )))
        }
    }

    fn protocol_violation(message: &str) -> Error {
        Error::Server(ServerError::new("Neo.ClientError.Request.Invalid", message))
    }
}

#[async_trait]
impl Connection for HarnessConnection {
    async fn ping(&mut self) -> Result<()> {
        self.check_open()
    }

    async fn begin(&mut self, args: TxArgs<'_>) -> Result<()> {
        self.check_open()?;
        if self.tx.is_some() {
            return Err(Self::protocol_violation("transaction already open"));
        }
        let state = self.inner.read();
        let bookmark_floor = args
            .bookmarks
            .iter()
            .filter_map(|b| parse_bookmark(b))
            .max()
            .unwrap_or(0);
        self.tx = Some(TxFrame {
            database: args.database.to_owned(),
            mode: args.mode,
            floor: state.visible_horizon.max(bookmark_floor),
            writes: Vec::new(),
        });
        Ok(())
    }

    async fn run(
        &mut self,
        query: &str,
        params: &PropertyMap,
        _fetch_size: usize,
    ) -> Result<RawStream> {
        self.check_open()?;
        let frame = self
            .tx
            .as_ref()
            .ok_or_else(|| Self::protocol_violation("no open transaction"))?;
        let (database, mode, floor) = (frame.database.clone(), frame.mode, frame.floor);

        let delay = self.inner.read().run_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (handler, visible) = {
            let mut state = self.inner.write();
            if state.run_disconnects > 0 {
                state.run_disconnects -= 1;
                state.live_connections -= 1;
                drop(state);
                self.open = false;
                self.tx = None;
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
            }
            if let Some(fault) = state.run_faults.pop_front() {
                return Err(Error::Server(fault));
            }
            let handler = state
                .handlers
                .iter()
                .find(|(text, _)| text == query)
                .map(|(_, h)| Arc::clone(h));
            let visible: Vec<CommittedWrite> = state
                .committed
                .iter()
                .filter(|w| w.seq <= floor)
                .cloned()
                .collect();
            (handler, visible)
        };

        let stream = match handler {
            Some(handler) => {
                let ctx = QueryContext {
                    params,
                    database: &database,
                    mode,
                    visible: &visible,
                };
                handler(&ctx).map_err(Error::Server)?
            }
            // A statement nobody scripted: treat it as a write with no
            // result rows, like CREATE without RETURN.
            None => RawStream::default(),
        };

        if mode == AccessMode::Write {
            if let Some(frame) = self.tx.as_mut() {
                frame.writes.push((query.to_owned(), params.clone()));
            }
        }
        Ok(stream)
    }

    async fn commit(&mut self) -> Result<Option<String>> {
        self.check_open()?;
        let frame = self
            .tx
            .take()
            .ok_or_else(|| Self::protocol_violation("no open transaction to commit"))?;
        let mut state = self.inner.write();
        for (query, params) in frame.writes {
            state.committed_seq += 1;
            let seq = state.committed_seq;
            state.committed.push(CommittedWrite { query, params, seq });
        }
        if !state.lag_reads {
            state.visible_horizon = state.committed_seq;
        }
        Ok(Some(format!("{BOOKMARK_PREFIX}{}", state.committed_seq)))
    }

    async fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        if self.tx.take().is_none() {
            return Err(Self::protocol_violation("no open transaction to roll back"));
        }
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        self.check_open()?;
        self.tx = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.tx = None;
            self.inner.write().live_connections -= 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for HarnessConnection {
    fn drop(&mut self) {
        // A dropped channel takes any open transaction with it; the frame
        // was never committed, so its writes vanish, same as a real server
        // rolling back on socket death.
        if self.open {
            self.inner.write().live_connections -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RawValue;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::default()
    }

    #[tokio::test]
    async fn test_commit_mints_bookmark_and_records_write() {
        let server = FakeServer::new();
        let mut conn = server.connector().connect(&test_config()).await.unwrap();
        conn.begin(TxArgs {
            database: "neo4j",
            mode: AccessMode::Write,
            bookmarks: &[],
            timeout: None,
        })
        .await
        .unwrap();
        conn.run("CREATE (n)", &PropertyMap::new(), 1000).await.unwrap();
        let bookmark = conn.commit().await.unwrap();
        assert_eq!(bookmark.as_deref(), Some("fb:1"));
        assert_eq!(server.committed().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_connection_discards_open_transaction() {
        let server = FakeServer::new();
        let mut conn = server.connector().connect(&test_config()).await.unwrap();
        conn.begin(TxArgs {
            database: "neo4j",
            mode: AccessMode::Write,
            bookmarks: &[],
            timeout: None,
        })
        .await
        .unwrap();
        conn.run("CREATE (n)", &PropertyMap::new(), 1000).await.unwrap();
        drop(conn);
        assert!(server.committed().is_empty());
        assert_eq!(server.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_bookmark_raises_causal_floor() {
        let server = FakeServer::new();
        server.lag_reads(true);
        server.handle("MATCH (n) RETURN count(n) AS c", |ctx| {
            Ok(RawStream::new(["c"]).with_row(vec![RawValue::Int(ctx.visible.len() as i64)]))
        });

        let connector = server.connector();
        let mut writer = connector.connect(&test_config()).await.unwrap();
        writer
            .begin(TxArgs {
                database: "neo4j",
                mode: AccessMode::Write,
                bookmarks: &[],
                timeout: None,
            })
            .await
            .unwrap();
        writer.run("CREATE (n)", &PropertyMap::new(), 1000).await.unwrap();
        let bookmark = writer.commit().await.unwrap().unwrap();

        let mut reader = connector.connect(&test_config()).await.unwrap();
        reader
            .begin(TxArgs {
                database: "neo4j",
                mode: AccessMode::Read,
                bookmarks: &[],
                timeout: None,
            })
            .await
            .unwrap();
        let unchained = reader
            .run("MATCH (n) RETURN count(n) AS c", &PropertyMap::new(), 1000)
            .await
            .unwrap();
        assert_eq!(unchained.records[0].fields, vec![RawValue::Int(0)]);
        reader.rollback().await.unwrap();

        let chained_bookmarks = [bookmark];
        reader
            .begin(TxArgs {
                database: "neo4j",
                mode: AccessMode::Read,
                bookmarks: &chained_bookmarks,
                timeout: None,
            })
            .await
            .unwrap();
        let chained = reader
            .run("MATCH (n) RETURN count(n) AS c", &PropertyMap::new(), 1000)
            .await
            .unwrap();
        assert_eq!(chained.records[0].fields, vec![RawValue::Int(1)]);
    }

    #[tokio::test]
    async fn test_rejects_wrong_credentials() {
        let server = FakeServer::with_credentials("ada", "secret");
        let err = server.connector().connect(&test_config()).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }
}
