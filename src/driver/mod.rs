//! # Driver Seam
//!
//! This is THE contract between bolt-session and any wire driver. The wire
//! protocol itself (handshake, PackStream codec, routing) lives below this
//! seam; everything above it works with the raw value trees a decoding
//! driver hands back.
//!
//! ## Implementations
//!
//! | Driver | Module | Description |
//! |--------|--------|-------------|
//! | `FakeServer` | `harness` | In-process scriptable server for testing/embedding |
//! | (external) | | Any Bolt wire driver wrapped in these traits |

pub mod harness;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;
use crate::model::PropertyMap;
use crate::Result;

// ============================================================================
// Access mode
// ============================================================================

/// Transaction access mode, used by clustered servers to route work to a
/// writer or a reader member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
}

// ============================================================================
// Transaction arguments
// ============================================================================

/// Everything the server needs to know when a transaction begins.
#[derive(Debug, Clone, Copy)]
pub struct TxArgs<'a> {
    pub database: &'a str,
    pub mode: AccessMode,
    /// Causal floor: the transaction must not observe a state older than
    /// these bookmarks.
    pub bookmarks: &'a [String],
    /// Server-side transaction timeout, if the caller set one.
    pub timeout: Option<Duration>,
}

// ============================================================================
// Raw results
// ============================================================================

/// A value as decoded from PackStream by the wire driver, before
/// normalization.
///
/// Graph entities, temporal values, and spatial values all arrive as tagged
/// structures; the normalizer gives them shape or rejects unknown tags.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<RawValue>),
    /// Key order is meaningful and preserved through normalization.
    Map(Vec<(String, RawValue)>),
    /// PackStream structure: tag byte plus fields.
    Structure { tag: u8, fields: Vec<RawValue> },
}

/// One positional row. Field names live in the stream's column list.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub fields: Vec<RawValue>,
}

/// A complete raw result: column names plus every record of the stream.
///
/// The driver has already pulled the stream to its end; this layer
/// materializes, it does not re-stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawStream {
    pub columns: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl RawStream {
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            records: Vec::new(),
        }
    }

    pub fn push_row(&mut self, fields: Vec<RawValue>) {
        self.records.push(RawRecord { fields });
    }

    pub fn with_row(mut self, fields: Vec<RawValue>) -> Self {
        self.push_row(fields);
        self
    }
}

// ============================================================================
// Server errors
// ============================================================================

/// A failure reported by the server, e.g. `Neo.ClientError.Statement.SyntaxError`.
/// Code and message are preserved verbatim for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

impl ServerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }

    /// Whether a fresh attempt of the same work may succeed. Covers the
    /// `Neo.TransientError` class (deadlocks among them) and the
    /// cluster-role changes a driver is expected to chase.
    pub fn is_transient(&self) -> bool {
        self.code.starts_with("Neo.TransientError.")
            || self.code == "Neo.ClientError.Cluster.NotALeader"
            || self.code == "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
    }

    /// Whether the failure is the caller's fault (syntax, constraint,
    /// argument errors). Never retried.
    pub fn is_client(&self) -> bool {
        self.code.starts_with("Neo.ClientError.") && !self.is_transient()
    }
}

// ============================================================================
// Connection trait
// ============================================================================

/// One live transport channel to the server, already authenticated.
///
/// A connection holds at most one transaction at a time; `begin` while a
/// transaction is open is a protocol violation the server rejects. All
/// methods take `&mut self`: a connection is owned by one unit of work.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Cheap liveness probe (Bolt RESET round trip or equivalent).
    async fn ping(&mut self) -> Result<()>;

    /// Open a transaction with the given arguments.
    async fn begin(&mut self, args: TxArgs<'_>) -> Result<()>;

    /// Run one query inside the open transaction and pull its results.
    async fn run(
        &mut self,
        query: &str,
        params: &PropertyMap,
        fetch_size: usize,
    ) -> Result<RawStream>;

    /// Commit the open transaction. Returns the bookmark the server minted
    /// for the committed state, if any.
    async fn commit(&mut self) -> Result<Option<String>>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Discard any transaction state and return the connection to a clean,
    /// reusable state.
    async fn reset(&mut self) -> Result<()>;

    /// Close the channel. The server rolls back anything still open.
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport is still believed usable.
    fn is_open(&self) -> bool;
}

// ============================================================================
// Connector trait
// ============================================================================

/// Dials and authenticates connections. The pool calls this; nothing else
/// should.
///
/// Routing across cluster members, TLS, and protocol negotiation are the
/// connector's business, driven by the [`ConnectionConfig`] it receives.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    /// Establish one authenticated connection.
    ///
    /// Credential rejection must surface as [`Error::Authentication`] so the
    /// pool can fail fast instead of retrying; transport failures should
    /// surface as [`Error::Io`].
    ///
    /// [`Error::Authentication`]: crate::Error::Authentication
    /// [`Error::Io`]: crate::Error::Io
    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Conn>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let deadlock = ServerError::new(
            "Neo.TransientError.Transaction.DeadlockDetected",
            "deadlock",
        );
        assert!(deadlock.is_transient());
        assert!(!deadlock.is_client());

        let not_leader = ServerError::new("Neo.ClientError.Cluster.NotALeader", "moved");
        assert!(not_leader.is_transient());
    }

    #[test]
    fn test_client_classification() {
        let syntax = ServerError::new("Neo.ClientError.Statement.SyntaxError", "bad query");
        assert!(syntax.is_client());
        assert!(!syntax.is_transient());
    }

    #[test]
    fn test_message_preserved_verbatim() {
        let err = ServerError::new("Neo.ClientError.Statement.SyntaxError", "Invalid input 'X'");
        assert_eq!(err.to_string(), "Neo.ClientError.Statement.SyntaxError: Invalid input 'X'");
    }
}
