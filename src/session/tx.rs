//! Explicit transactions.

use std::fmt;

use smallvec::smallvec;

use crate::driver::{Connection, Connector};
use crate::query::Query;
use crate::record::{normalize, RecordSet};
use crate::{Error, Result};

use super::{with_timeout, Session};

/// Where a transaction is in its life.
///
/// `OPEN -> (execute)* -> COMMITTED | ROLLED_BACK`. Exactly one of commit
/// or rollback terminates a transaction; any call on a terminal transaction
/// fails with [`Error::InvalidTransactionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxState::Open => "open",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled back",
        })
    }
}

/// An explicit transaction bound to one session.
///
/// Borrowing the session mutably means the session can do nothing else
/// while the transaction lives, which is exactly the one-open-transaction
/// invariant. Dropping an open transaction schedules an implicit rollback;
/// statements in it are never committed.
pub struct Transaction<'s, C: Connector> {
    session: &'s mut Session<C>,
    state: TxState,
}

impl<'s, C: Connector> Transaction<'s, C> {
    pub(super) fn new(session: &'s mut Session<C>) -> Self {
        Self { session, state: TxState::Open }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    fn check_open(&self) -> Result<()> {
        if self.state == TxState::Open {
            Ok(())
        } else {
            Err(Error::InvalidTransactionState { state: self.state })
        }
    }

    /// Run one statement inside the transaction. May be called repeatedly
    /// while the transaction is open. Statements are never retried here:
    /// the transaction's effects are not replayable from this layer.
    pub async fn execute(&mut self, query: impl Into<Query>) -> Result<RecordSet> {
        self.check_open()?;
        let query = query.into();
        let op_timeout = self.session.config.timeout;
        let fetch_size = self.session.fetch_size;

        let ran = {
            let conn = self.session.conn_mut();
            with_timeout(op_timeout, conn.run(query.text(), query.parameters(), fetch_size)).await
        };
        match ran {
            Ok(stream) => normalize(stream),
            Err(e) => {
                // A server-side rejection leaves the transaction failed but
                // the channel healthy; the caller decides to roll back.
                // Anything else means the channel is gone and the server
                // has already aborted the transaction.
                if !matches!(e, Error::Server(_)) {
                    self.session.discard_connection(&e);
                    self.state = TxState::RolledBack;
                }
                Err(e)
            }
        }
    }

    /// Commit and consume the server acknowledgment, advancing the
    /// session's bookmarks.
    pub async fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        let op_timeout = self.session.config.timeout;
        let committed = {
            let conn = self.session.conn_mut();
            with_timeout(op_timeout, conn.commit()).await
        };
        match committed {
            Ok(bookmark) => {
                self.state = TxState::Committed;
                if let Some(bookmark) = bookmark {
                    self.session.bookmarks = smallvec![bookmark];
                }
                Ok(())
            }
            Err(e) => {
                // A failed commit terminates the transaction either way.
                self.state = TxState::RolledBack;
                if !matches!(e, Error::Server(_)) {
                    self.session.discard_connection(&e);
                }
                Err(e)
            }
        }
    }

    /// Roll back, discarding every statement executed in the transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        let op_timeout = self.session.config.timeout;
        let rolled_back = {
            let conn = self.session.conn_mut();
            with_timeout(op_timeout, conn.rollback()).await
        };
        self.state = TxState::RolledBack;
        if let Err(e) = rolled_back {
            if !matches!(e, Error::Server(_)) {
                self.session.discard_connection(&e);
            }
            return Err(e);
        }
        Ok(())
    }
}

impl<C: Connector> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if self.state == TxState::Open {
            self.session.pending_rollback = true;
        }
    }
}
