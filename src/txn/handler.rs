//! Transaction Handler - scoped begin/commit/rollback discipline
//!
//! Wraps a session for the duration of one executed operation. The invariant:
//! exactly one of commit or rollback per opened transaction, and neither when
//! the transaction was never opened (the read-only fast path).

use crate::config::ShardingOptions;
use crate::session::Session;
use crate::Result;

/// Scoped transaction around a session bound to one shard.
pub struct TransactionHandler<S: Session> {
    session: S,
    read_only: bool,
    skip_read_only_txn: bool,
    active: bool,
}

impl<S: Session> TransactionHandler<S> {
    pub fn new(session: S, read_only: bool, options: &ShardingOptions) -> Self {
        Self {
            session,
            read_only,
            skip_read_only_txn: options.skip_read_only_transaction,
            active: false,
        }
    }

    /// Open the transaction. Read-only work is skipped entirely when the
    /// options ask for it; in that case `after_end`/`on_error` do nothing.
    pub fn before_start(&mut self) -> Result<()> {
        if self.read_only && self.skip_read_only_txn {
            return Ok(());
        }
        self.session.begin(self.read_only)?;
        self.active = true;
        Ok(())
    }

    /// Commit, if a transaction was opened.
    pub fn after_end(&mut self) -> Result<()> {
        if self.active {
            self.active = false;
            self.session.commit()?;
        }
        Ok(())
    }

    /// Roll back, if a transaction was opened. A rollback failure is logged;
    /// the original operation error still surfaces to the caller.
    pub fn on_error(&mut self) {
        if self.active {
            self.active = false;
            if let Err(rollback_err) = self.session.rollback() {
                log::error!("rollback failed: {}", rollback_err);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

// ============================================================================
// Tests
// ============================================================================
