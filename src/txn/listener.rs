//! Transaction Listeners - best-effort before/after/error hooks
//!
//! Listeners are purely observational. Every hook invocation is isolated: a
//! listener error is logged and never aborts the transaction or blocks the
//! other listeners.

use super::executor::ExecutionContext;
use crate::{Result, ShardError};

/// A registered lifecycle hook around executed operations.
pub trait TransactionListener: Send + Sync {
    /// Name of this listener (for logging)
    fn name(&self) -> &str {
        "listener"
    }

    fn before_execute(&self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn after_execute(&self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn after_error(&self, _ctx: &ExecutionContext, _error: &ShardError) -> Result<()> {
        Ok(())
    }
}
