//! Transaction Filters - policy gates evaluated before every operation
//!
//! Filters decide whether an operation may proceed. All registered filters are
//! evaluated (no short-circuit) so a blocked transaction reports every reason
//! at once. A filter that fails internally is fail-open: logged and treated as
//! Proceed, so a buggy extension can never block unrelated transactions.

use super::executor::ExecutionContext;
use crate::Result;

/// Verdict of a single filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Proceed,
    /// Block the transaction, with a reason surfaced to the caller.
    Block(String),
}

/// A registered policy gate.
pub trait TransactionFilter: Send + Sync {
    /// Name of this filter (for logging)
    fn name(&self) -> &str {
        "filter"
    }

    fn evaluate(&self, ctx: &ExecutionContext) -> Result<FilterVerdict>;
}
