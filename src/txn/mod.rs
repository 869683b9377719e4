//! Transaction Layer - one operation, one transaction, one pipeline pass
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  TransactionExecutor                             │
//! │  - Builds the ExecutionContext                   │
//! │  - Runs the pipeline around the operation        │
//! ├──────────────────────────────────────────────────┤
//! │  TransactionPipeline (observer stages)           │
//! │  - user observers -> metrics -> filtering ->     │
//! │    listeners -> the operation itself             │
//! ├──────────────────────────────────────────────────┤
//! │  TransactionHandler                              │
//! │  - begin / commit / rollback discipline          │
//! ├──────────────────────────────────────────────────┤
//! │  TxnOp                                           │
//! │  - Tagged union of every operation kind          │
//! │  - apply(session) dispatches exhaustively        │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod executor;
pub mod filter;
pub mod handler;
pub mod listener;
pub mod observer;
pub mod op;

pub use executor::{ExecutionContext, TransactionExecutor};
pub use filter::{FilterVerdict, TransactionFilter};
pub use handler::TransactionHandler;
pub use listener::TransactionListener;
pub use observer::{ObserverChain, TransactionObserver, TransactionPipeline};
pub use op::{Acquire, ChildOp, Mutator, OpKind, OpResult, TxnOp};
