//! Core engine: the bid → track → settle loop.
//!
//! - `book`: shared in-memory portfolio with write-through persistence
//! - `watchers`: registry of live per-loan ledger subscriptions
//! - `lifecycle`: per-investment state machine
//! - `investor`: orchestrator wiring loan creation into bids

pub mod book;
pub mod investor;
pub mod lifecycle;
pub mod watchers;

use std::sync::Arc;

use crate::error::InvestorError;

/// Caller-supplied sink for failures raised inside event handlers.
pub type ErrorHook = Arc<dyn Fn(InvestorError) + Send + Sync>;

pub use book::PortfolioBook;
pub use investor::Investor;
pub use lifecycle::Lifecycle;
pub use watchers::WatcherRegistry;
