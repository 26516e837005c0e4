//! Balance and history synchronization.
//!
//! - `fetcher`: runs one query per address with bounded concurrency, exactly once per address.
//! - `progress_tracker`: per-batch accounting and completion checks for the fetcher.
//! - `classify`: fee, type and balance effect of a transaction from local address ownership.
//! - `balance`: the reconciliation engine; computes and commits balance snapshots.
//! - `history`: classified, deduplicated and annotated transaction history.
//! - `events`: the notification bus the engine publishes through.
//! - `scheduler`: drives the engine on a timer and restarts it on wallet list edits.
//! - `orchestrator`: wires all of the above for one coin.

/// Balance reconciliation engine
pub mod balance;
/// Transaction classification
pub mod classify;
/// Change notification bus
pub mod events;
/// Address batch fetcher
pub mod fetcher;
/// Transaction history aggregator
pub mod history;
/// Main coordinator for one coin
pub mod orchestrator;
/// Tracks per-batch progress and statistics
pub mod progress_tracker;
/// Periodic refresh scheduler
pub mod scheduler;

pub use balance::{BalanceEngine, CyclePhase, CycleToken, RefreshMode};
pub use events::{BalanceSnapshot, NotificationBus, SyncEvent};
pub use fetcher::BatchFetcher;
pub use history::HistoryAggregator;
pub use orchestrator::WalletSyncOrchestrator;
pub use scheduler::RefreshScheduler;
