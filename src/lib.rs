//! Wallet balance, output and history synchronization against indexer, node RPC and ledger node
//! backends.

pub mod backend;
pub mod config;
pub mod error;
pub mod operators;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::WalletSyncError;
