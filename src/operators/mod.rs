//! Per-backend-family capabilities.
//!
//! Each family implements three narrow traits over its backend client: balances and outputs,
//! raw transaction history, and where the wallet list lives. The engine, the history aggregator
//! and the scheduler only see the traits; [`Operators::for_coin`] picks the implementations
//! from the configuration.

mod indexer;
mod ledger;
mod rpc;
mod stored_wallets;

pub use indexer::IndexerOperator;
pub use ledger::{LedgerOperator, LedgerWalletsOperator};
pub use rpc::RpcOperator;
pub use stored_wallets::StoredWalletsOperator;

use crate::backend::{
    IndexerClient, LedgerNodeClient, NodeRpcClient, Transport,
};
use crate::config::{AppConfig, BackendFamily};
use crate::error::WalletSyncError;
use crate::storage::KeyValueStore;
use crate::sync::fetcher::BatchFetcher;
use crate::wallet::{
    Address, AddressBalance, Output, PendingTransactionsResponse, RawTransaction, WalletBase,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Raw per-address balances of one wallet, as retrieved. Cached by the engine for quick refreshes.
pub type WalletBalanceData = HashMap<Address, AddressBalance>;

/// Transactions retrieved for a set of addresses, deduplicated by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHistory {
    pub transactions: Vec<RawTransaction>,
    /// Some address had more transactions than the cap allowed to retrieve.
    pub addresses_with_more_transactions: bool,
}

#[async_trait]
pub trait BalanceOperator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Balances of every address of `wallet`. Addresses the backend does not know are zero.
    async fn wallet_balance(
        &self,
        wallet: &WalletBase,
        fetcher: &BatchFetcher,
    ) -> Result<WalletBalanceData, WalletSyncError>;

    /// Unspent outputs owned by `addresses`.
    async fn outputs(
        &self,
        addresses: &[Address],
        fetcher: &BatchFetcher,
    ) -> Result<Vec<Output>, WalletSyncError>;
}

#[async_trait]
pub trait HistoryOperator: Send + Sync {
    /// Transactions touching `addresses`, at most `per_address_cap` per address where the
    /// backend paginates.
    async fn raw_transactions(
        &self,
        addresses: &[Address],
        per_address_cap: usize,
        fetcher: &BatchFetcher,
    ) -> Result<RawHistory, WalletSyncError>;

    /// Candidate pending transactions. `user` holds the ones touching `local_addresses`.
    async fn pending_transactions(
        &self,
        local_addresses: &[Address],
        fetcher: &BatchFetcher,
    ) -> Result<PendingTransactionsResponse, WalletSyncError>;
}

#[async_trait]
pub trait WalletsOperator: Send + Sync {
    async fn load_wallets(&self) -> Result<Vec<WalletBase>, WalletSyncError>;

    async fn save_wallets(&self, wallets: &[WalletBase]) -> Result<(), WalletSyncError>;

    /// Wallets whose address list differs on the backend, re-read from it. Backends that do not
    /// own wallets never report any.
    async fn outdated_wallets(
        &self,
        _wallets: &[WalletBase],
    ) -> Result<Vec<WalletBase>, WalletSyncError> {
        Ok(Vec::new())
    }
}

/// The capability set of one coin.
#[derive(Clone)]
pub struct Operators {
    pub balance: Arc<dyn BalanceOperator>,
    pub history: Arc<dyn HistoryOperator>,
    pub wallets: Arc<dyn WalletsOperator>,
}

impl Operators {
    pub fn for_coin(
        config: &AppConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let coin = &config.coin;
        match coin.family {
            BackendFamily::Indexer => {
                let operator = Arc::new(IndexerOperator::new(
                    IndexerClient::new(transport, &coin.backend_url),
                    coin,
                ));
                Self {
                    balance: operator.clone(),
                    history: operator,
                    wallets: Arc::new(StoredWalletsOperator::new(storage, coin)),
                }
            }
            BackendFamily::Rpc => {
                let operator = Arc::new(RpcOperator::new(
                    NodeRpcClient::new(transport, &coin.backend_url, coin.rpc_credentials.clone()),
                    coin,
                ));
                Self {
                    balance: operator.clone(),
                    history: operator,
                    wallets: Arc::new(StoredWalletsOperator::new(storage, coin)),
                }
            }
            BackendFamily::Ledger => {
                let client = LedgerNodeClient::new(transport, &coin.backend_url);
                let operator = Arc::new(LedgerOperator::new(client.clone(), coin));
                Self {
                    balance: operator.clone(),
                    history: operator,
                    wallets: Arc::new(LedgerWalletsOperator::new(client, storage, coin)),
                }
            }
        }
    }
}
