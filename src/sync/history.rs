//! Transaction History Aggregator.
//!
//! Fetches the raw history of a wallet (or of every wallet), removes duplicates reported by more
//! than one address, classifies every transaction against the local address ownership and
//! attaches the user's notes. Works on demand and independently of the refresh cycle, on the same
//! fetcher and backend.

use super::classify::{AddressOwnershipMap, classify};
use super::fetcher::BatchFetcher;
use crate::config::HistoryLimits;
use crate::error::WalletSyncError;
use crate::operators::HistoryOperator;
use crate::storage::{KeyValueStore, StorageType};
use crate::wallet::{
    Address, PendingTransaction, PendingTransactionsResponse, Transaction, TransactionHistory,
    TransactionLimitPolicy, WalletBase, WalletRegistry,
};
use itertools::Itertools;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct HistoryAggregator {
    registry: Arc<WalletRegistry>,
    operator: Arc<dyn HistoryOperator>,
    storage: Arc<dyn KeyValueStore>,
    fetcher: BatchFetcher,
    limits: HistoryLimits,
    confirmations_needed: u64,
}

impl HistoryAggregator {
    pub fn new(
        registry: Arc<WalletRegistry>,
        operator: Arc<dyn HistoryOperator>,
        storage: Arc<dyn KeyValueStore>,
        fetcher: BatchFetcher,
        limits: HistoryLimits,
        confirmations_needed: u64,
    ) -> Self {
        Self {
            registry,
            operator,
            storage,
            fetcher,
            limits,
            confirmations_needed,
        }
    }

    /// Classified history of `wallet`, or of every wallet when `None`.
    ///
    /// Transactions are newest first; those without a known timestamp come last, in retrieval
    /// order. Only the selected wallets take part in ownership, so a transfer to another local
    /// wallet reads as outgoing when a single wallet is selected.
    pub async fn transactions(
        &self,
        wallet: Option<&WalletBase>,
        policy: TransactionLimitPolicy,
    ) -> Result<TransactionHistory, WalletSyncError> {
        let wallets: Vec<WalletBase> = match wallet {
            Some(wallet) => vec![wallet.clone()],
            None => self.registry.current().to_vec(),
        };

        let owners = AddressOwnershipMap::build(&wallets);
        if owners.is_empty() {
            return Ok(TransactionHistory::default());
        }

        let addresses = owners.addresses();
        let cap = policy.per_address_cap(addresses.len(), &self.limits);
        debug!(
            "Fetching history of {} addresses, {} transactions per address",
            addresses.len(),
            cap
        );

        let raw = self
            .operator
            .raw_transactions(&addresses, cap, &self.fetcher)
            .await?;
        let notes = self.notes().await?;

        let mut transactions: Vec<Transaction> = raw
            .transactions
            .into_iter()
            .unique_by(|tx| tx.id.clone())
            .map(|tx| {
                let mut transaction = classify(tx, &owners, self.confirmations_needed);
                transaction.note = notes.get(&transaction.id).cloned();
                transaction
            })
            .collect();
        sort_newest_first(&mut transactions);

        info!(
            "History ready: {} transactions{}",
            transactions.len(),
            if raw.addresses_with_more_transactions {
                " (truncated)"
            } else {
                ""
            }
        );

        Ok(TransactionHistory {
            transactions,
            addresses_with_more_transactions: raw.addresses_with_more_transactions,
        })
    }

    /// Unconfirmed transactions, newest first.
    ///
    /// The backend answers in several requests that may see different confirmation counts, so
    /// anything that already reached the threshold is dropped here.
    pub async fn pending_transactions(
        &self,
    ) -> Result<PendingTransactionsResponse, WalletSyncError> {
        let wallets = self.registry.current();
        let addresses = AddressOwnershipMap::build(&wallets).addresses();

        let response = self
            .operator
            .pending_transactions(&addresses, &self.fetcher)
            .await?;

        let needed = self.confirmations_needed;
        let refilter = |list: Vec<PendingTransaction>| {
            let mut list: Vec<PendingTransaction> = list
                .into_iter()
                .filter(|tx| tx.confirmations < needed)
                .collect();
            list.sort_by_key(|tx| (tx.timestamp.is_none(), Reverse(tx.timestamp)));
            list
        };

        Ok(PendingTransactionsResponse {
            user: refilter(response.user),
            all: refilter(response.all),
        })
    }

    /// Whether each address of `wallet` ever received coins, according to its history.
    pub async fn addresses_used(
        &self,
        wallet: &WalletBase,
    ) -> Result<HashMap<Address, bool>, WalletSyncError> {
        let history = self
            .transactions(Some(wallet), TransactionLimitPolicy::MaxAllowed)
            .await?;

        let mut used: HashMap<Address, bool> =
            wallet.addresses.iter().map(|a| (a.clone(), false)).collect();
        for output in history.transactions.iter().flat_map(|tx| tx.outputs.iter()) {
            if let Some(flag) = output.address.as_ref().and_then(|a| used.get_mut(a)) {
                *flag = true;
            }
        }

        Ok(used)
    }

    /// Saves a note for a transaction. An empty note clears it.
    pub async fn set_note(&self, transaction_id: &str, note: &str) -> Result<(), WalletSyncError> {
        self.storage
            .store(StorageType::Notes, transaction_id, note.trim())
            .await
    }

    async fn notes(&self) -> Result<HashMap<String, String>, WalletSyncError> {
        let Some(Value::Object(entries)) = self.storage.get(StorageType::Notes, None).await? else {
            return Ok(HashMap::new());
        };

        Ok(entries
            .into_iter()
            .filter_map(|(id, note)| match note {
                Value::String(note) if !note.is_empty() => Some((id, note)),
                Value::String(_) | Value::Null => None,
                other => Some((id, other.to_string())),
            })
            .collect())
    }
}

/// Descending by timestamp, unknown (-1) last. Stable, so equal keys keep retrieval order.
pub fn sort_newest_first(transactions: &mut [Transaction]) {
    transactions.sort_by_key(|tx| (tx.timestamp < 0, Reverse(tx.timestamp)));
}
