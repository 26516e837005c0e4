//! Operators for coins synced against a ledger node.
//!
//! The node keeps software wallets itself and answers balances, outputs and history for a whole
//! address list in one request, so these operators do not fan out per address. Balances come in
//! droplets; outputs and transactions in coins.

use super::stored_wallets::StoredWalletsOperator;
use super::{BalanceOperator, HistoryOperator, RawHistory, WalletBalanceData, WalletsOperator};
use crate::backend::{
    BackendError, LEDGER_DECIMALS, LedgerBalance, LedgerNodeClient, LedgerPendingTransaction,
    LedgerTransaction, LedgerWallet,
};
use crate::config::CoinConfig;
use crate::error::WalletSyncError;
use crate::storage::KeyValueStore;
use crate::sync::fetcher::BatchFetcher;
use crate::utils::{from_base_units, from_coins};
use crate::wallet::{
    Address, AddressBalance, AddressFormat, Output, PendingTransaction,
    PendingTransactionsResponse, RawTransaction, TxEndpoint, WalletBase, WalletType,
};
use async_trait::async_trait;
use chrono::DateTime;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

pub struct LedgerOperator {
    client: LedgerNodeClient,
    format: AddressFormat,
    confirmations_needed: u64,
}

impl LedgerOperator {
    pub fn new(client: LedgerNodeClient, coin: &CoinConfig) -> Self {
        Self {
            client,
            format: coin.address_format,
            confirmations_needed: coin.confirmations_needed,
        }
    }

    fn droplets(value: u64) -> Result<Decimal, WalletSyncError> {
        from_base_units(&value.to_string(), LEDGER_DECIMALS)
    }

    fn balance_data(
        &self,
        wallet: &WalletBase,
        balance: LedgerBalance,
    ) -> Result<WalletBalanceData, WalletSyncError> {
        let by_address: HashMap<Address, _> = balance
            .addresses
            .into_iter()
            .map(|(address, data)| (self.format.normalize(&address), data))
            .collect();

        let mut data = WalletBalanceData::new();
        for address in &wallet.addresses {
            let balance = match by_address.get(address) {
                Some(entry) => AddressBalance {
                    address: address.clone(),
                    current: Self::droplets(entry.confirmed.coins)?,
                    predicted: Self::droplets(entry.predicted.coins)?,
                },
                None => AddressBalance::zero(address.clone()),
            };
            data.insert(address.clone(), balance);
        }

        Ok(data)
    }

    fn raw_transaction(&self, tx: LedgerTransaction) -> Result<RawTransaction, WalletSyncError> {
        let inputs = tx
            .txn
            .inputs
            .iter()
            .map(|input| -> Result<TxEndpoint, WalletSyncError> {
                Ok(TxEndpoint {
                    hash: input.uxid.clone(),
                    address: Some(self.format.normalize(&input.owner)),
                    coins: from_coins(&input.coins)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = tx
            .txn
            .outputs
            .iter()
            .map(|output| -> Result<TxEndpoint, WalletSyncError> {
                Ok(TxEndpoint {
                    hash: output.uxid.clone(),
                    address: Some(self.format.normalize(&output.dst)),
                    coins: from_coins(&output.coins)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RawTransaction {
            id: tx.txn.txid,
            timestamp: tx.txn.timestamp.filter(|t| *t > 0).unwrap_or(-1),
            // The node only reports whether a transaction is in a block.
            confirmations: if tx.status.confirmed {
                self.confirmations_needed.max(1)
            } else {
                0
            },
            inputs,
            outputs,
        })
    }

    fn pending_transaction(
        &self,
        tx: &LedgerPendingTransaction,
    ) -> Result<PendingTransaction, WalletSyncError> {
        let mut coins = Decimal::ZERO;
        for output in &tx.transaction.outputs {
            coins += from_coins(&output.coins)?;
        }

        Ok(PendingTransaction {
            id: tx.transaction.txid.clone(),
            coins,
            timestamp: DateTime::parse_from_rfc3339(&tx.received)
                .map(|t| t.timestamp())
                .ok(),
            confirmations: 0,
        })
    }

    fn touches(&self, tx: &LedgerPendingTransaction, local: &HashSet<&Address>) -> bool {
        tx.transaction
            .inputs
            .iter()
            .any(|i| local.contains(&self.format.normalize(&i.owner)))
            || tx
                .transaction
                .outputs
                .iter()
                .any(|o| local.contains(&self.format.normalize(&o.dst)))
    }
}

fn raw_addresses(addresses: &[Address]) -> Vec<String> {
    addresses.iter().map(|a| a.as_str().to_string()).collect()
}

#[async_trait]
impl BalanceOperator for LedgerOperator {
    fn name(&self) -> &'static str {
        "ledger"
    }

    async fn wallet_balance(
        &self,
        wallet: &WalletBase,
        _fetcher: &BatchFetcher,
    ) -> Result<WalletBalanceData, WalletSyncError> {
        if wallet.addresses.is_empty() {
            return Ok(WalletBalanceData::new());
        }

        let response = if wallet.is_hardware {
            self.client.balance(&raw_addresses(&wallet.addresses)).await
        } else {
            self.client.wallet_balance(&wallet.id).await
        };

        let balance = match response {
            Ok(balance) => balance,
            Err(BackendError::NotFound) => LedgerBalance::default(),
            Err(e) => return Err(e.into()),
        };

        self.balance_data(wallet, balance)
    }

    async fn outputs(
        &self,
        addresses: &[Address],
        _fetcher: &BatchFetcher,
    ) -> Result<Vec<Output>, WalletSyncError> {
        let response = self.client.outputs(&raw_addresses(addresses)).await?;

        response
            .head_outputs
            .into_iter()
            .map(|output| -> Result<Output, WalletSyncError> {
                Ok(Output {
                    address: self.format.normalize(&output.address),
                    coins: from_coins(&output.coins)?,
                    hash: output.hash,
                    // Head outputs are always in a block.
                    confirmations: 1,
                })
            })
            .collect()
    }
}

#[async_trait]
impl HistoryOperator for LedgerOperator {
    async fn raw_transactions(
        &self,
        addresses: &[Address],
        _per_address_cap: usize,
        _fetcher: &BatchFetcher,
    ) -> Result<RawHistory, WalletSyncError> {
        if addresses.is_empty() {
            return Ok(RawHistory::default());
        }

        let mut seen = HashSet::new();
        let mut transactions = Vec::new();
        for tx in self.client.transactions(&raw_addresses(addresses)).await? {
            let tx = self.raw_transaction(tx)?;
            if seen.insert(tx.id.clone()) {
                transactions.push(tx);
            }
        }

        Ok(RawHistory {
            transactions,
            addresses_with_more_transactions: false,
        })
    }

    async fn pending_transactions(
        &self,
        local_addresses: &[Address],
        _fetcher: &BatchFetcher,
    ) -> Result<PendingTransactionsResponse, WalletSyncError> {
        let pending = self.client.pending_transactions().await?;
        let local: HashSet<&Address> = local_addresses.iter().collect();

        let mut response = PendingTransactionsResponse::default();
        for tx in &pending {
            let processed = self.pending_transaction(tx)?;
            if self.touches(tx, &local) {
                response.user.push(processed.clone());
            }
            response.all.push(processed);
        }

        Ok(response)
    }
}

/// Wallet list for ledger coins: software wallets live in the node, hardware wallets in the
/// key/value store.
pub struct LedgerWalletsOperator {
    client: LedgerNodeClient,
    hardware: StoredWalletsOperator,
    format: AddressFormat,
    coin_name: String,
}

impl LedgerWalletsOperator {
    pub fn new(client: LedgerNodeClient, storage: Arc<dyn KeyValueStore>, coin: &CoinConfig) -> Self {
        Self {
            client,
            hardware: StoredWalletsOperator::new(storage, coin),
            format: coin.address_format,
            coin_name: coin.name.clone(),
        }
    }

    fn process_wallet(&self, wallet: LedgerWallet) -> WalletBase {
        let wallet_type = match wallet.meta.wallet_type.as_deref() {
            Some("bip44") => WalletType::Bip44,
            Some("xpub") => WalletType::XPub,
            _ => WalletType::Deterministic,
        };

        WalletBase {
            label: wallet.meta.label,
            id: wallet.meta.filename,
            addresses: wallet
                .entries
                .iter()
                .map(|e| self.format.normalize(&e.address))
                .collect(),
            is_hardware: false,
            wallet_type,
            coin: self.coin_name.clone(),
        }
    }
}

impl LedgerWalletsOperator {
    /// Asks the node to add `count` addresses to a software wallet and returns the updated wallet.
    pub async fn add_addresses(
        &self,
        wallet: &WalletBase,
        count: u32,
    ) -> Result<WalletBase, WalletSyncError> {
        self.ensure_node_wallet(wallet)?;
        let added = self.client.new_addresses(&wallet.id, count).await?;
        info!("Node added {} addresses to wallet {}", added.len(), wallet.id);
        Ok(self.process_wallet(self.client.wallet(&wallet.id).await?))
    }

    /// Asks the node to look ahead for used addresses of a software wallet and returns the
    /// updated wallet.
    pub async fn scan_addresses(
        &self,
        wallet: &WalletBase,
        count: u32,
    ) -> Result<WalletBase, WalletSyncError> {
        self.ensure_node_wallet(wallet)?;
        let found = self.client.scan_addresses(&wallet.id, count).await?;
        info!("Scan found {} new addresses for wallet {}", found.len(), wallet.id);
        Ok(self.process_wallet(self.client.wallet(&wallet.id).await?))
    }

    fn ensure_node_wallet(&self, wallet: &WalletBase) -> Result<(), WalletSyncError> {
        if wallet.is_hardware {
            return Err(WalletSyncError::Logic(format!(
                "Wallet {} is a hardware wallet, its addresses are not managed by the node",
                wallet.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl WalletsOperator for LedgerWalletsOperator {
    async fn load_wallets(&self) -> Result<Vec<WalletBase>, WalletSyncError> {
        let mut wallets: Vec<WalletBase> = self
            .client
            .wallets()
            .await?
            .into_iter()
            .map(|w| self.process_wallet(w))
            .collect();

        let hardware = self.hardware.load_wallets().await?;
        wallets.extend(hardware.into_iter().filter(|w| w.is_hardware));

        info!("Loaded {} wallets from the node and local storage", wallets.len());
        Ok(wallets)
    }

    /// Only hardware wallets are saved; software wallets are owned by the node.
    async fn save_wallets(&self, wallets: &[WalletBase]) -> Result<(), WalletSyncError> {
        let hardware: Vec<WalletBase> = wallets.iter().filter(|w| w.is_hardware).cloned().collect();
        self.hardware.save_wallets(&hardware).await
    }

    async fn outdated_wallets(
        &self,
        wallets: &[WalletBase],
    ) -> Result<Vec<WalletBase>, WalletSyncError> {
        let node_wallets: HashMap<String, usize> = self
            .client
            .wallets()
            .await?
            .into_iter()
            .map(|w| (w.meta.filename, w.entries.len()))
            .collect();

        let mut outdated = Vec::new();
        for wallet in wallets.iter().filter(|w| !w.is_hardware) {
            // Wallets removed from the node are left alone.
            let Some(count) = node_wallets.get(&wallet.id) else {
                continue;
            };
            if *count != wallet.addresses.len() {
                warn!(
                    "Wallet {} has {} addresses in the node but {} locally",
                    wallet.id,
                    count,
                    wallet.addresses.len()
                );
                outdated.push(self.process_wallet(self.client.wallet(&wallet.id).await?));
            }
        }

        Ok(outdated)
    }
}
