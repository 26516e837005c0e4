//! Wallet sync orchestrator.
//!
//! Wires the components of one coin together: transport, backend clients and operators, the key/
//! value store, the wallet registry, the balance engine, the history aggregator and the refresh
//! scheduler. `start` loads the wallet list and begins refreshing; `shutdown` stops the scheduler.

use super::balance::BalanceEngine;
use super::events::NotificationBus;
use super::fetcher::BatchFetcher;
use super::history::HistoryAggregator;
use super::scheduler::RefreshScheduler;
use crate::backend::{HttpTransport, LedgerNodeClient, Transport};
use crate::config::{AppConfig, BackendFamily};
use crate::error::WalletSyncError;
use crate::operators::Operators;
use crate::storage::{KeyValueStore, LedgerNodeStorage, MemoryStorage};
use crate::wallet::WalletRegistry;
use std::sync::Arc;
use tracing::info;

pub struct WalletSyncOrchestrator {
    config: AppConfig,
    registry: Arc<WalletRegistry>,
    operators: Operators,
    engine: Arc<BalanceEngine>,
    history: HistoryAggregator,
    scheduler: RefreshScheduler,
}

impl WalletSyncOrchestrator {
    /// Builds every component over an HTTP transport.
    pub fn new(config: AppConfig) -> Result<Self, WalletSyncError> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
            config.fetch.request_timeout,
            config.fetch.retry_max_elapsed,
        )?);
        let storage = Self::storage_for(&config, transport.clone());
        Ok(Self::with_parts(config, transport, storage))
    }

    /// Key/value store: the configured node, else the coin's own ledger node, else memory.
    fn storage_for(config: &AppConfig, transport: Arc<dyn Transport>) -> Arc<dyn KeyValueStore> {
        let node_url = match (&config.storage_url, config.coin.family) {
            (Some(url), _) => Some(url.as_str()),
            (None, BackendFamily::Ledger) => Some(config.coin.backend_url.as_str()),
            (None, _) => None,
        };

        match node_url {
            Some(url) => {
                info!("Using node storage at {}", url);
                Arc::new(LedgerNodeStorage::new(LedgerNodeClient::new(transport, url)))
            }
            None => {
                info!("No storage node configured, wallets and notes are kept in memory");
                Arc::new(MemoryStorage::new())
            }
        }
    }

    pub fn with_parts(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let operators = Operators::for_coin(&config, transport, storage.clone());
        let fetcher = BatchFetcher::new(config.fetch.concurrency);
        let registry = Arc::new(WalletRegistry::with_format(config.coin.address_format));
        let bus = Arc::new(NotificationBus::new());

        let engine = Arc::new(BalanceEngine::new(
            registry.clone(),
            operators.balance.clone(),
            fetcher,
            bus,
        ));
        let history = HistoryAggregator::new(
            registry.clone(),
            operators.history.clone(),
            storage,
            fetcher,
            config.history,
            config.coin.confirmations_needed,
        );
        let scheduler = RefreshScheduler::new(
            engine.clone(),
            registry.clone(),
            operators.wallets.clone(),
            config.refresh,
            config.coin.is_local,
            config.coin.family == BackendFamily::Ledger,
        );

        info!(
            "Wallet sync for {} wired with the {} operator",
            config.coin.name,
            operators.balance.name()
        );

        Self {
            config,
            registry,
            operators,
            engine,
            history,
            scheduler,
        }
    }

    /// Loads the wallet list and starts refreshing.
    pub async fn start(&self) -> Result<(), WalletSyncError> {
        let wallets = self.operators.wallets.load_wallets().await?;
        info!(
            "Starting sync of {} {} wallets",
            wallets.len(),
            self.config.coin.name
        );
        self.registry.set_wallets(wallets);
        self.scheduler.start();
        Ok(())
    }

    pub fn shutdown(&self) {
        self.scheduler.stop();
        info!("Wallet sync for {} shut down", self.config.coin.name);
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WalletRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        self.engine.bus()
    }

    pub fn engine(&self) -> &Arc<BalanceEngine> {
        &self.engine
    }

    pub fn history(&self) -> &HistoryAggregator {
        &self.history
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoinConfig, FetchConfig, HistoryLimits, RefreshIntervals};
    use crate::storage::StorageType;
    use crate::test_support::FakeTransport;
    use crate::wallet::{AddressFormat, TransactionLimitPolicy};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;
    use std::time::Duration;

    fn config(family: BackendFamily, url: &str, address_format: AddressFormat) -> AppConfig {
        AppConfig {
            coin: CoinConfig {
                name: "TEST".to_string(),
                family,
                backend_url: url.to_string(),
                rpc_credentials: None,
                decimals: family.default_decimals(),
                confirmations_needed: 1,
                is_local: true,
                address_format,
            },
            refresh: RefreshIntervals {
                update_period: Duration::from_secs(60),
                error_update_period: Duration::from_secs(60),
                remote_multiplier: 1,
            },
            history: HistoryLimits::default(),
            fetch: FetchConfig::default(),
            storage_url: None,
        }
    }

    #[tokio::test]
    async fn indexer_coin_syncs_stored_wallets() {
        let transport = Arc::new(FakeTransport::new());
        transport.route(
            "address/a1",
            Ok(json!({ "balance": "150000000", "unconfirmedBalance": "-50000000" })),
        );
        let storage = Arc::new(MemoryStorage::new());
        storage
            .store(
                StorageType::Client,
                "wallets",
                r#"[{"id":"w1","label":"Savings","addresses":["a1"]}]"#,
            )
            .await
            .unwrap();

        let orchestrator = WalletSyncOrchestrator::with_parts(
            config(BackendFamily::Indexer, "https://idx.example", AddressFormat::Base58),
            transport,
            storage,
        );
        let mut balances = orchestrator.bus().subscribe_balances();
        orchestrator.start().await.unwrap();

        let snapshot = balances.wait_for(|b| !b.is_empty()).await.unwrap().clone();
        orchestrator.shutdown();

        assert_eq!(snapshot[0].label, "Savings");
        assert_eq!(snapshot[0].current, Decimal::from_str("1.5").unwrap());
        assert_eq!(snapshot[0].predicted, Decimal::ONE);
        assert!(orchestrator.bus().has_pending_transactions());
    }

    #[tokio::test]
    async fn ledger_coin_reads_wallets_and_history_from_the_node() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("v1/csrf", Ok(json!({ "csrf_token": "tok" })));
        transport.route(
            "v1/wallets",
            Ok(json!([{ "meta": { "filename": "a.wlt", "label": "A" }, "entries": [{ "address": "A1" }] }])),
        );
        transport.route(
            "v1/wallet/balance",
            Ok(json!({ "addresses": { "A1": { "confirmed": { "coins": 2000000 }, "predicted": { "coins": 2000000 } } } })),
        );
        transport.route(
            "v1/transactions",
            Ok(json!([{
                "status": { "confirmed": true },
                "txn": {
                    "txid": "t1",
                    "timestamp": 10,
                    "inputs": [{ "uxid": "u0", "owner": "X", "coins": "3" }],
                    "outputs": [{ "uxid": "u1", "dst": "A1", "coins": "2" }]
                }
            }])),
        );
        transport.route("v2/data", Ok(json!({ "data": null })));

        let config = config(BackendFamily::Ledger, "http://127.0.0.1:6420", AddressFormat::Base58);
        let storage = WalletSyncOrchestrator::storage_for(&config, transport.clone());
        let orchestrator = WalletSyncOrchestrator::with_parts(config, transport.clone(), storage);
        let mut balances = orchestrator.bus().subscribe_balances();
        orchestrator.start().await.unwrap();

        let snapshot = balances.wait_for(|b| !b.is_empty()).await.unwrap().clone();
        let history = orchestrator
            .history()
            .transactions(None, TransactionLimitPolicy::NormalLimit)
            .await
            .unwrap();
        orchestrator.shutdown();

        assert_eq!(snapshot[0].wallet_id, "a.wlt");
        assert_eq!(snapshot[0].current, Decimal::from(2));
        assert_eq!(history.transactions.len(), 1);
        assert_eq!(history.transactions[0].balance, Decimal::from(2));
        assert!(history.transactions[0].confirmed);
    }
}
