//! Balance Reconciliation Engine.
//!
//! One refresh cycle computes the balance of every wallet of a wallet list snapshot and commits
//! the result as a whole. Cycles are tagged with a generation number; a cycle whose generation is
//! no longer the latest when it finishes is dropped instead of committed, so results of a
//! superseded cycle are never visible. A failed cycle leaves the previous snapshot published.
//!
//! A full refresh goes to the backend and caches the raw per-wallet data. A quick refresh reuses
//! that cache, which reflects wallet list edits without waiting on the network.

use super::events::{NotificationBus, SyncEvent};
use super::fetcher::BatchFetcher;
use crate::error::WalletSyncError;
use crate::operators::{BalanceOperator, WalletBalanceData};
use crate::wallet::{
    Address, AddressBalance, Output, WalletBalance, WalletBase, WalletOutputs, WalletRegistry,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Computing,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Query the backend.
    Full,
    /// Reuse the data cached by the last full refresh.
    Quick,
}

/// Identifies one refresh cycle. Only the most recently issued token can commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleToken {
    generation: u64,
}

impl CycleToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Default)]
struct EngineState {
    /// Raw balances per wallet id, from the last full refresh.
    cache: HashMap<String, WalletBalanceData>,
    phase: Option<CyclePhase>,
}

pub struct BalanceEngine {
    registry: Arc<WalletRegistry>,
    operator: Arc<dyn BalanceOperator>,
    fetcher: BatchFetcher,
    bus: Arc<NotificationBus>,
    generation: AtomicU64,
    state: Mutex<EngineState>,
}

impl BalanceEngine {
    pub fn new(
        registry: Arc<WalletRegistry>,
        operator: Arc<dyn BalanceOperator>,
        fetcher: BatchFetcher,
        bus: Arc<NotificationBus>,
    ) -> Self {
        Self {
            registry,
            operator,
            fetcher,
            bus,
            generation: AtomicU64::new(0),
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    pub fn phase(&self) -> CyclePhase {
        self.lock_state().phase.unwrap_or(CyclePhase::Idle)
    }

    /// Starts a new cycle, superseding any cycle in flight.
    pub fn begin_cycle(&self) -> CycleToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        CycleToken { generation }
    }

    pub fn is_current(&self, token: CycleToken) -> bool {
        self.generation.load(Ordering::SeqCst) == token.generation
    }

    /// Runs one cycle and commits it.
    ///
    /// Returns whether a new snapshot was published. `Superseded` when a newer cycle started
    /// meanwhile; the result is then dropped.
    pub async fn refresh(
        &self,
        token: CycleToken,
        mode: RefreshMode,
    ) -> Result<bool, WalletSyncError> {
        self.set_phase(CyclePhase::Computing);
        self.bus.emit(SyncEvent::CycleStarted {
            generation: token.generation,
            mode,
        });

        // The wallet list is read once; edits made from now on restart the cycle instead.
        let wallets = self.registry.current();

        let computed = match mode {
            RefreshMode::Full => self.fetch_all_wallets(&wallets).await,
            RefreshMode::Quick => Ok(self.cached_data(&wallets)),
        };

        match computed {
            Ok(data) => self.commit(token, mode, &wallets, data),
            Err(e) if !self.is_current(token) => {
                debug!("Cycle {} failed after being superseded: {}", token.generation, e);
                self.superseded(token)
            }
            Err(e) => {
                warn!("Balance cycle {} failed: {}", token.generation, e);
                self.set_phase(CyclePhase::Failed);
                self.bus.emit(SyncEvent::CycleFailed {
                    generation: token.generation,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn fetch_all_wallets(
        &self,
        wallets: &[WalletBase],
    ) -> Result<HashMap<String, WalletBalanceData>, WalletSyncError> {
        let mut data = HashMap::new();
        for wallet in wallets {
            let balances = self.operator.wallet_balance(wallet, &self.fetcher).await?;
            data.insert(wallet.id.clone(), balances);
        }
        Ok(data)
    }

    fn cached_data(&self, wallets: &[WalletBase]) -> HashMap<String, WalletBalanceData> {
        let state = self.lock_state();
        wallets
            .iter()
            .filter_map(|w| state.cache.get(&w.id).map(|d| (w.id.clone(), d.clone())))
            .collect()
    }

    fn commit(
        &self,
        token: CycleToken,
        mode: RefreshMode,
        wallets: &[WalletBase],
        data: HashMap<String, WalletBalanceData>,
    ) -> Result<bool, WalletSyncError> {
        let mut state = self.lock_state();
        if !self.is_current(token) {
            drop(state);
            return self.superseded(token);
        }

        let all_cached = wallets.iter().all(|w| data.contains_key(&w.id));
        let snapshot: Vec<WalletBalance> = wallets
            .iter()
            .map(|wallet| build_wallet_balance(wallet, data.get(&wallet.id)))
            .collect();

        let has_pending = match mode {
            RefreshMode::Quick if !all_cached => self.bus.has_pending_transactions(),
            _ => snapshot.iter().any(WalletBalance::has_pending_transactions),
        };

        if mode == RefreshMode::Full {
            state.cache = data;
            self.bus.mark_full_update(Utc::now());
        }

        let changed = snapshot_changed(&self.bus.balances(), &snapshot);
        if changed {
            info!(
                "Cycle {} committed balances of {} wallets (pending: {})",
                token.generation,
                snapshot.len(),
                has_pending
            );
            let wallets = snapshot.len();
            self.bus.publish_balances(Arc::new(snapshot), has_pending);
            self.bus.emit(SyncEvent::BalancesChanged {
                generation: token.generation,
                wallets,
                has_pending_transactions: has_pending,
            });
        } else {
            debug!("Cycle {} found no changes", token.generation);
            self.bus.emit(SyncEvent::NoChanges {
                generation: token.generation,
            });
        }

        state.phase = Some(CyclePhase::Committed);
        Ok(changed)
    }

    fn superseded(&self, token: CycleToken) -> Result<bool, WalletSyncError> {
        info!("Discarding results of superseded cycle {}", token.generation);
        self.bus.emit(SyncEvent::Superseded {
            generation: token.generation,
        });
        Err(WalletSyncError::Superseded)
    }

    /// Unspent outputs of every wallet of the published snapshot, in wallet order.
    pub async fn outputs_with_wallets(&self) -> Result<Vec<WalletOutputs>, WalletSyncError> {
        let published = self.bus.balances();
        let wallets = self.registry.current();
        let wallets: Vec<&WalletBase> = published
            .iter()
            .filter_map(|b| wallets.iter().find(|w| w.id == b.wallet_id))
            .collect();

        let addresses: Vec<Address> = wallets
            .iter()
            .flat_map(|w| w.addresses.iter().cloned())
            .collect();
        let outputs = self.operator.outputs(&addresses, &self.fetcher).await?;

        Ok(wallets
            .into_iter()
            .map(|wallet| {
                let own: HashSet<&Address> = wallet.addresses.iter().collect();
                WalletOutputs {
                    wallet_id: wallet.id.clone(),
                    label: wallet.label.clone(),
                    outputs: outputs
                        .iter()
                        .filter(|o| own.contains(&o.address))
                        .cloned()
                        .collect(),
                }
            })
            .collect())
    }

    /// Unspent outputs of one wallet, sorted by output id.
    pub async fn wallet_unspent_outputs(
        &self,
        wallet: &WalletBase,
    ) -> Result<Vec<Output>, WalletSyncError> {
        let mut outputs = self
            .operator
            .outputs(&wallet.addresses, &self.fetcher)
            .await?;
        outputs.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(outputs)
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.lock_state().phase = Some(phase);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn build_wallet_balance(wallet: &WalletBase, data: Option<&WalletBalanceData>) -> WalletBalance {
    let addresses = wallet
        .addresses
        .iter()
        .map(|address| {
            data.and_then(|d| d.get(address))
                .cloned()
                .unwrap_or_else(|| AddressBalance::zero(address.clone()))
        })
        .collect();
    WalletBalance::from_addresses(wallet, addresses)
}

/// True if `next` must be published: the wallet ids, an address count or any balance differ.
pub fn snapshot_changed(previous: &[WalletBalance], next: &[WalletBalance]) -> bool {
    if previous.len() != next.len() {
        return true;
    }

    previous.iter().zip(next).any(|(old, new)| {
        old.wallet_id != new.wallet_id
            || old.addresses.len() != new.addresses.len()
            || old.current != new.current
            || old.predicted != new.predicted
            || old.addresses.iter().zip(&new.addresses).any(|(a, b)| {
                a.address != b.address || a.current != b.current || a.predicted != b.predicted
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, IndexerClient};
    use crate::config::{BackendFamily, CoinConfig};
    use crate::operators::IndexerOperator;
    use crate::test_support::{FakeTransport, addr, wallet};
    use crate::wallet::AddressFormat;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    fn coin() -> CoinConfig {
        CoinConfig {
            name: "BTC".to_string(),
            family: BackendFamily::Indexer,
            backend_url: "https://idx.example".to_string(),
            rpc_credentials: None,
            decimals: 8,
            confirmations_needed: 3,
            is_local: false,
            address_format: AddressFormat::Base58,
        }
    }

    fn engine(transport: Arc<FakeTransport>, registry: Arc<WalletRegistry>) -> BalanceEngine {
        let operator = IndexerOperator::new(IndexerClient::new(transport, "https://idx.example"), &coin());
        BalanceEngine::new(
            registry,
            Arc::new(operator),
            BatchFetcher::new(4),
            Arc::new(NotificationBus::new()),
        )
    }

    fn scripted_transport() -> Arc<FakeTransport> {
        let transport = Arc::new(FakeTransport::new());
        transport.route(
            "address/A",
            Ok(json!({ "balance": "100000000", "unconfirmedBalance": "0" })),
        );
        transport.route(
            "address/B",
            Ok(json!({ "balance": "50000000", "unconfirmedBalance": "25000000" })),
        );
        transport
    }

    fn registry(wallets: Vec<WalletBase>) -> Arc<WalletRegistry> {
        let registry = Arc::new(WalletRegistry::new());
        registry.set_wallets(wallets);
        registry
    }

    fn count_changes(events: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> usize {
        let mut changes = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SyncEvent::BalancesChanged { .. }) {
                changes += 1;
            }
        }
        changes
    }

    #[tokio::test]
    async fn full_refresh_publishes_wallet_totals() {
        let engine = engine(scripted_transport(), registry(vec![wallet("W", "W", &["A", "B"])]));

        let token = engine.begin_cycle();
        assert!(engine.refresh(token, RefreshMode::Full).await.unwrap());

        let snapshot = engine.bus().balances();
        assert_eq!(snapshot[0].current, Decimal::from_str("1.5").unwrap());
        assert_eq!(snapshot[0].predicted, Decimal::from_str("1.75").unwrap());
        assert!(engine.bus().has_pending_transactions());
        assert!(engine.bus().first_full_update_made());
        assert!(engine.bus().last_update_time().is_some());
        assert_eq!(engine.phase(), CyclePhase::Committed);
    }

    #[tokio::test]
    async fn unchanged_data_notifies_once() {
        let engine = engine(scripted_transport(), registry(vec![wallet("W", "W", &["A", "B"])]));
        let mut events = engine.bus().subscribe_events();

        for _ in 0..2 {
            let token = engine.begin_cycle();
            engine.refresh(token, RefreshMode::Full).await.unwrap();
        }

        assert_eq!(count_changes(&mut events), 1);
    }

    #[tokio::test]
    async fn superseded_cycle_is_not_committed() {
        let engine = engine(scripted_transport(), registry(vec![wallet("W", "W", &["A", "B"])]));

        let stale = engine.begin_cycle();
        let _newer = engine.begin_cycle();
        let result = engine.refresh(stale, RefreshMode::Full).await;

        assert!(matches!(result, Err(WalletSyncError::Superseded)));
        assert!(engine.bus().balances().is_empty());
        assert!(!engine.bus().first_full_update_made());
    }

    #[tokio::test]
    async fn failure_keeps_the_last_good_snapshot() {
        let transport = scripted_transport();
        let engine = engine(transport.clone(), registry(vec![wallet("W", "W", &["A", "B"])]));
        let token = engine.begin_cycle();
        engine.refresh(token, RefreshMode::Full).await.unwrap();

        transport.route("address/B", Err(BackendError::fault("boom")));
        let token = engine.begin_cycle();
        assert!(engine.refresh(token, RefreshMode::Full).await.is_err());

        assert_eq!(engine.phase(), CyclePhase::Failed);
        assert_eq!(engine.bus().balances()[0].current, Decimal::from_str("1.5").unwrap());
    }

    #[tokio::test]
    async fn quick_refresh_reflects_wallet_edits_without_requests() {
        let transport = scripted_transport();
        let registry = registry(vec![wallet("W", "W", &["A", "B"]), wallet("V", "V", &["A"])]);
        let engine = engine(transport.clone(), registry.clone());
        let token = engine.begin_cycle();
        engine.refresh(token, RefreshMode::Full).await.unwrap();
        let requests = transport.calls().len();

        registry.remove_wallet("V").unwrap();
        registry.add_wallet(wallet("N", "New", &["C"])).unwrap();
        let token = engine.begin_cycle();
        assert!(engine.refresh(token, RefreshMode::Quick).await.unwrap());

        assert_eq!(transport.calls().len(), requests);
        let snapshot = engine.bus().balances();
        let ids: Vec<&str> = snapshot.iter().map(|b| b.wallet_id.as_str()).collect();
        assert_eq!(ids, vec!["W", "N"]);
        assert_eq!(snapshot[1].current, Decimal::ZERO);
        assert!(engine.bus().has_pending_transactions());
    }

    #[test]
    fn diff_detects_membership_length_and_value_changes() {
        let w = wallet("W", "W", &["A"]);
        let base = vec![build_wallet_balance(&w, None)];

        assert!(!snapshot_changed(&base, &base.clone()));
        assert!(snapshot_changed(&[], &base));

        let longer = vec![build_wallet_balance(&wallet("W", "W", &["A", "B"]), None)];
        assert!(snapshot_changed(&base, &longer));

        let mut data = WalletBalanceData::new();
        data.insert(
            addr("A"),
            AddressBalance {
                address: addr("A"),
                current: Decimal::ONE,
                predicted: Decimal::ONE,
            },
        );
        let richer = vec![build_wallet_balance(&w, Some(&data))];
        assert!(snapshot_changed(&base, &richer));
    }

    #[tokio::test]
    async fn outputs_are_grouped_by_wallet() {
        let transport = scripted_transport();
        transport.route(
            "utxo/A",
            Ok(json!([{ "txid": "t1", "vout": 0, "value": "100000000", "confirmations": 4 }])),
        );
        transport.route(
            "utxo/B",
            Ok(json!([{ "txid": "t2", "vout": 1, "value": "50000000", "confirmations": 0 }])),
        );
        let engine = engine(
            transport,
            registry(vec![wallet("W", "W", &["A"]), wallet("V", "V", &["B"])]),
        );
        let token = engine.begin_cycle();
        engine.refresh(token, RefreshMode::Full).await.unwrap();

        let grouped = engine.outputs_with_wallets().await.unwrap();

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].outputs[0].hash, "t1/0");
        assert_eq!(grouped[1].outputs[0].hash, "t2/1");
    }
}
