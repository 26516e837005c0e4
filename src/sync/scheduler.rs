//! Periodic Refresh Scheduler.
//!
//! Runs the balance engine on a timer. At most one cycle is active: every restart aborts the task
//! running the previous one and tags the new cycle with a fresh generation, so anything the old
//! cycle still had in flight can no longer commit. Successful cycles are followed by the update
//! period, failed ones by the shorter error period; both are stretched for remote backends.
//!
//! Edits to the wallet list restart the scheduler with a quick refresh first, so the published
//! balances follow the edit at once and the network refresh comes right after.

use super::balance::{BalanceEngine, CycleToken, RefreshMode};
use super::events::SyncEvent;
use crate::config::RefreshIntervals;
use crate::error::WalletSyncError;
use crate::operators::WalletsOperator;
use crate::wallet::WalletRegistry;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

struct SchedulerInner {
    engine: Arc<BalanceEngine>,
    registry: Arc<WalletRegistry>,
    wallets: Arc<dyn WalletsOperator>,
    intervals: RefreshIntervals,
    is_local: bool,
    /// Re-read wallets whose address list changed on the backend before each full refresh.
    check_outdated_wallets: bool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(
        engine: Arc<BalanceEngine>,
        registry: Arc<WalletRegistry>,
        wallets: Arc<dyn WalletsOperator>,
        intervals: RefreshIntervals,
        is_local: bool,
        check_outdated_wallets: bool,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                engine,
                registry,
                wallets,
                intervals,
                is_local,
                check_outdated_wallets,
                task: Mutex::new(None),
            }),
            watcher: Mutex::new(None),
        }
    }

    /// Starts refreshing now and follows wallet list edits until [`stop`](Self::stop).
    pub fn start(&self) {
        self.watch_wallets();
        self.inner.restart(Duration::ZERO, false);
    }

    /// Cancels the cycle in progress or waiting and schedules a new one after `delay`.
    pub fn restart(&self, delay: Duration, quick_first: bool) {
        self.inner.restart(delay, quick_first);
    }

    /// Runs a full refresh right away.
    pub fn refresh_now(&self) {
        self.inner.restart(Duration::ZERO, false);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
        self.inner.cancel();
        // Whatever was in flight can no longer commit.
        self.inner.engine.begin_cycle();
        self.inner.engine.bus().set_refreshing(false);
        info!("Refresh scheduler stopped");
    }

    fn watch_wallets(&self) {
        let mut changes = self.inner.registry.subscribe();
        let inner = self.inner.clone();

        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let wallets = changes.borrow_and_update().clone();
                inner.engine.bus().emit(SyncEvent::WalletsChanged {
                    wallets: wallets.len(),
                });

                if let Err(e) = inner.wallets.save_wallets(&wallets).await {
                    error!("Failed to save the wallet list: {}", e);
                }
                inner.restart(Duration::ZERO, true);
            }
        });

        if let Some(previous) = lock(&self.watcher).replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
        self.inner.cancel();
    }
}

impl SchedulerInner {
    fn restart(self: &Arc<Self>, delay: Duration, quick_first: bool) {
        let inner = self.clone();
        let mut task = lock(&self.task);
        if let Some(previous) = task.take() {
            previous.abort();
            // The aborted cycle never reaches its own reset.
            self.engine.bus().set_refreshing(false);
        }
        debug!("Refresh scheduled in {:?} (quick first: {})", delay, quick_first);
        *task = Some(tokio::spawn(async move {
            inner.run(delay, quick_first).await;
        }));
    }

    fn cancel(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }

    async fn run(&self, delay: Duration, quick_first: bool) {
        tokio::time::sleep(delay).await;

        if quick_first {
            let token = self.engine.begin_cycle();
            if let Err(e) = self.engine.refresh(token, RefreshMode::Quick).await {
                debug!("Quick refresh skipped: {}", e);
            }
        }

        loop {
            let token = self.engine.begin_cycle();
            let bus = self.engine.bus();
            bus.set_refreshing(true);
            info!("Refresh cycle {} started", token.generation());

            let next = match self.cycle(token).await {
                Ok(changed) => {
                    info!(
                        "Refresh cycle {} finished ({})",
                        token.generation(),
                        if changed { "changes published" } else { "no changes" }
                    );
                    bus.set_had_error(false);
                    self.intervals.success_delay(self.is_local)
                }
                Err(WalletSyncError::Superseded) => {
                    debug!("Refresh cycle {} superseded", token.generation());
                    return;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Refresh cycle {} failed: {}", token.generation(), e);
                    } else {
                        error!("Refresh cycle {} failed: {}", token.generation(), e);
                    }
                    bus.set_had_error(true);
                    self.intervals.error_delay(self.is_local)
                }
            };

            bus.set_refreshing(false);
            tokio::time::sleep(next).await;
        }
    }

    async fn cycle(&self, token: CycleToken) -> Result<bool, WalletSyncError> {
        if self.check_outdated_wallets {
            let current = self.registry.current();
            for wallet in self.wallets.outdated_wallets(&current).await? {
                info!("Wallet {} changed on the backend, replacing it", wallet.id);
                // The edit restarts the scheduler through the wallet watcher.
                self.registry.replace_wallet(wallet)?;
            }
        }

        self.engine.refresh(token, RefreshMode::Full).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, IndexerClient};
    use crate::config::{BackendFamily, CoinConfig};
    use crate::operators::{IndexerOperator, StoredWalletsOperator};
    use crate::storage::{KeyValueStore, MemoryStorage, StorageType};
    use crate::sync::events::NotificationBus;
    use crate::sync::fetcher::BatchFetcher;
    use crate::test_support::{FakeTransport, wallet};
    use crate::wallet::AddressFormat;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn coin() -> CoinConfig {
        CoinConfig {
            name: "BTC".to_string(),
            family: BackendFamily::Indexer,
            backend_url: "https://idx.example".to_string(),
            rpc_credentials: None,
            decimals: 8,
            confirmations_needed: 3,
            is_local: true,
            address_format: AddressFormat::Base58,
        }
    }

    fn intervals() -> RefreshIntervals {
        RefreshIntervals {
            update_period: Duration::from_millis(40),
            error_update_period: Duration::from_millis(10),
            remote_multiplier: 60,
        }
    }

    struct Harness {
        transport: Arc<FakeTransport>,
        registry: Arc<WalletRegistry>,
        storage: Arc<MemoryStorage>,
        engine: Arc<BalanceEngine>,
        scheduler: RefreshScheduler,
    }

    fn harness() -> Harness {
        let transport = Arc::new(FakeTransport::new());
        transport.route("address/A", Ok(json!({ "balance": "100000000", "unconfirmedBalance": "0" })));
        let registry = Arc::new(WalletRegistry::new());
        registry.set_wallets(vec![wallet("W", "W", &["A"])]);
        let storage = Arc::new(MemoryStorage::new());

        let operator = IndexerOperator::new(
            IndexerClient::new(transport.clone(), "https://idx.example"),
            &coin(),
        );
        let engine = Arc::new(BalanceEngine::new(
            registry.clone(),
            Arc::new(operator),
            BatchFetcher::new(2),
            Arc::new(NotificationBus::new()),
        ));
        let scheduler = RefreshScheduler::new(
            engine.clone(),
            registry.clone(),
            Arc::new(StoredWalletsOperator::new(storage.clone(), &coin())),
            intervals(),
            true,
            false,
        );

        Harness {
            transport,
            registry,
            storage,
            engine,
            scheduler,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn refreshes_periodically_and_publishes_once() {
        let h = harness();
        let mut events = h.engine.bus().subscribe_events();
        h.scheduler.start();

        wait_until(|| h.transport.calls_matching("address/A") >= 3).await;
        h.scheduler.stop();

        let mut changes = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SyncEvent::BalancesChanged { .. }) {
                changes += 1;
            }
        }
        assert_eq!(changes, 1);
        assert_eq!(h.engine.bus().balances()[0].current, Decimal::ONE);
        assert!(!h.engine.bus().refreshing());
        assert!(!h.engine.bus().had_error());
    }

    #[tokio::test]
    async fn failures_set_the_error_flag_until_a_success() {
        let h = harness();
        h.transport.route_sequence(
            "address/A",
            vec![
                Err(BackendError::fault("down")),
                Ok(json!({ "balance": "100000000", "unconfirmedBalance": "0" })),
            ],
        );
        let mut had_error = h.engine.bus().subscribe_had_error();
        h.scheduler.start();

        had_error.wait_for(|e| *e).await.unwrap();
        had_error.wait_for(|e| !*e).await.unwrap();
        h.scheduler.stop();

        assert_eq!(h.engine.bus().balances()[0].current, Decimal::ONE);
    }

    #[tokio::test]
    async fn wallet_edits_restart_and_are_saved() {
        let h = harness();
        h.scheduler.start();
        wait_until(|| h.engine.bus().first_full_update_made()).await;

        h.registry.add_wallet(wallet("N", "New", &["C"])).unwrap();
        wait_until(|| h.engine.bus().balances().len() == 2).await;
        h.scheduler.stop();

        let stored = h.storage.get(StorageType::Client, Some("wallets")).await.unwrap();
        assert!(stored.is_some_and(|v| v.to_string().contains("New")));
    }

    #[tokio::test]
    async fn restart_cancels_the_cycle_in_flight() {
        let h = harness();
        h.transport.set_delay(Duration::from_millis(50));

        h.scheduler.restart(Duration::ZERO, false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.scheduler.restart(Duration::from_secs(60), false);
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(h.engine.bus().balances().is_empty());
        assert!(h.scheduler.is_running());
        h.scheduler.stop();
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn waiting_after_a_restart_is_not_refreshing() {
        let h = harness();
        h.transport.set_delay(Duration::from_millis(50));

        h.scheduler.restart(Duration::ZERO, false);
        wait_until(|| h.engine.bus().refreshing()).await;
        h.scheduler.restart(Duration::from_secs(60), false);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.scheduler.is_running());
        assert!(!h.engine.bus().refreshing());
        h.scheduler.stop();
    }
}
