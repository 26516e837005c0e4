//! Change notification bus.
//!
//! Every observable of the sync engine lives in its own watch channel, so a subscriber that
//! arrives late still sees the latest value immediately. A broadcast channel carries the same
//! changes as discrete [`SyncEvent`]s for consumers that want a log of what happened, without
//! replay.

use super::balance::RefreshMode;
use crate::wallet::WalletBalance;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Published balances, in wallet list order. Replaced as a whole on every commit.
pub type BalanceSnapshot = Arc<Vec<WalletBalance>>;

const EVENT_CAPACITY: usize = 64;

/// Events that occur during balance synchronization
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A refresh cycle started
    CycleStarted { generation: u64, mode: RefreshMode },
    /// A cycle committed a snapshot that differs from the previous one
    BalancesChanged {
        generation: u64,
        wallets: usize,
        has_pending_transactions: bool,
    },
    /// A cycle finished with nothing new to publish
    NoChanges { generation: u64 },
    /// A newer cycle started before this one could commit
    Superseded { generation: u64 },
    /// A cycle failed; the previous snapshot stays published
    CycleFailed { generation: u64, error: String },
    /// The wallet list changed and the engine restarts
    WalletsChanged { wallets: usize },
}

pub struct NotificationBus {
    balances: watch::Sender<BalanceSnapshot>,
    has_pending_transactions: watch::Sender<bool>,
    first_full_update_made: watch::Sender<bool>,
    refreshing: watch::Sender<bool>,
    had_error: watch::Sender<bool>,
    last_update_time: watch::Sender<Option<DateTime<Utc>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            balances: watch::Sender::new(Arc::new(Vec::new())),
            has_pending_transactions: watch::Sender::new(false),
            first_full_update_made: watch::Sender::new(false),
            refreshing: watch::Sender::new(false),
            had_error: watch::Sender::new(false),
            last_update_time: watch::Sender::new(None),
            events,
        }
    }

    pub fn balances(&self) -> BalanceSnapshot {
        self.balances.borrow().clone()
    }

    pub fn has_pending_transactions(&self) -> bool {
        *self.has_pending_transactions.borrow()
    }

    pub fn first_full_update_made(&self) -> bool {
        *self.first_full_update_made.borrow()
    }

    pub fn refreshing(&self) -> bool {
        *self.refreshing.borrow()
    }

    pub fn had_error(&self) -> bool {
        *self.had_error.borrow()
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        *self.last_update_time.borrow()
    }

    pub fn subscribe_balances(&self) -> watch::Receiver<BalanceSnapshot> {
        self.balances.subscribe()
    }

    pub fn subscribe_has_pending_transactions(&self) -> watch::Receiver<bool> {
        self.has_pending_transactions.subscribe()
    }

    pub fn subscribe_first_full_update_made(&self) -> watch::Receiver<bool> {
        self.first_full_update_made.subscribe()
    }

    pub fn subscribe_refreshing(&self) -> watch::Receiver<bool> {
        self.refreshing.subscribe()
    }

    pub fn subscribe_had_error(&self) -> watch::Receiver<bool> {
        self.had_error.subscribe()
    }

    pub fn subscribe_last_update_time(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_update_time.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Replaces the published snapshot. Callers only publish snapshots that differ.
    pub(crate) fn publish_balances(&self, snapshot: BalanceSnapshot, has_pending: bool) {
        self.balances.send_replace(snapshot);
        self.has_pending_transactions.send_if_modified(|current| {
            let modified = *current != has_pending;
            *current = has_pending;
            modified
        });
    }

    pub(crate) fn mark_full_update(&self, time: DateTime<Utc>) {
        self.last_update_time.send_replace(Some(time));
        self.first_full_update_made.send_if_modified(|made| !std::mem::replace(made, true));
    }

    pub(crate) fn set_refreshing(&self, value: bool) {
        set_flag(&self.refreshing, value);
    }

    pub(crate) fn set_had_error(&self, value: bool) {
        set_flag(&self.had_error, value);
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        if self.events.send(event.clone()).is_err() {
            debug!("Event without subscribers: {:?}", event);
        }
    }
}

fn set_flag(sender: &watch::Sender<bool>, value: bool) {
    sender.send_if_modified(|current| {
        let modified = *current != value;
        *current = value;
        modified
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_subscribers_see_the_latest_values() {
        let bus = NotificationBus::new();
        bus.set_had_error(true);
        bus.publish_balances(Arc::new(Vec::new()), true);

        let had_error = bus.subscribe_had_error();
        let pending = bus.subscribe_has_pending_transactions();
        assert!(*had_error.borrow());
        assert!(*pending.borrow());
    }

    #[tokio::test]
    async fn unchanged_flags_do_not_notify() {
        let bus = NotificationBus::new();
        let mut refreshing = bus.subscribe_refreshing();

        bus.set_refreshing(false);
        assert!(!refreshing.has_changed().unwrap());

        bus.set_refreshing(true);
        assert!(refreshing.has_changed().unwrap());
        refreshing.borrow_and_update();

        bus.set_refreshing(true);
        assert!(!refreshing.has_changed().unwrap());
    }

    #[tokio::test]
    async fn first_full_update_is_set_once() {
        let bus = NotificationBus::new();
        let mut made = bus.subscribe_first_full_update_made();

        bus.mark_full_update(Utc::now());
        assert!(made.has_changed().unwrap());
        made.borrow_and_update();

        bus.mark_full_update(Utc::now());
        assert!(!made.has_changed().unwrap());
        assert!(bus.last_update_time().is_some());
    }
}
