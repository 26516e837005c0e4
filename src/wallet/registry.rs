//! Single owner of the current wallet list.
//!
//! The list is published as an immutable `Arc` snapshot through a watch channel. Readers (the
//! balance engine, the history aggregator) take a snapshot at the start of their work and never
//! observe edits made afterwards; every edit publishes a new snapshot, which the scheduler uses
//! to restart the refresh cycle.
//!
//! Addresses entering the registry are normalized with the coin's [`AddressFormat`], so they
//! compare equal to the addresses the backends report.

use crate::error::WalletSyncError;

use super::address::AddressFormat;
use super::types::WalletBase;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub type WalletList = Arc<Vec<WalletBase>>;

pub struct WalletRegistry {
	sender: watch::Sender<WalletList>,
	format: AddressFormat,
}

impl Default for WalletRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl WalletRegistry {
	pub fn new() -> Self {
		Self::with_format(AddressFormat::default())
	}

	pub fn with_format(format: AddressFormat) -> Self {
		let (sender, _) = watch::channel(Arc::new(Vec::new()));
		Self { sender, format }
	}

	fn normalized(&self, mut wallet: WalletBase) -> WalletBase {
		wallet.addresses = wallet
			.addresses
			.iter()
			.map(|a| self.format.normalize(a.as_str()))
			.collect();
		wallet
	}

	/// Snapshot of the current list.
	pub fn current(&self) -> WalletList {
		self.sender.borrow().clone()
	}

	/// Receiver that sees the current list and every later edit.
	pub fn subscribe(&self) -> watch::Receiver<WalletList> {
		self.sender.subscribe()
	}

	pub fn wallet(&self, id: &str) -> Option<WalletBase> {
		self.sender.borrow().iter().find(|w| w.id == id).cloned()
	}

	pub fn set_wallets(&self, wallets: Vec<WalletBase>) {
		info!("Wallet list replaced ({} wallets)", wallets.len());
		let wallets = wallets.into_iter().map(|w| self.normalized(w)).collect();
		self.sender.send_replace(Arc::new(wallets));
	}

	pub fn add_wallet(&self, wallet: WalletBase) -> Result<(), WalletSyncError> {
		let wallet = self.normalized(wallet);
		let mut result = Ok(());
		self.sender.send_if_modified(|list| {
			if list.iter().any(|w| w.id == wallet.id) {
				result = Err(WalletSyncError::Logic(format!(
					"A wallet with id {} already exists",
					wallet.id
				)));
				return false;
			}
			info!("Wallet added: {}", wallet.id);
			Arc::make_mut(list).push(wallet.clone());
			true
		});
		result
	}

	pub fn remove_wallet(&self, id: &str) -> Result<WalletBase, WalletSyncError> {
		let mut removed = None;
		self.sender.send_if_modified(|list| {
			match list.iter().position(|w| w.id == id) {
				Some(index) => {
					removed = Some(Arc::make_mut(list).remove(index));
					true
				}
				None => false,
			}
		});

		removed
			.inspect(|w| info!("Wallet removed: {}", w.id))
			.ok_or_else(|| WalletSyncError::Logic(format!("Unknown wallet id {}", id)))
	}

	/// Replaces a wallet in place, keeping its position in the list.
	pub fn replace_wallet(&self, wallet: WalletBase) -> Result<(), WalletSyncError> {
		let wallet = self.normalized(wallet);
		let mut replaced = false;
		self.sender.send_if_modified(|list| {
			match list.iter().position(|w| w.id == wallet.id) {
				Some(index) => {
					Arc::make_mut(list)[index] = wallet.clone();
					replaced = true;
					true
				}
				None => false,
			}
		});

		if replaced {
			Ok(())
		} else {
			Err(WalletSyncError::Logic(format!(
				"Unknown wallet id {}",
				wallet.id
			)))
		}
	}
}
