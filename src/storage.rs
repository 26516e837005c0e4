//!
//! Persistent key/value collaborator.
//!
//! Used for transaction notes and for the locally stored wallet list. A missing entry is
//! `Ok(None)`, never an error.

use crate::backend::LedgerNodeClient;
use crate::error::WalletSyncError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Namespace of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
	/// Client data, like the persisted wallet list.
	Client,
	/// User notes, keyed by transaction id.
	Notes,
}

impl StorageType {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageType::Client => "client",
			StorageType::Notes => "txid",
		}
	}
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
	/// Value stored under `key`, or with `key: None` an object holding every entry of the type.
	async fn get(
		&self,
		storage_type: StorageType,
		key: Option<&str>,
	) -> Result<Option<Value>, WalletSyncError>;

	async fn store(
		&self,
		storage_type: StorageType,
		key: &str,
		value: &str,
	) -> Result<(), WalletSyncError>;
}

/// Store backed by the ledger node's `data` endpoint.
pub struct LedgerNodeStorage {
	client: LedgerNodeClient,
}

impl LedgerNodeStorage {
	pub fn new(client: LedgerNodeClient) -> Self {
		Self { client }
	}
}

#[async_trait]
impl KeyValueStore for LedgerNodeStorage {
	async fn get(
		&self,
		storage_type: StorageType,
		key: Option<&str>,
	) -> Result<Option<Value>, WalletSyncError> {
		Ok(self.client.data(storage_type.as_str(), key).await?)
	}

	async fn store(
		&self,
		storage_type: StorageType,
		key: &str,
		value: &str,
	) -> Result<(), WalletSyncError> {
		Ok(self
			.client
			.store_data(storage_type.as_str(), key, value)
			.await?)
	}
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStorage {
	entries: RwLock<HashMap<StorageType, HashMap<String, String>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl KeyValueStore for MemoryStorage {
	async fn get(
		&self,
		storage_type: StorageType,
		key: Option<&str>,
	) -> Result<Option<Value>, WalletSyncError> {
		let entries = self.entries.read().await;
		let Some(bucket) = entries.get(&storage_type) else {
			return Ok(None);
		};

		Ok(match key {
			Some(key) => bucket.get(key).map(|v| Value::String(v.clone())),
			None => Some(Value::Object(
				bucket
					.iter()
					.map(|(k, v)| (k.clone(), Value::String(v.clone())))
					.collect::<Map<String, Value>>(),
			)),
		})
	}

	async fn store(
		&self,
		storage_type: StorageType,
		key: &str,
		value: &str,
	) -> Result<(), WalletSyncError> {
		self.entries
			.write()
			.await
			.entry(storage_type)
			.or_default()
			.insert(key.to_string(), value.to_string());
		Ok(())
	}
}
