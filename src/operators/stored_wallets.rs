use super::WalletsOperator;
use crate::config::CoinConfig;
use crate::error::WalletSyncError;
use crate::storage::{KeyValueStore, StorageType};
use crate::wallet::migration::{WalletRecord, migrate_record};
use crate::wallet::{AddressFormat, WalletBase};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const WALLETS_KEY: &str = "wallets";

/// Wallet list kept in the key/value store, for backends that do not store wallets themselves.
pub struct StoredWalletsOperator {
    storage: Arc<dyn KeyValueStore>,
    format: AddressFormat,
    coin_name: String,
}

impl StoredWalletsOperator {
    pub fn new(storage: Arc<dyn KeyValueStore>, coin: &CoinConfig) -> Self {
        Self {
            storage,
            format: coin.address_format,
            coin_name: coin.name.clone(),
        }
    }
}

#[async_trait]
impl WalletsOperator for StoredWalletsOperator {
    async fn load_wallets(&self) -> Result<Vec<WalletBase>, WalletSyncError> {
        let stored = self
            .storage
            .get(StorageType::Client, Some(WALLETS_KEY))
            .await?
            .unwrap_or(Value::Null);

        let record = migrate_record(stored, self.format, &self.coin_name)?;
        info!("Loaded {} stored wallets", record.wallets.len());
        Ok(record.wallets)
    }

    async fn save_wallets(&self, wallets: &[WalletBase]) -> Result<(), WalletSyncError> {
        let record = serde_json::to_string(&WalletRecord::new(wallets.to_vec()))?;
        self.storage
            .store(StorageType::Client, WALLETS_KEY, &record)
            .await?;
        debug!("Saved {} wallets", wallets.len());
        Ok(())
    }
}
