//! Environment-driven configuration.
//!
//! `AppConfig::from_env` reads a `.env` file if present and then the process environment.
//! Every value has a per-family default except the indexer URL. Malformed numbers are reported
//! as [`WalletSyncError::Config`] instead of silently falling back.

use crate::error::WalletSyncError;
use crate::wallet::AddressFormat;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Backend protocol family a coin is synced against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFamily {
	/// Blockbook-style UTXO indexer.
	Indexer,
	/// Full node JSON-RPC with an address index.
	Rpc,
	/// Ledger node with its own REST API and wallet storage.
	Ledger,
}

impl BackendFamily {
	pub fn parse(value: &str) -> Result<Self, WalletSyncError> {
		match value.trim().to_lowercase().as_str() {
			"indexer" | "blockbook" => Ok(BackendFamily::Indexer),
			"rpc" | "node" => Ok(BackendFamily::Rpc),
			"ledger" | "fiber" => Ok(BackendFamily::Ledger),
			other => Err(WalletSyncError::Config(format!(
				"Unknown backend family: {}",
				other
			))),
		}
	}

	pub fn default_decimals(&self) -> u32 {
		match self {
			BackendFamily::Indexer | BackendFamily::Rpc => 8,
			BackendFamily::Ledger => 6,
		}
	}

	pub fn default_confirmations(&self) -> u64 {
		match self {
			BackendFamily::Indexer | BackendFamily::Rpc => 3,
			BackendFamily::Ledger => 1,
		}
	}

	pub fn default_url(&self) -> Option<&'static str> {
		match self {
			BackendFamily::Indexer => None,
			BackendFamily::Rpc => Some("http://127.0.0.1:8332"),
			BackendFamily::Ledger => Some("http://127.0.0.1:6420"),
		}
	}

	pub fn default_address_format(&self) -> AddressFormat {
		match self {
			BackendFamily::Indexer | BackendFamily::Rpc => AddressFormat::Bech32,
			BackendFamily::Ledger => AddressFormat::Base58,
		}
	}
}

#[derive(Debug, Clone)]
pub struct CoinConfig {
	pub name: String,
	pub family: BackendFamily,
	pub backend_url: String,
	pub rpc_credentials: Option<(String, String)>,
	/// Base units per coin, as a power of ten.
	pub decimals: u32,
	/// Confirmations after which a transaction counts as confirmed.
	pub confirmations_needed: u64,
	/// False when the backend is a third-party service that must be polled slowly.
	pub is_local: bool,
	pub address_format: AddressFormat,
}

/// Scheduler delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
	pub update_period: Duration,
	pub error_update_period: Duration,
	/// Applied to both periods for remote backends.
	pub remote_multiplier: u32,
}

impl Default for RefreshIntervals {
	fn default() -> Self {
		Self {
			update_period: Duration::from_secs(10),
			error_update_period: Duration::from_secs(2),
			remote_multiplier: 60,
		}
	}
}

impl RefreshIntervals {
	pub fn success_delay(&self, is_local: bool) -> Duration {
		self.scaled(self.update_period, is_local)
	}

	pub fn error_delay(&self, is_local: bool) -> Duration {
		self.scaled(self.error_update_period, is_local)
	}

	fn scaled(&self, period: Duration, is_local: bool) -> Duration {
		if is_local {
			period
		} else {
			period * self.remote_multiplier
		}
	}
}

/// Per-address transaction caps used by the history aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
	/// At most this many addresses count as "few".
	pub few_addresses_threshold: usize,
	pub few_addresses_cap: usize,
	pub many_addresses_cap: usize,
	pub extra_multiplier: usize,
	pub max_allowed: usize,
}

impl Default for HistoryLimits {
	fn default() -> Self {
		Self {
			few_addresses_threshold: 5,
			few_addresses_cap: 100,
			many_addresses_cap: 20,
			extra_multiplier: 5,
			max_allowed: 1000,
		}
	}
}

/// Request fan-out and transport settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
	/// Address queries in flight at once.
	pub concurrency: usize,
	pub request_timeout: Duration,
	/// Total time spent retrying an unreachable backend inside one request.
	pub retry_max_elapsed: Duration,
}

impl Default for FetchConfig {
	fn default() -> Self {
		Self {
			concurrency: 4,
			request_timeout: Duration::from_secs(30),
			retry_max_elapsed: Duration::from_secs(10),
		}
	}
}

#[derive(Debug, Clone)]
pub struct AppConfig {
	pub coin: CoinConfig,
	pub refresh: RefreshIntervals,
	pub history: HistoryLimits,
	pub fetch: FetchConfig,
	/// Ledger node holding the key/value store. Falls back to an in-memory store when unset
	/// and the coin itself is not synced against a ledger node.
	pub storage_url: Option<String>,
}

impl AppConfig {
	/// Load from `.env` and the process environment.
	pub fn from_env() -> Result<Self, WalletSyncError> {
		dotenvy::dotenv().ok();
		let config = Self::from_lookup(|key| env::var(key).ok())?;
		info!(
			"Loaded config: coin {} via {:?} at {}",
			config.coin.name, config.coin.family, config.coin.backend_url
		);
		Ok(config)
	}

	/// Load from an arbitrary variable source.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, WalletSyncError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

		let family = match var("BACKEND_FAMILY") {
			Some(value) => BackendFamily::parse(&value)?,
			None => BackendFamily::Indexer,
		};

		let backend_url = var("BACKEND_URL")
			.or_else(|| family.default_url().map(str::to_string))
			.ok_or_else(|| {
				WalletSyncError::Config("BACKEND_URL is required for indexer backends".to_string())
			})?;

		let rpc_credentials = match (var("RPC_USER"), var("RPC_PASSWORD")) {
			(Some(user), password) => Some((user, password.unwrap_or_default())),
			(None, _) => None,
		};

		let address_format = match var("ADDRESS_FORMAT") {
			Some(value) => AddressFormat::parse(&value)?,
			None => family.default_address_format(),
		};

		let coin = CoinConfig {
			name: var("COIN_NAME").unwrap_or_else(|| "BTC".to_string()),
			family,
			backend_url,
			rpc_credentials,
			decimals: parse_or(&var, "COIN_DECIMALS", family.default_decimals())?,
			confirmations_needed: parse_or(
				&var,
				"CONFIRMATIONS_NEEDED",
				family.default_confirmations(),
			)?,
			is_local: parse_or(&var, "BACKEND_IS_LOCAL", family == BackendFamily::Ledger)?,
			address_format,
		};

		let defaults = RefreshIntervals::default();
		let refresh = RefreshIntervals {
			update_period: Duration::from_secs(parse_or(
				&var,
				"UPDATE_PERIOD_SECS",
				defaults.update_period.as_secs(),
			)?),
			error_update_period: Duration::from_secs(parse_or(
				&var,
				"ERROR_UPDATE_PERIOD_SECS",
				defaults.error_update_period.as_secs(),
			)?),
			remote_multiplier: parse_or(&var, "REMOTE_PERIOD_MULTIPLIER", defaults.remote_multiplier)?,
		};

		let defaults = FetchConfig::default();
		let fetch = FetchConfig {
			concurrency: parse_or(&var, "FETCH_CONCURRENCY", defaults.concurrency)?,
			request_timeout: Duration::from_secs(parse_or(
				&var,
				"REQUEST_TIMEOUT_SECS",
				defaults.request_timeout.as_secs(),
			)?),
			retry_max_elapsed: Duration::from_secs(parse_or(
				&var,
				"RETRY_MAX_ELAPSED_SECS",
				defaults.retry_max_elapsed.as_secs(),
			)?),
		};

		if coin.decimals > 28 {
			return Err(WalletSyncError::Config(format!(
				"COIN_DECIMALS must be at most 28, got {}",
				coin.decimals
			)));
		}

		Ok(Self {
			coin,
			refresh,
			history: HistoryLimits::default(),
			fetch,
			storage_url: var("STORAGE_URL"),
		})
	}
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> Result<T, WalletSyncError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
	V: Fn(&str) -> Option<String>,
{
	match var(key) {
		Some(value) => value
			.parse()
			.map_err(|e| WalletSyncError::Config(format!("Invalid {} '{}': {}", key, value, e))),
		None => Ok(default),
	}
}
