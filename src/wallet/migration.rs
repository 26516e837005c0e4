//! Versioned migration of persisted wallet records.
//!
//! Records written by older releases come in several shapes: a bare array of wallets, addresses
//! stored as plain strings, as `{address}` objects or as `{printableAddressInternal}` objects,
//! wallets without a `walletType`, and wallets carrying fields that no longer exist. All of them
//! are turned into the current [`WalletRecord`] once, at load time.

use crate::error::WalletSyncError;

use super::address::AddressFormat;
use super::types::{Address, WalletBase, WalletType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version written by [`WalletRecord::new`].
pub const WALLET_RECORD_VERSION: u32 = 1;

/// Persisted wallet list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
	pub version: u32,
	pub wallets: Vec<WalletBase>,
}

impl WalletRecord {
	pub fn new(wallets: Vec<WalletBase>) -> Self {
		Self {
			version: WALLET_RECORD_VERSION,
			wallets,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyWallet {
	#[serde(default)]
	id: Option<String>,
	#[serde(default)]
	label: Option<String>,
	#[serde(default)]
	addresses: Option<Vec<LegacyAddress>>,
	#[serde(default)]
	is_hardware: Option<bool>,
	#[serde(default)]
	wallet_type: Option<WalletType>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyAddress {
	Plain(String),
	Old {
		address: String,
	},
	#[serde(rename_all = "camelCase")]
	Current {
		printable_address_internal: String,
	},
	Unknown(Value),
}

impl LegacyAddress {
	fn raw(&self) -> Option<&str> {
		match self {
			LegacyAddress::Plain(a) => Some(a),
			LegacyAddress::Old { address } => Some(address),
			LegacyAddress::Current {
				printable_address_internal,
			} => Some(printable_address_internal),
			LegacyAddress::Unknown(_) => None,
		}
	}
}

/// Turns any persisted shape into the current wallet list.
///
/// # Arguments
/// * `record` - The value read from the key/value store. A JSON string is decoded first.
/// * `format` - Address format of the coin, applied to every stored address.
/// * `coin` - Coin the wallets are loaded for. Overrides whatever the record says.
pub fn migrate_record(
	record: Value,
	format: AddressFormat,
	coin: &str,
) -> Result<WalletRecord, WalletSyncError> {
	let record = match record {
		Value::String(encoded) => serde_json::from_str(&encoded)?,
		other => other,
	};

	let legacy_wallets = match record {
		Value::Null => Vec::new(),
		Value::Array(wallets) => wallets,
		Value::Object(mut object) => match object.remove("wallets") {
			Some(Value::Array(wallets)) => wallets,
			Some(Value::Null) | None => Vec::new(),
			Some(other) => {
				return Err(WalletSyncError::Parse(format!(
					"Expected a wallet list, got {}",
					other
				)));
			}
		},
		other => {
			return Err(WalletSyncError::Parse(format!(
				"Unexpected wallet record: {}",
				other
			)));
		}
	};

	let wallets = legacy_wallets
		.into_iter()
		.map(|w| migrate_wallet(serde_json::from_value(w)?, format, coin))
		.collect::<Result<Vec<_>, WalletSyncError>>()?;

	Ok(WalletRecord::new(wallets))
}

fn migrate_wallet(
	legacy: LegacyWallet,
	format: AddressFormat,
	coin: &str,
) -> Result<WalletBase, WalletSyncError> {
	let addresses: Vec<Address> = legacy
		.addresses
		.unwrap_or_default()
		.iter()
		.filter_map(LegacyAddress::raw)
		.map(|a| format.normalize(a))
		.collect();

	let is_hardware = legacy.is_hardware.unwrap_or(false);

	let id = match legacy.id {
		Some(id) if !id.is_empty() => id,
		// Hardware wallets are identified by their first address.
		_ if is_hardware => match addresses.first() {
			Some(first) => format!("{}-{}", coin, first),
			None => {
				return Err(WalletSyncError::Parse(
					"Hardware wallet without id or addresses".to_string(),
				));
			}
		},
		_ => {
			return Err(WalletSyncError::Parse(
				"Software wallet without id".to_string(),
			));
		}
	};

	Ok(WalletBase {
		label: legacy.label.unwrap_or_else(|| id.clone()),
		id,
		addresses,
		is_hardware,
		// Older releases only created deterministic wallets.
		wallet_type: legacy.wallet_type.unwrap_or(WalletType::Deterministic),
		coin: coin.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn migrates_legacy_array() {
		let legacy = json!([
			{
				"id": "w1",
				"label": "Main",
				"addresses": [
					"BC1QW508D6QEJXTDG4Y5R3ZARVARY0C5XW7KV8F3T4",
					{ "address": "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2", "confirmed": true },
					{ "printableAddressInternal": "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy" },
					{ "garbage": 1 }
				],
				"coins": "12.5",
				"hasHwSecurityWarning": true
			}
		]);

		let record = migrate_record(legacy, AddressFormat::Bech32, "BTC").unwrap();
		assert_eq!(record.version, WALLET_RECORD_VERSION);

		let wallet = &record.wallets[0];
		assert_eq!(wallet.id, "w1");
		assert_eq!(wallet.wallet_type, WalletType::Deterministic);
		assert_eq!(wallet.coin, "BTC");
		assert_eq!(
			wallet
				.addresses
				.iter()
				.map(|a| a.as_str())
				.collect::<Vec<_>>(),
			vec![
				"bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
				"1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2",
				"3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy",
			]
		);
	}

	#[test]
	fn hardware_wallet_id_comes_from_first_address() {
		let legacy = json!({
			"version": 1,
			"wallets": [{ "isHardware": true, "walletType": "bip44", "addresses": ["0xABCDEF0123456789ABCDEF0123456789ABCDEF01"] }]
		});

		let record = migrate_record(legacy, AddressFormat::Hex, "ETH").unwrap();
		let wallet = &record.wallets[0];
		assert_eq!(wallet.id, "ETH-0xabcdef0123456789abcdef0123456789abcdef01");
		assert_eq!(wallet.wallet_type, WalletType::Bip44);
		assert!(wallet.is_hardware);
	}

	#[test]
	fn accepts_string_encoded_records() {
		let current = WalletRecord::new(vec![crate::test_support::wallet("w", "W", &["A"])]);
		let encoded = Value::String(serde_json::to_string(&current).unwrap());

		let record = migrate_record(encoded, AddressFormat::Base58, "BTC").unwrap();
		assert_eq!(record, current);
	}

	#[test]
	fn empty_and_invalid_records() {
		assert!(
			migrate_record(Value::Null, AddressFormat::Base58, "BTC")
				.unwrap()
				.wallets
				.is_empty()
		);
		assert!(migrate_record(json!(5), AddressFormat::Base58, "BTC").is_err());
		assert!(migrate_record(json!([{ "label": "no id" }]), AddressFormat::Base58, "BTC").is_err());
	}
}
