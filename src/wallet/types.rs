use crate::config::HistoryLimits;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address already passed through the coin's format function. Two addresses are the same entity
/// iff their normalized strings are equal, so this type is the only key used for maps and sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
	/// Wraps a string that is known to be normalized already.
	pub fn new_unchecked(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
	#[default]
	Deterministic,
	Bip44,
	XPub,
}

/// A locally known wallet. Owns its address list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBase {
	pub id: String,
	pub label: String,
	pub addresses: Vec<Address>,
	pub is_hardware: bool,
	pub wallet_type: WalletType,
	pub coin: String,
}

/// Confirmed and predicted balance of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
	pub address: Address,
	pub current: Decimal,
	pub predicted: Decimal,
}

impl AddressBalance {
	pub fn zero(address: Address) -> Self {
		Self {
			address,
			current: Decimal::ZERO,
			predicted: Decimal::ZERO,
		}
	}

	/// Unconfirmed activity exists iff the two balances differ.
	pub fn has_pending(&self) -> bool {
		self.current != self.predicted
	}
}

/// Balance of a wallet. Totals are sums over `addresses`, which follows the wallet's address order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
	pub wallet_id: String,
	pub label: String,
	pub current: Decimal,
	pub predicted: Decimal,
	pub addresses: Vec<AddressBalance>,
}

impl WalletBalance {
	pub fn from_addresses(wallet: &WalletBase, addresses: Vec<AddressBalance>) -> Self {
		let current = addresses.iter().map(|a| a.current).sum();
		let predicted = addresses.iter().map(|a| a.predicted).sum();

		Self {
			wallet_id: wallet.id.clone(),
			label: wallet.label.clone(),
			current,
			predicted,
			addresses,
		}
	}

	pub fn has_pending_transactions(&self) -> bool {
		self.addresses.iter().any(AddressBalance::has_pending)
	}
}

/// Unspent output. `hash` is `txid/index` for UTXO chains and the node's id otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
	pub address: Address,
	pub coins: Decimal,
	pub hash: String,
	pub confirmations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletOutputs {
	pub wallet_id: String,
	pub label: String,
	pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
	Incoming,
	Outgoing,
	MovedBetweenAddresses,
	MovedBetweenWallets,
	MixedOrUnknown,
}

/// One side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEndpoint {
	/// Id of the output created (outputs) or spent (inputs).
	pub hash: String,
	/// `None` for endpoints without a standard address, like coinbase inputs.
	pub address: Option<Address>,
	pub coins: Decimal,
}

/// Transaction as retrieved, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
	pub id: String,
	/// Unix seconds, -1 if unknown.
	pub timestamp: i64,
	pub confirmations: u64,
	pub inputs: Vec<TxEndpoint>,
	pub outputs: Vec<TxEndpoint>,
}

/// Classified transaction. `transaction_type`, `balance`, `relevant_addresses` and
/// `involved_local_wallets` are derived on every pass and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
	pub id: String,
	pub timestamp: i64,
	pub confirmations: u64,
	pub confirmed: bool,
	pub inputs: Vec<TxEndpoint>,
	pub outputs: Vec<TxEndpoint>,
	pub fee: Decimal,
	pub transaction_type: TransactionType,
	pub relevant_addresses: Vec<Address>,
	pub involved_local_wallets: String,
	pub balance: Decimal,
	pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionLimitPolicy {
	#[default]
	NormalLimit,
	ExtraLimit,
	MaxAllowed,
}

impl TransactionLimitPolicy {
	/// Concrete per-address cap for a history request over `address_count` addresses.
	pub fn per_address_cap(&self, address_count: usize, limits: &HistoryLimits) -> usize {
		let normal = if address_count <= limits.few_addresses_threshold {
			limits.few_addresses_cap
		} else {
			limits.many_addresses_cap
		};

		match self {
			TransactionLimitPolicy::NormalLimit => normal,
			TransactionLimitPolicy::ExtraLimit => normal * limits.extra_multiplier,
			TransactionLimitPolicy::MaxAllowed => limits.max_allowed,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransactionHistory {
	/// Newest first, unknown timestamps last.
	pub transactions: Vec<Transaction>,
	/// True if at least one address has more transactions than the cap allowed to retrieve.
	pub addresses_with_more_transactions: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTransaction {
	pub id: String,
	pub coins: Decimal,
	pub timestamp: Option<i64>,
	pub confirmations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingTransactionsResponse {
	/// Pending transactions touching local addresses.
	pub user: Vec<PendingTransaction>,
	/// Every pending transaction the backend reported.
	pub all: Vec<PendingTransaction>,
}
