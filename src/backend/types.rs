//! Request shapes, error taxonomy and wire types shared by the backend clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized failure classes for every backend family.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
	/// HTTP 404, or an RPC code meaning "no data". Callers turn this into an empty result.
	#[error("Not found")]
	NotFound,

	#[error("No connectivity: {0}")]
	NoConnectivity(String),

	#[error("Backend fault (status: {status:?}, code: {code:?}): {message}")]
	BackendFault {
		status: Option<u16>,
		code: Option<i64>,
		message: String,
	},
}

impl BackendError {
	pub fn fault(message: impl Into<String>) -> Self {
		BackendError::BackendFault {
			status: None,
			code: None,
			message: message.into(),
		}
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, BackendError::NotFound)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
	Get,
	Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
	Empty,
	Json(Value),
	/// Sent as `application/x-www-form-urlencoded`.
	Form(Vec<(String, String)>),
}

/// One request for a [`Transport`](super::Transport).
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
	pub method: HttpMethod,
	pub url: String,
	pub query: Vec<(String, String)>,
	pub headers: Vec<(String, String)>,
	pub basic_auth: Option<(String, String)>,
	pub body: RequestBody,
}

impl BackendRequest {
	pub fn get(url: impl Into<String>) -> Self {
		Self {
			method: HttpMethod::Get,
			url: url.into(),
			query: Vec::new(),
			headers: Vec::new(),
			basic_auth: None,
			body: RequestBody::Empty,
		}
	}

	pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
		Self {
			method: HttpMethod::Post,
			url: url.into(),
			query: Vec::new(),
			headers: Vec::new(),
			basic_auth: None,
			body,
		}
	}

	pub fn with_query(mut self, params: Vec<(String, String)>) -> Self {
		self.query = params;
		self
	}

	pub fn with_header(mut self, name: &str, value: &str) -> Self {
		self.headers.push((name.to_string(), value.to_string()));
		self
	}

	pub fn with_basic_auth(mut self, user: &str, password: &str) -> Self {
		self.basic_auth = Some((user.to_string(), password.to_string()));
		self
	}
}

/// Builds a `(key, value)` parameter list.
pub fn params<const N: usize>(pairs: [(&str, String); N]) -> Vec<(String, String)> {
	pairs
		.into_iter()
		.map(|(k, v)| (k.to_string(), v))
		.collect()
}

// Indexer (Blockbook-style) wire types
////////////////////////////////////////////////

/// Response of `GET api`.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerStatus {
	pub blockbook: IndexerChainInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerChainInfo {
	#[serde(rename = "bestHeight")]
	pub best_height: u64,
}

/// Response of `GET api/v2/address/{address}`. Amounts are base units as strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexerAddress {
	#[serde(default)]
	pub address: Option<String>,
	#[serde(default)]
	pub balance: Option<String>,
	#[serde(rename = "unconfirmedBalance", default)]
	pub unconfirmed_balance: Option<String>,
	#[serde(rename = "totalReceived", default)]
	pub total_received: Option<String>,
	#[serde(default)]
	pub transactions: Option<Vec<IndexerTransaction>>,
	#[serde(rename = "totalPages", default)]
	pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerTransaction {
	pub txid: String,
	#[serde(default)]
	pub vin: Vec<IndexerInput>,
	#[serde(default)]
	pub vout: Vec<IndexerOutput>,
	#[serde(rename = "blockTime", default)]
	pub block_time: Option<i64>,
	#[serde(default)]
	pub confirmations: Option<u64>,
	#[serde(default)]
	pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerInput {
	#[serde(default)]
	pub txid: Option<String>,
	#[serde(default)]
	pub vout: Option<u32>,
	#[serde(default)]
	pub addresses: Option<Vec<String>>,
	#[serde(rename = "isAddress", default)]
	pub is_address: bool,
	#[serde(default)]
	pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerOutput {
	#[serde(default)]
	pub value: Option<String>,
	#[serde(default)]
	pub n: u32,
	#[serde(default)]
	pub addresses: Option<Vec<String>>,
	#[serde(rename = "isAddress", default)]
	pub is_address: bool,
}

/// Element of `GET api/v2/utxo/{address}`.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerUtxo {
	pub txid: String,
	pub vout: u32,
	pub value: String,
	#[serde(default)]
	pub confirmations: u64,
}

// Node JSON-RPC wire types
////////////////////////////////////////////////

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
	pub code: i64,
	#[serde(default)]
	pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcEnvelope {
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub error: Option<RpcError>,
}

/// Verbose transaction returned by `searchrawtransactions`. Amounts are whole coins.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
	pub txid: String,
	#[serde(default)]
	pub vin: Vec<RpcInput>,
	#[serde(default)]
	pub vout: Vec<RpcOutput>,
	#[serde(default)]
	pub time: Option<i64>,
	#[serde(default)]
	pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcInput {
	#[serde(default)]
	pub coinbase: Option<String>,
	#[serde(default)]
	pub txid: Option<String>,
	#[serde(default)]
	pub vout: Option<u32>,
	#[serde(rename = "prevOut", default)]
	pub prev_out: Option<RpcPrevOut>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcPrevOut {
	#[serde(default)]
	pub addresses: Vec<String>,
	#[serde(default)]
	pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcOutput {
	#[serde(default)]
	pub value: Value,
	pub n: u32,
	#[serde(rename = "scriptPubKey")]
	pub script_pub_key: RpcScriptPubKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcScriptPubKey {
	#[serde(default)]
	pub addresses: Vec<String>,
}

// Ledger node wire types
////////////////////////////////////////////////

#[derive(Debug, Clone, Deserialize)]
pub struct CsrfResponse {
	#[serde(default)]
	pub csrf_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerCoinHours {
	/// Droplets.
	#[serde(default)]
	pub coins: u64,
	#[serde(default)]
	pub hours: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerAddressBalance {
	#[serde(default)]
	pub confirmed: LedgerCoinHours,
	#[serde(default)]
	pub predicted: LedgerCoinHours,
}

/// Response of `wallet/balance` and `balance`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerBalance {
	#[serde(default)]
	pub confirmed: Option<LedgerCoinHours>,
	#[serde(default)]
	pub predicted: Option<LedgerCoinHours>,
	#[serde(default)]
	pub addresses: std::collections::HashMap<String, LedgerAddressBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerWalletMeta {
	#[serde(default)]
	pub filename: String,
	#[serde(default)]
	pub label: String,
	#[serde(default)]
	pub encrypted: bool,
	#[serde(rename = "type", default)]
	pub wallet_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerWalletEntry {
	pub address: String,
	#[serde(default)]
	pub child_number: Option<u32>,
	#[serde(default)]
	pub change: Option<u32>,
}

/// Element of `wallets`, and response of `wallet?id=`.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerWallet {
	pub meta: LedgerWalletMeta,
	#[serde(default)]
	pub entries: Vec<LedgerWalletEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerOutputs {
	#[serde(default)]
	pub head_outputs: Vec<LedgerOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerOutput {
	pub hash: String,
	pub address: String,
	/// Whole coins as a decimal string.
	pub coins: String,
	#[serde(default)]
	pub calculated_hours: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerTxStatus {
	#[serde(default)]
	pub confirmed: bool,
	#[serde(default)]
	pub height: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerTxInput {
	pub uxid: String,
	pub owner: String,
	pub coins: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerTxOutput {
	pub uxid: String,
	pub dst: String,
	pub coins: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerTxBody {
	pub txid: String,
	#[serde(default)]
	pub timestamp: Option<i64>,
	#[serde(default)]
	pub inputs: Vec<LedgerTxInput>,
	#[serde(default)]
	pub outputs: Vec<LedgerTxOutput>,
}

/// Element of `transactions?verbose=true`.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerTransaction {
	pub status: LedgerTxStatus,
	pub txn: LedgerTxBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerPendingInput {
	pub owner: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerPendingOutput {
	pub dst: String,
	pub coins: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerPendingBody {
	pub txid: String,
	#[serde(default)]
	pub inputs: Vec<LedgerPendingInput>,
	#[serde(default)]
	pub outputs: Vec<LedgerPendingOutput>,
}

/// Element of `pendingTxs?verbose=true`.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerPendingTransaction {
	/// RFC3339 time the node received the transaction.
	pub received: String,
	pub transaction: LedgerPendingBody,
}

/// Envelope of the v2 `data` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDataResponse {
	#[serde(default)]
	pub data: Option<Value>,
}
