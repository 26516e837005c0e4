//!
//! REST client for ledger nodes exposing `/api/v1` and `/api/v2`.
//!
//! POST requests are protected by an anti-forgery token. The token is read from `GET csrf`
//! right before every POST and attached as `X-CSRF-Token`; a node answering 404 on that
//! endpoint has the protection disabled and the POST goes out without a token.

use super::transport::Transport;
use super::types::*;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Droplets per coin on the ledger chain.
pub const LEDGER_DECIMALS: u32 = 6;

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerRequestOptions {
	/// Use `/api/v2/` instead of `/api/v1/`. v2 bodies are always JSON.
	pub use_v2: bool,
	/// Send POST bodies as JSON instead of form fields.
	pub send_as_json: bool,
}

impl LedgerRequestOptions {
	pub fn v2() -> Self {
		Self {
			use_v2: true,
			send_as_json: true,
		}
	}
}

/// Ledger node REST client
#[derive(Clone)]
pub struct LedgerNodeClient {
	transport: Arc<dyn Transport>,
	node_url: String,
}

impl LedgerNodeClient {
	/// Create a new ledger node client.
	///
	/// # Arguments
	/// * `transport` - Request executor.
	/// * `node_url` - Node URL, with or without the `/api/` suffix.
	pub fn new(transport: Arc<dyn Transport>, node_url: &str) -> Self {
		let node_url = if node_url.ends_with("/api/") {
			node_url.to_string()
		} else {
			format!("{}/api/", node_url.trim_end_matches('/'))
		};

		Self {
			transport,
			node_url,
		}
	}

	pub fn endpoint_url(&self, endpoint: &str, use_v2: bool) -> String {
		format!(
			"{}{}{}",
			self.node_url,
			if use_v2 { "v2/" } else { "v1/" },
			endpoint.trim_start_matches('/')
		)
	}

	/// GET an endpoint with query parameters.
	pub async fn get(
		&self,
		endpoint: &str,
		query: Vec<(String, String)>,
		options: LedgerRequestOptions,
	) -> Result<Value, BackendError> {
		let url = self.endpoint_url(endpoint, options.use_v2);
		debug!("GET {}", url);
		self.transport
			.request(BackendRequest::get(url).with_query(query))
			.await
	}

	/// POST to an endpoint, attaching the anti-forgery token when the node has one.
	pub async fn post(
		&self,
		endpoint: &str,
		fields: Vec<(String, String)>,
		options: LedgerRequestOptions,
	) -> Result<Value, BackendError> {
		let token = self.csrf_token().await?;
		let as_json = options.use_v2 || options.send_as_json;

		let body = if as_json {
			if fields.is_empty() {
				RequestBody::Empty
			} else {
				let object: Map<String, Value> = fields
					.into_iter()
					.map(|(k, v)| (k, Value::String(v)))
					.collect();
				RequestBody::Json(Value::Object(object))
			}
		} else {
			RequestBody::Form(fields)
		};

		let url = self.endpoint_url(endpoint, options.use_v2);
		debug!("POST {}", url);
		let mut request = BackendRequest::post(url, body);
		if let Some(token) = token {
			request = request.with_header("X-CSRF-Token", &token);
		}

		self.transport.request(request).await
	}

	/// Current anti-forgery token, or `None` when the node has the protection disabled.
	pub async fn csrf_token(&self) -> Result<Option<String>, BackendError> {
		match self
			.get("csrf", Vec::new(), LedgerRequestOptions::default())
			.await
		{
			Ok(value) => Ok(decode::<CsrfResponse>(value, "csrf")?.csrf_token),
			Err(BackendError::NotFound) => {
				debug!("CSRF protection disabled on node");
				Ok(None)
			}
			Err(e) => Err(e),
		}
	}

	pub async fn wallets(&self) -> Result<Vec<LedgerWallet>, BackendError> {
		let value = self
			.get("wallets", Vec::new(), LedgerRequestOptions::default())
			.await?;
		if value.is_null() {
			return Ok(Vec::new());
		}
		decode(value, "wallets")
	}

	pub async fn wallet(&self, id: &str) -> Result<LedgerWallet, BackendError> {
		let value = self
			.get(
				"wallet",
				params([("id", id.to_string())]),
				LedgerRequestOptions::default(),
			)
			.await?;
		decode(value, "wallet")
	}

	/// Balance of a wallet stored in the node.
	pub async fn wallet_balance(&self, id: &str) -> Result<LedgerBalance, BackendError> {
		let value = self
			.get(
				"wallet/balance",
				params([("id", id.to_string())]),
				LedgerRequestOptions::default(),
			)
			.await?;
		decode(value, "wallet/balance")
	}

	/// Balance of an arbitrary address list.
	pub async fn balance(&self, addresses: &[String]) -> Result<LedgerBalance, BackendError> {
		let value = self
			.post(
				"balance",
				params([("addrs", addresses.join(","))]),
				LedgerRequestOptions::default(),
			)
			.await?;
		decode(value, "balance")
	}

	pub async fn outputs(&self, addresses: &[String]) -> Result<LedgerOutputs, BackendError> {
		if addresses.is_empty() {
			return Ok(LedgerOutputs {
				head_outputs: Vec::new(),
			});
		}

		let value = self
			.post(
				"outputs",
				params([("addrs", addresses.join(","))]),
				LedgerRequestOptions::default(),
			)
			.await?;
		decode(value, "outputs")
	}

	/// Verbose transactions touching any of the addresses.
	pub async fn transactions(
		&self,
		addresses: &[String],
	) -> Result<Vec<LedgerTransaction>, BackendError> {
		let value = self
			.post(
				"transactions",
				params([
					("addrs", addresses.join(",")),
					("verbose", "true".to_string()),
				]),
				LedgerRequestOptions::default(),
			)
			.await?;
		if value.is_null() {
			return Ok(Vec::new());
		}
		decode(value, "transactions")
	}

	/// Verbose mempool content.
	pub async fn pending_transactions(&self) -> Result<Vec<LedgerPendingTransaction>, BackendError> {
		let value = self
			.get(
				"pendingTxs",
				params([("verbose", "true".to_string())]),
				LedgerRequestOptions::default(),
			)
			.await?;
		if value.is_null() {
			return Ok(Vec::new());
		}
		decode(value, "pendingTxs")
	}

	/// Adds addresses to a node wallet and returns them.
	pub async fn new_addresses(&self, id: &str, count: u32) -> Result<Vec<String>, BackendError> {
		let value = self
			.post(
				"wallet/newAddress",
				params([("id", id.to_string()), ("num", count.to_string())]),
				LedgerRequestOptions::default(),
			)
			.await?;

		value
			.get("addresses")
			.cloned()
			.map(|a| decode(a, "wallet/newAddress"))
			.unwrap_or_else(|| Ok(Vec::new()))
	}

	/// Asks the node to scan ahead for used addresses of a wallet.
	pub async fn scan_addresses(&self, id: &str, count: u32) -> Result<Vec<String>, BackendError> {
		let value = self
			.post(
				"wallet/scan",
				params([("id", id.to_string()), ("num", count.to_string())]),
				LedgerRequestOptions::default(),
			)
			.await?;

		value
			.get("addresses")
			.cloned()
			.map(|a| decode(a, "wallet/scan"))
			.unwrap_or_else(|| Ok(Vec::new()))
	}

	/// Reads the generic key/value store. `key: None` returns every entry of the type.
	pub async fn data(&self, data_type: &str, key: Option<&str>) -> Result<Option<Value>, BackendError> {
		let mut query = params([("type", data_type.to_string())]);
		if let Some(key) = key {
			query.push(("key".to_string(), key.to_string()));
		}

		match self.get("data", query, LedgerRequestOptions::v2()).await {
			Ok(value) => {
				let response: LedgerDataResponse = decode(value, "data")?;
				Ok(response.data.filter(|d| !d.is_null()))
			}
			Err(BackendError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn store_data(&self, data_type: &str, key: &str, value: &str) -> Result<(), BackendError> {
		self.post(
			"data",
			params([
				("type", data_type.to_string()),
				("key", key.to_string()),
				("val", value.to_string()),
			]),
			LedgerRequestOptions::v2(),
		)
		.await?;
		Ok(())
	}
}

fn decode<T: DeserializeOwned>(value: Value, endpoint: &str) -> Result<T, BackendError> {
	serde_json::from_value(value)
		.map_err(|e| BackendError::fault(format!("Unexpected node response for {}: {}", endpoint, e)))
}
