//!
//! REST client for Blockbook-style UTXO indexers.
//!
//! Every endpoint lives under `{base}/api/v2/`. The base URL is sanitized so that operators can
//! configure it with or without the trailing `/api/` segment.

use super::transport::Transport;
use super::types::*;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Level of transaction detail requested from `address/{a}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressDetails {
	/// Balances only.
	Basic,
	/// Balances plus a light version of every transaction.
	TxsLight,
}

impl AddressDetails {
	fn as_str(&self) -> &'static str {
		match self {
			AddressDetails::Basic => "basic",
			AddressDetails::TxsLight => "txslight",
		}
	}
}

/// Indexer REST client
#[derive(Clone)]
pub struct IndexerClient {
	transport: Arc<dyn Transport>,
	base_url: String,
}

impl IndexerClient {
	/// Create a new indexer client.
	///
	/// # Arguments
	/// * `transport` - Request executor.
	/// * `base_url` - Indexer URL, with or without the `/api/` suffix.
	pub fn new(transport: Arc<dyn Transport>, base_url: &str) -> Self {
		Self {
			transport,
			base_url: sanitize_base_url(base_url),
		}
	}

	/// Full URL for an endpoint. Endpoints are versioned unless they name the api root itself.
	pub fn endpoint_url(&self, endpoint: &str) -> String {
		let endpoint = endpoint.trim_start_matches('/');
		if endpoint.is_empty() || endpoint == "api" || endpoint.starts_with("api/") {
			let rest = endpoint.strip_prefix("api").unwrap_or(endpoint);
			format!("{}{}", self.base_url, rest.trim_start_matches('/'))
		} else {
			format!("{}v2/{}", self.base_url, endpoint)
		}
	}

	async fn get<T: DeserializeOwned>(
		&self,
		endpoint: &str,
		query: Vec<(String, String)>,
	) -> Result<T, BackendError> {
		let url = self.endpoint_url(endpoint);
		debug!("GET {}", url);
		let value = self
			.transport
			.request(BackendRequest::get(url).with_query(query))
			.await?;

		serde_json::from_value(value)
			.map_err(|e| BackendError::fault(format!("Unexpected indexer response for {}: {}", endpoint, e)))
	}

	/// Current chain status.
	pub async fn status(&self) -> Result<IndexerStatus, BackendError> {
		self.get("api", Vec::new()).await
	}

	/// Balances and, depending on `details`, one page of transactions for an address.
	///
	/// # Arguments
	/// * `address` - The address to query.
	/// * `details` - Level of detail.
	/// * `page_size` - Maximum number of transactions in the page.
	/// * `from_height` - Only include transactions from this block height on.
	pub async fn address(
		&self,
		address: &str,
		details: AddressDetails,
		page_size: Option<usize>,
		from_height: Option<u64>,
	) -> Result<IndexerAddress, BackendError> {
		let mut query = params([("details", details.as_str().to_string())]);
		if let Some(size) = page_size {
			query.push(("pageSize".to_string(), size.to_string()));
		}
		if let Some(from) = from_height {
			query.push(("from".to_string(), from.to_string()));
		}

		self.get(&format!("address/{}", address), query).await
	}

	/// Unspent outputs of an address.
	pub async fn utxo(&self, address: &str) -> Result<Vec<IndexerUtxo>, BackendError> {
		self.get(&format!("utxo/{}", address), Vec::new()).await
	}
}

fn sanitize_base_url(url: &str) -> String {
	if url.ends_with("/api/") {
		return url.to_string();
	}

	format!("{}/api/", url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::FakeTransport;
	use serde_json::json;

	#[test]
	fn sanitizes_base_url() {
		let transport = Arc::new(FakeTransport::new());
		let client = IndexerClient::new(transport.clone(), "https://idx.example");
		assert_eq!(
			client.endpoint_url("address/abc"),
			"https://idx.example/api/v2/address/abc"
		);
		assert_eq!(client.endpoint_url("api"), "https://idx.example/api/");

		let client = IndexerClient::new(transport, "https://idx.example/api/");
		assert_eq!(client.endpoint_url("/utxo/x"), "https://idx.example/api/v2/utxo/x");
	}

	#[tokio::test]
	async fn sends_details_and_paging() {
		let transport = Arc::new(FakeTransport::new());
		transport.route(
			"address/abc",
			Ok(json!({ "address": "abc", "balance": "10", "unconfirmedBalance": "-2" })),
		);
		let client = IndexerClient::new(transport.clone(), "https://idx.example");

		let data = client
			.address("abc", AddressDetails::TxsLight, Some(20), Some(700))
			.await
			.unwrap();
		assert_eq!(data.balance.as_deref(), Some("10"));
		assert_eq!(data.unconfirmed_balance.as_deref(), Some("-2"));

		let calls = transport.calls();
		assert_eq!(calls.len(), 1);
		assert_eq!(
			calls[0].query,
			params([
				("details", "txslight".to_string()),
				("pageSize", "20".to_string()),
				("from", "700".to_string()),
			])
		);
	}

	#[tokio::test]
	async fn propagates_not_found() {
		let transport = Arc::new(FakeTransport::new());
		transport.route("utxo/", Err(BackendError::NotFound));
		let client = IndexerClient::new(transport, "https://idx.example");

		assert_eq!(client.utxo("abc").await.unwrap_err(), BackendError::NotFound);
	}
}
