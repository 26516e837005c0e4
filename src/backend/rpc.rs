//!
//! JSON-RPC client for full nodes with an address index.
//!
//! Requests are posted as `{jsonrpc, method, params, id}` with Basic authentication. A response
//! carrying an `error` field is turned into a [`BackendError::BackendFault`] with the node's code.

use super::transport::Transport;
use super::types::*;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Node code returned by `searchrawtransactions` for addresses without history.
pub const RPC_NO_INFORMATION_CODE: i64 = -5;

/// Node JSON-RPC client
#[derive(Clone)]
pub struct NodeRpcClient {
	transport: Arc<dyn Transport>,
	node_url: String,
	credentials: Option<(String, String)>,
}

impl NodeRpcClient {
	/// Create a new RPC client.
	///
	/// # Arguments
	/// * `transport` - Request executor.
	/// * `node_url` - Endpoint receiving the JSON-RPC posts.
	/// * `credentials` - Basic-auth user and password, if the node requires them.
	pub fn new(
		transport: Arc<dyn Transport>,
		node_url: &str,
		credentials: Option<(String, String)>,
	) -> Self {
		Self {
			transport,
			node_url: node_url.to_string(),
			credentials,
		}
	}

	/// Call a method and return its `result`.
	pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
		let mut body = json!({
			"jsonrpc": "2.0",
			"method": method,
			"id": "0",
		});
		if let Some(params) = params {
			body["params"] = params;
		}

		let mut request = BackendRequest::post(&self.node_url, RequestBody::Json(body));
		if let Some((user, password)) = &self.credentials {
			request = request.with_basic_auth(user, password);
		}

		debug!("RPC {}", method);
		let envelope: RpcEnvelope = match self.transport.request(request).await {
			Ok(response) => serde_json::from_value(response).map_err(|e| {
				BackendError::fault(format!("Invalid RPC response for {}: {}", method, e))
			})?,
			// Nodes answer RPC errors with a non-2xx status and the envelope as body.
			Err(BackendError::BackendFault {
				status, message, ..
			}) => match serde_json::from_str::<RpcEnvelope>(&message) {
				Ok(envelope) if envelope.error.is_some() => envelope,
				_ => {
					return Err(BackendError::BackendFault {
						status,
						code: None,
						message,
					});
				}
			},
			Err(e) => return Err(e),
		};

		if let Some(error) = envelope.error {
			return Err(BackendError::BackendFault {
				status: None,
				code: Some(error.code),
				message: error.message,
			});
		}

		Ok(envelope.result.unwrap_or(Value::Null))
	}

	/// Every transaction touching an address, with previous outputs resolved.
	/// Addresses the node knows nothing about yield an empty list.
	pub async fn search_raw_transactions(
		&self,
		address: &str,
	) -> Result<Vec<RpcTransaction>, BackendError> {
		let params = json!([address, 1, 0, 1_000_000, 1]);
		let result = match self.call("searchrawtransactions", Some(params)).await {
			Ok(result) => result,
			Err(e) if is_no_information(&e) => return Ok(Vec::new()),
			Err(e) => return Err(e),
		};

		if result.is_null() {
			return Ok(Vec::new());
		}

		serde_json::from_value(result).map_err(|e| {
			BackendError::fault(format!("Invalid searchrawtransactions response: {}", e))
		})
	}
}

fn is_no_information(error: &BackendError) -> bool {
	match error {
		BackendError::NotFound => true,
		BackendError::BackendFault { code, message, .. } => {
			*code == Some(RPC_NO_INFORMATION_CODE)
				|| message
					.to_lowercase()
					.contains("no information available about address")
		}
		BackendError::NoConnectivity(_) => false,
	}
}
