//!
//! HTTP transport shared by every backend family.
//!
//! The [`Transport`] trait is the black-box request executor the clients are written against.
//! [`HttpTransport`] implements it with reqwest and normalizes every failure into
//! [`BackendError`]. Connection failures are retried with an exponential backoff bounded by a
//! short total time; everything else is returned to the caller at once.

use super::types::{BackendError, BackendRequest, HttpMethod, RequestBody};
use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Executes one backend request and returns the decoded JSON body.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn request(&self, request: BackendRequest) -> Result<Value, BackendError>;
}

/// reqwest based transport.
#[derive(Clone)]
pub struct HttpTransport {
	/// The underlying HTTP client.
	http_client: Client,
	/// Upper bound for retrying requests that could not reach the backend.
	retry_max_elapsed: Duration,
}

impl HttpTransport {
	/// Create a new transport.
	///
	/// # Arguments
	/// * `timeout` - Per-request timeout.
	/// * `retry_max_elapsed` - Total time spent retrying unreachable backends. Zero disables retries.
	pub fn new(timeout: Duration, retry_max_elapsed: Duration) -> Result<Self, BackendError> {
		let http_client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| BackendError::fault(format!("Failed to create HTTP client: {}", e)))?;

		Ok(Self {
			http_client,
			retry_max_elapsed,
		})
	}

	async fn send_once(&self, request: &BackendRequest) -> Result<Value, BackendError> {
		let mut builder = match request.method {
			HttpMethod::Get => self.http_client.get(&request.url),
			HttpMethod::Post => self.http_client.post(&request.url),
		};

		if !request.query.is_empty() {
			builder = builder.query(&request.query);
		}
		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		if let Some((user, password)) = &request.basic_auth {
			builder = builder.basic_auth(user, Some(password));
		}
		builder = match &request.body {
			RequestBody::Empty => builder,
			RequestBody::Json(body) => builder.json(body),
			RequestBody::Form(fields) => builder.form(fields),
		};

		let response = builder.send().await.map_err(map_reqwest_error)?;
		let status = response.status();
		let text = response.text().await.map_err(map_reqwest_error)?;

		decode_response(&request.url, status, text)
	}
}

/// Maps a status and body onto the backend error taxonomy.
fn decode_response(url: &str, status: StatusCode, text: String) -> Result<Value, BackendError> {
	if status == StatusCode::NOT_FOUND {
		debug!("{} returned 404", url);
		return Err(BackendError::NotFound);
	}

	if !status.is_success() {
		return Err(BackendError::BackendFault {
			status: Some(status.as_u16()),
			code: None,
			message: text,
		});
	}

	if text.trim().is_empty() {
		return Ok(Value::Null);
	}

	serde_json::from_str(&text)
		.map_err(|e| BackendError::fault(format!("Invalid JSON from {}: {}", url, e)))
}

#[async_trait]
impl Transport for HttpTransport {
	async fn request(&self, request: BackendRequest) -> Result<Value, BackendError> {
		if self.retry_max_elapsed.is_zero() {
			return self.send_once(&request).await;
		}

		let policy = ExponentialBackoff {
			initial_interval: Duration::from_millis(250),
			max_elapsed_time: Some(self.retry_max_elapsed),
			..ExponentialBackoff::default()
		};

		retry(policy, || async {
			self.send_once(&request).await.map_err(|e| match e {
				BackendError::NoConnectivity(ref reason) => {
					warn!("Backend unreachable at {}: {}. Retrying...", request.url, reason);
					backoff::Error::transient(e)
				}
				other => backoff::Error::permanent(other),
			})
		})
		.await
	}
}

fn map_reqwest_error(e: reqwest::Error) -> BackendError {
	if e.is_connect() || e.is_timeout() || e.is_request() {
		BackendError::NoConnectivity(e.to_string())
	} else {
		BackendError::fault(e.to_string())
	}
}
