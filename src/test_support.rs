//! Scripted transport and fixtures shared by the unit tests.

use crate::backend::{BackendError, BackendRequest, Transport};
use crate::wallet::{Address, WalletBase, WalletType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

struct Route {
	fragment: String,
	responses: VecDeque<Result<Value, BackendError>>,
}

/// In-memory [`Transport`]. Requests are answered by the first route whose fragment appears in
/// the URL or in the JSON body. A route scripted with several responses hands them out in
/// order and keeps repeating the last one.
#[derive(Default)]
pub struct FakeTransport {
	routes: Mutex<Vec<Route>>,
	calls: Mutex<Vec<BackendRequest>>,
	delay: Mutex<Option<Duration>>,
}

impl FakeTransport {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn route(&self, fragment: &str, response: Result<Value, BackendError>) {
		self.route_sequence(fragment, vec![response]);
	}

	pub fn route_sequence(&self, fragment: &str, responses: Vec<Result<Value, BackendError>>) {
		let mut routes = self.routes.lock().unwrap();
		if let Some(existing) = routes.iter_mut().find(|r| r.fragment == fragment) {
			existing.responses = responses.into();
			return;
		}
		routes.push(Route {
			fragment: fragment.to_string(),
			responses: responses.into(),
		});
	}

	/// Delays every response, to keep cycles in flight.
	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock().unwrap() = Some(delay);
	}

	pub fn calls(&self) -> Vec<BackendRequest> {
		self.calls.lock().unwrap().clone()
	}

	pub fn calls_matching(&self, fragment: &str) -> usize {
		self.calls
			.lock()
			.unwrap()
			.iter()
			.filter(|c| c.url.contains(fragment))
			.count()
	}

	fn answer(&self, request: &BackendRequest) -> Result<Value, BackendError> {
		let body = match &request.body {
			crate::backend::RequestBody::Json(v) => v.to_string(),
			_ => String::new(),
		};

		let mut routes = self.routes.lock().unwrap();
		let route = routes
			.iter_mut()
			.find(|r| request.url.contains(&r.fragment) || body.contains(&r.fragment));

		match route {
			Some(route) if route.responses.len() > 1 => route.responses.pop_front().unwrap(),
			Some(route) => route.responses.front().cloned().unwrap(),
			None => Err(BackendError::fault(format!("no route for {}", request.url))),
		}
	}
}

#[async_trait]
impl Transport for FakeTransport {
	async fn request(&self, request: BackendRequest) -> Result<Value, BackendError> {
		self.calls.lock().unwrap().push(request.clone());
		let delay = *self.delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		self.answer(&request)
	}
}

/// A software wallet with already-normalized addresses.
pub fn wallet(id: &str, label: &str, addresses: &[&str]) -> WalletBase {
	WalletBase {
		id: id.to_string(),
		label: label.to_string(),
		addresses: addresses.iter().map(|a| Address::new_unchecked(*a)).collect(),
		is_hardware: false,
		wallet_type: WalletType::Deterministic,
		coin: "BTC".to_string(),
	}
}

pub fn addr(value: &str) -> Address {
	Address::new_unchecked(value)
}
