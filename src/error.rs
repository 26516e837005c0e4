use crate::backend::BackendError;

/// Error types for the balance/history sync engine
#[derive(Debug, thiserror::Error)]
pub enum WalletSyncError {
	#[error("Backend error: {0}")]
	Backend(#[from] BackendError),

	/// Caller mistakes (duplicate wallet id, operation not valid for the wallet type).
	/// Never retried automatically.
	#[error("Logic error: {0}")]
	Logic(String),

	#[error("Parse error: {0}")]
	Parse(String),

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),

	/// The refresh cycle was replaced by a newer one before it could commit.
	#[error("Refresh cycle superseded")]
	Superseded,

	#[error("Configuration error: {0}")]
	Config(String),
}

impl WalletSyncError {
	/// True for failures the scheduler should retry on its error interval.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			WalletSyncError::Backend(BackendError::NoConnectivity(_))
				| WalletSyncError::Backend(BackendError::BackendFault { .. })
		)
	}
}
