//! Progress tracking for batch fetches.
//!
//! `FetchProgress` records which addresses a batch has queried, how many answered "not found",
//! and validates at the end that every address of the batch was visited exactly once.

use crate::error::WalletSyncError;
use crate::wallet::Address;
use std::collections::HashSet;
use tracing::{debug, info};

/// Log every this many queried addresses.
const LOG_EVERY: usize = 50;

#[derive(Debug, Clone)]
pub struct FetchProgress {
    /// What the batch is fetching, for logs.
    label: String,
    /// Number of distinct addresses in the batch
    total: usize,
    /// Addresses already queried
    queried: HashSet<Address>,
    /// Addresses the backend reported as unknown
    not_found: usize,
    /// Last count at which we logged progress
    last_logged: usize,
}

impl FetchProgress {
    pub fn new(label: &str, total: usize) -> Self {
        Self {
            label: label.to_string(),
            total,
            queried: HashSet::with_capacity(total),
            not_found: 0,
            last_logged: 0,
        }
    }

    /// Record that an address was queried. Returns false if it had been queried already.
    pub fn record_queried(&mut self, address: &Address) -> bool {
        self.queried.insert(address.clone())
    }

    pub fn record_not_found(&mut self, address: &Address) {
        debug!("{}: no data for {}", self.label, address);
        self.not_found += 1;
    }

    /// Log progress at regular intervals or when forced
    pub fn log_progress(&mut self, force: bool) {
        let done = self.queried.len();
        if force || done.saturating_sub(self.last_logged) >= LOG_EVERY {
            info!(
                "{}: {}/{} addresses queried ({} without data)",
                self.label, done, self.total, self.not_found
            );
            self.last_logged = done;
        }
    }

    pub fn get_stats(&self) -> FetchStats {
        FetchStats {
            total: self.total,
            queried: self.queried.len(),
            not_found: self.not_found,
        }
    }

    /// Fails if any address of `expected` was never queried.
    pub fn validate_completion(&self, expected: &[Address]) -> Result<(), WalletSyncError> {
        let missing: Vec<&Address> = expected
            .iter()
            .filter(|a| !self.queried.contains(*a))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        Err(WalletSyncError::Logic(format!(
            "{}: {} addresses were never queried (first: {})",
            self.label,
            missing.len(),
            missing[0]
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchStats {
    pub total: usize,
    pub queried: usize,
    pub not_found: usize,
}

impl FetchStats {
    pub fn summary(&self) -> String {
        format!(
            "{}/{} addresses queried, {} without data",
            self.queried, self.total, self.not_found
        )
    }
}
