//! Address batch fetcher.
//!
//! Runs one query per distinct address with bounded concurrency and folds every answer into a
//! caller-owned accumulator. A `NotFound` answer counts as the default (empty) value for that
//! address; any other failure fails the whole batch and no partial accumulator is returned.

use super::progress_tracker::FetchProgress;
use crate::backend::BackendError;
use crate::error::WalletSyncError;
use crate::wallet::Address;
use futures_util::{StreamExt, stream};
use itertools::Itertools;
use std::future::Future;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct BatchFetcher {
    concurrency: usize,
}

impl BatchFetcher {
    /// `concurrency` is the maximum number of queries in flight. 1 means strictly sequential.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Query every distinct address once and merge the answers.
    ///
    /// # Arguments
    /// * `label` - What is being fetched, for logs.
    /// * `addresses` - Normalized addresses. Repeated entries are queried once.
    /// * `init` - The empty accumulator, returned as is when there is nothing to query.
    /// * `query` - Per-address query.
    /// * `merge` - Folds one answer into the accumulator. Called in completion order.
    pub async fn fetch_all<T, Acc, Q, Fut, M>(
        &self,
        label: &str,
        addresses: &[Address],
        init: Acc,
        query: Q,
        mut merge: M,
    ) -> Result<Acc, WalletSyncError>
    where
        T: Default,
        Q: Fn(Address) -> Fut,
        Fut: Future<Output = Result<T, WalletSyncError>>,
        M: FnMut(&mut Acc, &Address, T),
    {
        let unique: Vec<Address> = addresses.iter().unique().cloned().collect();
        if unique.is_empty() {
            return Ok(init);
        }

        let mut progress = FetchProgress::new(label, unique.len());
        let mut accumulator = init;

        let mut answers = stream::iter(unique.iter().cloned())
            .map(|address| {
                let pending = query(address.clone());
                async move { (address, pending.await) }
            })
            .buffer_unordered(self.concurrency);

        while let Some((address, answer)) = answers.next().await {
            progress.record_queried(&address);

            let data = match answer {
                Ok(data) => data,
                Err(WalletSyncError::Backend(BackendError::NotFound)) => {
                    progress.record_not_found(&address);
                    T::default()
                }
                Err(e) => {
                    warn!("{}: query for {} failed, aborting batch: {}", label, address, e);
                    return Err(e);
                }
            };

            merge(&mut accumulator, &address, data);
            progress.log_progress(false);
        }

        progress.validate_completion(&unique)?;
        debug!("{}: {}", label, progress.get_stats().summary());
        Ok(accumulator)
    }
}
