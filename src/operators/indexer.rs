//! Operators for coins synced against a Blockbook-style indexer.

use super::{BalanceOperator, HistoryOperator, RawHistory, WalletBalanceData};
use crate::backend::{AddressDetails, IndexerClient, IndexerTransaction};
use crate::config::CoinConfig;
use crate::error::WalletSyncError;
use crate::sync::fetcher::BatchFetcher;
use crate::utils::from_base_units;
use crate::wallet::{
    Address, AddressBalance, AddressFormat, Output, PendingTransaction,
    PendingTransactionsResponse, RawTransaction, TxEndpoint, WalletBase, make_output_id,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub struct IndexerOperator {
    client: IndexerClient,
    decimals: u32,
    format: AddressFormat,
    confirmations_needed: u64,
}

/// One address page of history.
#[derive(Default)]
struct HistoryPage {
    transactions: Vec<RawTransaction>,
    truncated: bool,
}

#[derive(Default)]
struct HistoryAccumulator {
    seen: HashSet<String>,
    history: RawHistory,
}

impl IndexerOperator {
    pub fn new(client: IndexerClient, coin: &CoinConfig) -> Self {
        Self {
            client,
            decimals: coin.decimals,
            format: coin.address_format,
            confirmations_needed: coin.confirmations_needed,
        }
    }

    fn amount(&self, raw: Option<&str>) -> Result<rust_decimal::Decimal, WalletSyncError> {
        from_base_units(raw.unwrap_or("0"), self.decimals)
    }

    async fn address_balance(
        &self,
        address: Address,
    ) -> Result<Option<AddressBalance>, WalletSyncError> {
        let data = self
            .client
            .address(address.as_str(), AddressDetails::Basic, None, None)
            .await?;

        let current = self.amount(data.balance.as_deref())?;
        let unconfirmed = self.amount(data.unconfirmed_balance.as_deref())?;

        Ok(Some(AddressBalance {
            address,
            current,
            predicted: current + unconfirmed,
        }))
    }

    async fn address_outputs(&self, address: Address) -> Result<Vec<Output>, WalletSyncError> {
        self.client
            .utxo(address.as_str())
            .await?
            .into_iter()
            .map(|utxo| -> Result<Output, WalletSyncError> {
                Ok(Output {
                    address: address.clone(),
                    coins: from_base_units(&utxo.value, self.decimals)?,
                    hash: make_output_id(&utxo.txid, utxo.vout),
                    confirmations: utxo.confirmations,
                })
            })
            .collect()
    }

    async fn address_history(
        &self,
        address: Address,
        cap: usize,
    ) -> Result<HistoryPage, WalletSyncError> {
        let data = self
            .client
            .address(address.as_str(), AddressDetails::TxsLight, Some(cap), None)
            .await?;

        let transactions = data
            .transactions
            .unwrap_or_default()
            .into_iter()
            .map(|tx| self.raw_transaction(tx))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HistoryPage {
            transactions,
            truncated: data.total_pages.unwrap_or(1) > 1,
        })
    }

    async fn recent_transactions(
        &self,
        address: Address,
        from_height: u64,
    ) -> Result<Vec<RawTransaction>, WalletSyncError> {
        let data = self
            .client
            .address(
                address.as_str(),
                AddressDetails::TxsLight,
                None,
                Some(from_height),
            )
            .await?;

        data.transactions
            .unwrap_or_default()
            .into_iter()
            .map(|tx| self.raw_transaction(tx))
            .collect()
    }

    fn raw_transaction(&self, tx: IndexerTransaction) -> Result<RawTransaction, WalletSyncError> {
        let inputs = tx
            .vin
            .iter()
            .map(|input| -> Result<TxEndpoint, WalletSyncError> {
                Ok(TxEndpoint {
                    hash: input
                        .txid
                        .as_deref()
                        .map(|txid| make_output_id(txid, input.vout.unwrap_or(0)))
                        .unwrap_or_default(),
                    address: self.endpoint_address(input.is_address, input.addresses.as_deref()),
                    coins: self.amount(input.value.as_deref())?,
                })
            })
            .collect::<Result<Vec<_>, WalletSyncError>>()?;

        // Zero-value outputs carry data, not coins.
        let outputs = tx
            .vout
            .iter()
            .filter(|output| output.value.as_deref().is_some_and(|v| v != "0"))
            .map(|output| -> Result<TxEndpoint, WalletSyncError> {
                Ok(TxEndpoint {
                    hash: make_output_id(&tx.txid, output.n),
                    address: self.endpoint_address(output.is_address, output.addresses.as_deref()),
                    coins: self.amount(output.value.as_deref())?,
                })
            })
            .collect::<Result<Vec<_>, WalletSyncError>>()?;

        Ok(RawTransaction {
            timestamp: tx.block_time.filter(|t| *t > 0).unwrap_or(-1),
            confirmations: tx.confirmations.unwrap_or(0),
            id: tx.txid,
            inputs,
            outputs,
        })
    }

    fn endpoint_address(&self, is_address: bool, addresses: Option<&[String]>) -> Option<Address> {
        if !is_address {
            return None;
        }
        addresses
            .and_then(|a| a.first())
            .map(|a| self.format.normalize(a))
    }
}

#[async_trait]
impl BalanceOperator for IndexerOperator {
    fn name(&self) -> &'static str {
        "indexer"
    }

    async fn wallet_balance(
        &self,
        wallet: &WalletBase,
        fetcher: &BatchFetcher,
    ) -> Result<WalletBalanceData, WalletSyncError> {
        fetcher
            .fetch_all(
                "indexer balances",
                &wallet.addresses,
                HashMap::new(),
                |address| self.address_balance(address),
                |data: &mut WalletBalanceData, address, balance| {
                    let balance = balance.unwrap_or_else(|| AddressBalance::zero(address.clone()));
                    data.insert(address.clone(), balance);
                },
            )
            .await
    }

    async fn outputs(
        &self,
        addresses: &[Address],
        fetcher: &BatchFetcher,
    ) -> Result<Vec<Output>, WalletSyncError> {
        let mut outputs = fetcher
            .fetch_all(
                "indexer outputs",
                addresses,
                Vec::new(),
                |address| self.address_outputs(address),
                |all: &mut Vec<Output>, _, found| all.extend(found),
            )
            .await?;

        outputs.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(outputs)
    }
}

#[async_trait]
impl HistoryOperator for IndexerOperator {
    async fn raw_transactions(
        &self,
        addresses: &[Address],
        per_address_cap: usize,
        fetcher: &BatchFetcher,
    ) -> Result<RawHistory, WalletSyncError> {
        let accumulator = fetcher
            .fetch_all(
                "indexer history",
                addresses,
                HistoryAccumulator::default(),
                |address| self.address_history(address, per_address_cap),
                |acc: &mut HistoryAccumulator, _, page: HistoryPage| {
                    acc.history.addresses_with_more_transactions |= page.truncated;
                    for tx in page.transactions {
                        if acc.seen.insert(tx.id.clone()) {
                            acc.history.transactions.push(tx);
                        }
                    }
                },
            )
            .await?;

        Ok(accumulator.history)
    }

    async fn pending_transactions(
        &self,
        local_addresses: &[Address],
        fetcher: &BatchFetcher,
    ) -> Result<PendingTransactionsResponse, WalletSyncError> {
        if local_addresses.is_empty() {
            return Ok(PendingTransactionsResponse::default());
        }

        let best_height = self.client.status().await?.blockbook.best_height;
        let from_height =
            best_height.saturating_sub(self.confirmations_needed.saturating_sub(1));
        debug!("Looking for pending transactions from height {}", from_height);

        let mut seen = HashSet::new();
        let pending = fetcher
            .fetch_all(
                "indexer pending",
                local_addresses,
                Vec::new(),
                |address| self.recent_transactions(address, from_height),
                |all: &mut Vec<PendingTransaction>, _, found: Vec<RawTransaction>| {
                    for tx in found {
                        if seen.insert(tx.id.clone()) {
                            all.push(PendingTransaction {
                                coins: tx.outputs.iter().map(|o| o.coins).sum(),
                                timestamp: (tx.timestamp >= 0).then_some(tx.timestamp),
                                confirmations: tx.confirmations,
                                id: tx.id,
                            });
                        }
                    }
                },
            )
            .await?;

        // The indexer only sees transactions of the queried addresses.
        Ok(PendingTransactionsResponse {
            user: pending.clone(),
            all: pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::config::BackendFamily;
    use crate::sync::classify::{AddressOwnershipMap, classify};
    use crate::test_support::{FakeTransport, addr, wallet};
    use crate::wallet::TransactionType;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::Arc;

    fn coin() -> CoinConfig {
        CoinConfig {
            name: "BTC".to_string(),
            family: BackendFamily::Indexer,
            backend_url: "https://idx.example".to_string(),
            rpc_credentials: None,
            decimals: 8,
            confirmations_needed: 3,
            is_local: false,
            address_format: AddressFormat::Base58,
        }
    }

    fn operator(transport: Arc<FakeTransport>) -> IndexerOperator {
        IndexerOperator::new(IndexerClient::new(transport, "https://idx.example"), &coin())
    }

    #[tokio::test]
    async fn converts_base_units_once() {
        let transport = Arc::new(FakeTransport::new());
        transport.route(
            "address/A",
            Ok(json!({ "balance": "100000000", "unconfirmedBalance": "0" })),
        );
        transport.route(
            "address/B",
            Ok(json!({ "balance": "50000000", "unconfirmedBalance": "25000000" })),
        );

        let data = operator(transport)
            .wallet_balance(&wallet("w", "W", &["A", "B"]), &BatchFetcher::new(2))
            .await
            .unwrap();

        assert_eq!(data[&addr("A")].current, Decimal::ONE);
        assert!(!data[&addr("A")].has_pending());
        assert_eq!(data[&addr("B")].current, Decimal::from_str("0.5").unwrap());
        assert_eq!(data[&addr("B")].predicted, Decimal::from_str("0.75").unwrap());
    }

    #[tokio::test]
    async fn unknown_address_has_zero_balance() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("address/A", Err(BackendError::NotFound));

        let data = operator(transport)
            .wallet_balance(&wallet("w", "W", &["A"]), &BatchFetcher::new(1))
            .await
            .unwrap();
        assert_eq!(data[&addr("A")], AddressBalance::zero(addr("A")));
    }

    #[tokio::test]
    async fn history_is_deduplicated_and_flags_truncation() {
        let tx = json!({
            "txid": "t1",
            "blockTime": 1600000000,
            "confirmations": 4,
            "vin": [{ "txid": "t0", "vout": 1, "addresses": ["A"], "isAddress": true, "value": "200000000" }],
            "vout": [
                { "n": 0, "addresses": ["B"], "isAddress": true, "value": "150000000" },
                { "n": 1, "addresses": ["OP_RETURN"], "isAddress": false, "value": "0" }
            ]
        });
        let transport = Arc::new(FakeTransport::new());
        transport.route("address/A", Ok(json!({ "transactions": [tx.clone()], "totalPages": 3 })));
        transport.route("address/B", Ok(json!({ "transactions": [tx], "totalPages": 1 })));

        let history = operator(transport.clone())
            .raw_transactions(&[addr("A"), addr("B")], 20, &BatchFetcher::new(2))
            .await
            .unwrap();

        assert!(history.addresses_with_more_transactions);
        assert_eq!(history.transactions.len(), 1);
        let tx = &history.transactions[0];
        assert_eq!(tx.inputs[0].hash, "t0/1");
        assert_eq!(tx.inputs[0].coins, Decimal::from(2));
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].hash, "t1/0");
        assert_eq!(tx.timestamp, 1600000000);
        assert!(
            transport.calls()[0]
                .query
                .contains(&("pageSize".to_string(), "20".to_string()))
        );
    }

    #[tokio::test]
    async fn self_transfer_with_data_output_moves_between_addresses() {
        let tx = json!({
            "txid": "t2",
            "blockTime": 1600000000,
            "confirmations": 4,
            "vin": [{ "txid": "t1", "vout": 0, "addresses": ["A"], "isAddress": true, "value": "100000000" }],
            "vout": [
                { "n": 0, "addresses": ["B"], "isAddress": true, "value": "99990000" },
                { "n": 1, "addresses": ["OP_RETURN (memo)"], "isAddress": false, "value": "0" }
            ]
        });
        let transport = Arc::new(FakeTransport::new());
        transport.route("address/A", Ok(json!({ "transactions": [tx] })));

        let history = operator(transport)
            .raw_transactions(&[addr("A")], 20, &BatchFetcher::new(1))
            .await
            .unwrap();

        let wallets = vec![wallet("w", "W", &["A", "B"])];
        let owners = AddressOwnershipMap::build(&wallets);
        let tx = classify(history.transactions[0].clone(), &owners, 3);
        assert_eq!(tx.transaction_type, TransactionType::MovedBetweenAddresses);
        assert_eq!(tx.balance, Decimal::from_str("0.9999").unwrap());
        assert_eq!(tx.fee, Decimal::from_str("0.0001").unwrap());
    }

    #[tokio::test]
    async fn reads_utxos() {
        let transport = Arc::new(FakeTransport::new());
        transport.route(
            "utxo/A",
            Ok(json!([{ "txid": "t1", "vout": 2, "value": "1000", "confirmations": 7 }])),
        );

        let outputs = operator(transport)
            .outputs(&[addr("A")], &BatchFetcher::new(1))
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].hash, "t1/2");
        assert_eq!(outputs[0].coins, Decimal::from_str("0.00001").unwrap());
    }

    #[tokio::test]
    async fn pending_transactions_start_near_the_tip() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("address/A", Ok(json!({ "transactions": [] })));
        transport.route("idx.example/api/", Ok(json!({ "blockbook": { "bestHeight": 800 } })));

        let pending = operator(transport.clone())
            .pending_transactions(&[addr("A")], &BatchFetcher::new(1))
            .await
            .unwrap();
        assert!(pending.user.is_empty());

        let call = transport
            .calls()
            .into_iter()
            .find(|c| c.url.contains("address/A"))
            .unwrap();
        assert!(call.query.contains(&("from".to_string(), "798".to_string())));
    }
}
