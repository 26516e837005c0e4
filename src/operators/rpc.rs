//! Operators for coins synced against a full node's JSON-RPC interface.
//!
//! The node has no balance endpoint, so balances and unspent outputs are derived from the
//! verbose history `searchrawtransactions` returns for every address. Amounts come in coins.

use super::{BalanceOperator, HistoryOperator, RawHistory, WalletBalanceData};
use crate::backend::{NodeRpcClient, RpcTransaction};
use crate::config::CoinConfig;
use crate::error::WalletSyncError;
use crate::sync::fetcher::BatchFetcher;
use crate::utils::coins_from_json;
use crate::wallet::{
    Address, AddressBalance, AddressFormat, Output, PendingTransaction,
    PendingTransactionsResponse, RawTransaction, TxEndpoint, WalletBase, make_output_id,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

pub struct RpcOperator {
    client: NodeRpcClient,
    format: AddressFormat,
}

#[derive(Default)]
struct HistoryPage {
    transactions: Vec<RawTransaction>,
    truncated: bool,
}

impl RpcOperator {
    pub fn new(client: NodeRpcClient, coin: &CoinConfig) -> Self {
        Self {
            client,
            format: coin.address_format,
        }
    }

    fn pays(&self, addresses: &[String], address: &Address) -> bool {
        addresses.iter().any(|a| self.format.normalize(a) == *address)
    }

    async fn history(&self, address: &Address) -> Result<Vec<RpcTransaction>, WalletSyncError> {
        Ok(self.client.search_raw_transactions(address.as_str()).await?)
    }

    async fn address_balance(
        &self,
        address: Address,
    ) -> Result<Option<AddressBalance>, WalletSyncError> {
        let mut current = Decimal::ZERO;
        let mut predicted = Decimal::ZERO;

        for tx in self.history(&address).await? {
            let mut effect = Decimal::ZERO;
            for output in &tx.vout {
                if self.pays(&output.script_pub_key.addresses, &address) {
                    effect += coins_from_json(&output.value)?;
                }
            }
            for input in &tx.vin {
                if let Some(prev) = &input.prev_out {
                    if self.pays(&prev.addresses, &address) {
                        effect -= coins_from_json(&prev.value)?;
                    }
                }
            }

            predicted += effect;
            if tx.confirmations.unwrap_or(0) >= 1 {
                current += effect;
            }
        }

        Ok(Some(AddressBalance {
            address,
            current,
            predicted,
        }))
    }

    async fn address_outputs(&self, address: Address) -> Result<Vec<Output>, WalletSyncError> {
        let history = self.history(&address).await?;

        let spent: HashSet<String> = history
            .iter()
            .flat_map(|tx| tx.vin.iter())
            .filter_map(|input| {
                input
                    .txid
                    .as_deref()
                    .map(|txid| make_output_id(txid, input.vout.unwrap_or(0)))
            })
            .collect();

        let mut outputs = Vec::new();
        for tx in &history {
            for output in &tx.vout {
                let hash = make_output_id(&tx.txid, output.n);
                if self.pays(&output.script_pub_key.addresses, &address) && !spent.contains(&hash) {
                    outputs.push(Output {
                        address: address.clone(),
                        coins: coins_from_json(&output.value)?,
                        hash,
                        confirmations: tx.confirmations.unwrap_or(0),
                    });
                }
            }
        }

        Ok(outputs)
    }

    async fn address_history(
        &self,
        address: Address,
        cap: usize,
    ) -> Result<HistoryPage, WalletSyncError> {
        let mut transactions = self
            .history(&address)
            .await?
            .into_iter()
            .map(|tx| self.raw_transaction(tx))
            .collect::<Result<Vec<_>, _>>()?;

        // Keep the newest `cap`; unknown times count as newest.
        transactions.sort_by_key(|tx| {
            std::cmp::Reverse(if tx.timestamp < 0 { i64::MAX } else { tx.timestamp })
        });
        let truncated = transactions.len() > cap;
        transactions.truncate(cap);

        Ok(HistoryPage {
            transactions,
            truncated,
        })
    }

    fn raw_transaction(&self, tx: RpcTransaction) -> Result<RawTransaction, WalletSyncError> {
        let mut inputs = Vec::with_capacity(tx.vin.len());
        for input in &tx.vin {
            if input.coinbase.is_some() {
                continue;
            }
            let prev = input.prev_out.as_ref();
            inputs.push(TxEndpoint {
                hash: input
                    .txid
                    .as_deref()
                    .map(|txid| make_output_id(txid, input.vout.unwrap_or(0)))
                    .unwrap_or_default(),
                address: prev
                    .and_then(|p| p.addresses.first())
                    .map(|a| self.format.normalize(a)),
                coins: match prev {
                    Some(p) => coins_from_json(&p.value)?,
                    None => Decimal::ZERO,
                },
            });
        }

        let mut outputs = Vec::with_capacity(tx.vout.len());
        for output in &tx.vout {
            outputs.push(TxEndpoint {
                hash: make_output_id(&tx.txid, output.n),
                address: output
                    .script_pub_key
                    .addresses
                    .first()
                    .map(|a| self.format.normalize(a)),
                coins: coins_from_json(&output.value)?,
            });
        }

        Ok(RawTransaction {
            timestamp: tx.time.filter(|t| *t > 0).unwrap_or(-1),
            confirmations: tx.confirmations.unwrap_or(0),
            id: tx.txid,
            inputs,
            outputs,
        })
    }

    async fn unconfirmed_transactions(
        &self,
        address: Address,
    ) -> Result<Vec<RawTransaction>, WalletSyncError> {
        self.history(&address)
            .await?
            .into_iter()
            .filter(|tx| tx.confirmations.unwrap_or(0) == 0)
            .map(|tx| self.raw_transaction(tx))
            .collect()
    }
}

#[async_trait]
impl BalanceOperator for RpcOperator {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn wallet_balance(
        &self,
        wallet: &WalletBase,
        fetcher: &BatchFetcher,
    ) -> Result<WalletBalanceData, WalletSyncError> {
        fetcher
            .fetch_all(
                "rpc balances",
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
                "rpc outputs",
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
impl HistoryOperator for RpcOperator {
    async fn raw_transactions(
        &self,
        addresses: &[Address],
        per_address_cap: usize,
        fetcher: &BatchFetcher,
    ) -> Result<RawHistory, WalletSyncError> {
        let mut seen = HashSet::new();
        fetcher
            .fetch_all(
                "rpc history",
                addresses,
                RawHistory::default(),
                |address| self.address_history(address, per_address_cap),
                |history: &mut RawHistory, _, page: HistoryPage| {
                    history.addresses_with_more_transactions |= page.truncated;
                    for tx in page.transactions {
                        if seen.insert(tx.id.clone()) {
                            history.transactions.push(tx);
                        }
                    }
                },
            )
            .await
    }

    async fn pending_transactions(
        &self,
        local_addresses: &[Address],
        fetcher: &BatchFetcher,
    ) -> Result<PendingTransactionsResponse, WalletSyncError> {
        let mut seen = HashSet::new();
        let pending = fetcher
            .fetch_all(
                "rpc pending",
                local_addresses,
                Vec::new(),
                |address| self.unconfirmed_transactions(address),
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

        Ok(PendingTransactionsResponse {
            user: pending.clone(),
            all: pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendFamily;
    use crate::test_support::{FakeTransport, addr, wallet};
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::Arc;

    fn operator(transport: Arc<FakeTransport>) -> RpcOperator {
        let coin = CoinConfig {
            name: "BTC".to_string(),
            family: BackendFamily::Rpc,
            backend_url: "http://node:8332".to_string(),
            rpc_credentials: None,
            decimals: 8,
            confirmations_needed: 3,
            is_local: true,
            address_format: AddressFormat::Base58,
        };
        RpcOperator::new(NodeRpcClient::new(transport, &coin.backend_url, None), &coin)
    }

    fn history() -> serde_json::Value {
        json!({ "result": [
            {
                "txid": "t1",
                "time": 100,
                "confirmations": 10,
                "vin": [{ "coinbase": "03abcd" }],
                "vout": [{ "n": 0, "value": 2.0, "scriptPubKey": { "addresses": ["A"] } }]
            },
            {
                "txid": "t2",
                "confirmations": 0,
                "vin": [{ "txid": "t1", "vout": 0, "prevOut": { "addresses": ["A"], "value": 2.0 } }],
                "vout": [
                    { "n": 0, "value": 0.5, "scriptPubKey": { "addresses": ["X"] } },
                    { "n": 1, "value": 1.4999, "scriptPubKey": { "addresses": ["A"] } }
                ]
            }
        ], "error": null })
    }

    #[tokio::test]
    async fn derives_balance_from_history() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("node:8332", Ok(history()));

        let data = operator(transport)
            .wallet_balance(&wallet("w", "W", &["A"]), &BatchFetcher::new(1))
            .await
            .unwrap();

        let balance = &data[&addr("A")];
        assert_eq!(balance.current, Decimal::from(2));
        assert_eq!(balance.predicted, Decimal::from_str("1.4999").unwrap());
        assert!(balance.has_pending());
    }

    #[tokio::test]
    async fn unspent_outputs_exclude_spent_ones() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("node:8332", Ok(history()));

        let outputs = operator(transport)
            .outputs(&[addr("A")], &BatchFetcher::new(1))
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].hash, "t2/1");
        assert_eq!(outputs[0].confirmations, 0);
    }

    #[tokio::test]
    async fn history_cap_keeps_newest() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("node:8332", Ok(history()));

        let history = operator(transport)
            .raw_transactions(&[addr("A")], 1, &BatchFetcher::new(1))
            .await
            .unwrap();
        assert!(history.addresses_with_more_transactions);
        assert_eq!(history.transactions.len(), 1);
        assert_eq!(history.transactions[0].id, "t2");
        assert_eq!(history.transactions[0].timestamp, -1);
    }

    #[tokio::test]
    async fn pending_lists_unconfirmed_only() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("node:8332", Ok(history()));

        let pending = operator(transport)
            .pending_transactions(&[addr("A")], &BatchFetcher::new(1))
            .await
            .unwrap();
        assert_eq!(pending.user.len(), 1);
        assert_eq!(pending.user[0].id, "t2");
        assert_eq!(pending.user[0].coins, Decimal::from_str("1.9999").unwrap());
    }
}
