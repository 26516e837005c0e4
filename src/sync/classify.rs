//! Transaction classification.
//!
//! Derives the type, the balance effect, the relevant local addresses and the involved local
//! wallets of a retrieved transaction from the local address ownership. Nothing produced here is
//! persisted; it is recomputed every time a transaction is processed.

use crate::wallet::{
    Address, RawTransaction, Transaction, TransactionType, TxEndpoint, WalletBase,
};
use itertools::Itertools;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// Normalized address -> owning wallet, built once per pass from a wallet list snapshot.
///
/// When an address belongs to several wallets, the wallet with the most addresses owns it. On an
/// exact tie the wallet listed first keeps it.
pub struct AddressOwnershipMap<'a> {
    owners: HashMap<&'a Address, &'a WalletBase>,
    /// Distinct addresses in wallet order.
    ordered: Vec<&'a Address>,
}

impl<'a> AddressOwnershipMap<'a> {
    pub fn build(wallets: &'a [WalletBase]) -> Self {
        let mut owners: HashMap<&'a Address, &'a WalletBase> = HashMap::new();
        let mut ordered = Vec::new();

        for wallet in wallets {
            for address in &wallet.addresses {
                match owners.get(address) {
                    Some(current) if current.addresses.len() >= wallet.addresses.len() => {}
                    Some(_) => {
                        owners.insert(address, wallet);
                    }
                    None => {
                        owners.insert(address, wallet);
                        ordered.push(address);
                    }
                }
            }
        }

        Self { owners, ordered }
    }

    pub fn owner(&self, address: &Address) -> Option<&'a WalletBase> {
        self.owners.get(address).copied()
    }

    fn owner_of(&self, endpoint: &TxEndpoint) -> Option<&'a WalletBase> {
        endpoint.address.as_ref().and_then(|a| self.owner(a))
    }

    pub fn owns(&self, address: &Address) -> bool {
        self.owners.contains_key(address)
    }

    /// Every distinct local address, in wallet order.
    pub fn addresses(&self) -> Vec<Address> {
        self.ordered.iter().map(|a| (*a).clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Inputs minus outputs, never negative.
pub fn compute_fee(inputs: &[TxEndpoint], outputs: &[TxEndpoint]) -> Decimal {
    let inputs: Decimal = inputs.iter().map(|i| i.coins).sum();
    let outputs: Decimal = outputs.iter().map(|o| o.coins).sum();
    (inputs - outputs).max(Decimal::ZERO)
}

/// Ownership facts for one side of a transaction.
struct SideOwnership<'a> {
    owns_any: bool,
    owns_all: bool,
    first_wallet: Option<&'a str>,
    several_wallets: bool,
}

fn side_ownership<'a>(
    endpoints: &[TxEndpoint],
    owners: &AddressOwnershipMap<'a>,
    involved: &mut Vec<&'a str>,
) -> SideOwnership<'a> {
    let mut side = SideOwnership {
        owns_any: false,
        owns_all: true,
        first_wallet: None,
        several_wallets: false,
    };

    for endpoint in endpoints {
        match owners.owner_of(endpoint) {
            Some(wallet) => {
                side.owns_any = true;
                involved.push(wallet.label.as_str());
                match side.first_wallet {
                    None => side.first_wallet = Some(wallet.id.as_str()),
                    Some(first) if first != wallet.id => side.several_wallets = true,
                    Some(_) => {}
                }
            }
            None => side.owns_all = false,
        }
    }

    side
}

/// Classify a retrieved transaction.
///
/// # Arguments
/// * `raw` - The transaction as retrieved.
/// * `owners` - Local address ownership.
/// * `confirmations_needed` - Threshold for `confirmed`.
pub fn classify(
    raw: RawTransaction,
    owners: &AddressOwnershipMap<'_>,
    confirmations_needed: u64,
) -> Transaction {
    let mut involved = Vec::new();
    let inputs = side_ownership(&raw.inputs, owners, &mut involved);
    let outputs = side_ownership(&raw.outputs, owners, &mut involved);

    let same_single_wallet = !inputs.several_wallets
        && !outputs.several_wallets
        && inputs.first_wallet == outputs.first_wallet;

    let mut transaction_type = TransactionType::MixedOrUnknown;
    if inputs.owns_any && !outputs.owns_any {
        transaction_type = TransactionType::Outgoing;
    } else if !inputs.owns_any && outputs.owns_any {
        transaction_type = TransactionType::Incoming;
    } else if inputs.owns_all && outputs.owns_all {
        if same_single_wallet {
            transaction_type = TransactionType::MovedBetweenAddresses;
        } else if !inputs.several_wallets {
            transaction_type = TransactionType::MovedBetweenWallets;
        }
    } else if inputs.owns_any && outputs.owns_any && !outputs.owns_all && same_single_wallet {
        transaction_type = TransactionType::Outgoing;
    }

    let involved_local_wallets = involved.into_iter().unique().join(", ");
    let (balance, relevant_addresses) = balance_and_relevant(&raw, owners, transaction_type);

    Transaction {
        fee: compute_fee(&raw.inputs, &raw.outputs),
        confirmed: raw.confirmations >= confirmations_needed,
        id: raw.id,
        timestamp: raw.timestamp,
        confirmations: raw.confirmations,
        inputs: raw.inputs,
        outputs: raw.outputs,
        transaction_type,
        relevant_addresses,
        involved_local_wallets,
        balance,
        note: None,
    }
}

/// Signed balance effect and relevant local addresses. Outgoing balances are negative.
fn balance_and_relevant(
    raw: &RawTransaction,
    owners: &AddressOwnershipMap<'_>,
    transaction_type: TransactionType,
) -> (Decimal, Vec<Address>) {
    let mut relevant: Vec<&Address> = Vec::new();
    let mut balance = Decimal::ZERO;

    match transaction_type {
        TransactionType::Incoming => {
            for output in &raw.outputs {
                if let Some(address) = output.address.as_ref().filter(|a| owners.owns(a)) {
                    relevant.push(address);
                    balance += output.coins;
                }
            }
        }
        TransactionType::Outgoing => {
            // Every address of a wallet funding the transaction may receive change.
            let mut change_addresses: HashSet<&Address> = HashSet::new();
            for input in &raw.inputs {
                if let Some(address) = &input.address {
                    if let Some(wallet) = owners.owner(address) {
                        relevant.push(address);
                        change_addresses.extend(wallet.addresses.iter());
                    }
                }
            }

            for output in &raw.outputs {
                let is_change = output
                    .address
                    .as_ref()
                    .is_some_and(|a| change_addresses.contains(a));
                if !is_change {
                    balance -= output.coins;
                }
            }
        }
        TransactionType::MovedBetweenAddresses | TransactionType::MovedBetweenWallets => {
            let input_addresses: HashSet<Option<&Address>> =
                raw.inputs.iter().map(|i| i.address.as_ref()).collect();
            relevant.extend(raw.inputs.iter().filter_map(|i| i.address.as_ref()));

            for output in &raw.outputs {
                if !input_addresses.contains(&output.address.as_ref()) {
                    relevant.extend(output.address.as_ref());
                    balance += output.coins;
                }
            }
        }
        // No balance effect is attributed to mixed transactions.
        TransactionType::MixedOrUnknown => {
            relevant.extend(
                raw.inputs
                    .iter()
                    .chain(&raw.outputs)
                    .filter_map(|e| e.address.as_ref())
                    .filter(|a| owners.owns(a)),
            );
        }
    }

    let relevant = relevant.into_iter().unique().cloned().collect();
    (balance, relevant)
}
