//! Backend integration module
//!
//! Clients for the three backend families the engine can sync against, all written over the
//! same black-box [`Transport`]. Every failure is normalized into [`BackendError`].

/// Blockbook-style UTXO indexer client
mod indexer;
/// Ledger node client with CSRF handling
mod ledger;
/// Node JSON-RPC client
mod rpc;
/// Transport trait and reqwest implementation
mod transport;
/// Error taxonomy, request shapes and wire types
mod types;

pub use indexer::{AddressDetails, IndexerClient};
pub use ledger::{LEDGER_DECIMALS, LedgerNodeClient, LedgerRequestOptions};
pub use rpc::{NodeRpcClient, RPC_NO_INFORMATION_CODE};
pub use transport::{HttpTransport, Transport};
pub use types::*;
