//! Wallet data model, address normalization and the wallet list owner.

pub mod address;
pub mod migration;
pub mod registry;
pub mod types;

pub use address::{AddressFormat, make_output_id, parse_output_id};
pub use migration::{WALLET_RECORD_VERSION, WalletRecord, migrate_record};
pub use registry::{WalletList, WalletRegistry};
pub use types::*;
