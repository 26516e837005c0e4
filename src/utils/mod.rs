//!
//! Utility module for the sync engine.
//!
//! Re-exports amount conversion and formatting helpers used throughout the codebase.
/// Amount conversion and formatting
pub mod index;

pub use index::{
	base_units_from_json, coins_from_json, format_token_amount, from_base_units, from_coins,
};
