use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::error::WalletSyncError;

/// Converts an integer amount expressed in indivisible base units (satoshis,
/// droplets, wei) into whole coins.
pub fn from_base_units(raw: &str, decimals: u32) -> Result<Decimal, WalletSyncError> {
	let trimmed = raw.trim();
	if trimmed.is_empty() {
		return Ok(Decimal::ZERO);
	}

	let units = i128::from_str(trimmed).map_err(|e| {
		WalletSyncError::Parse(format!("Invalid base unit amount '{}': {}", raw, e))
	})?;

	Decimal::try_from_i128_with_scale(units, decimals)
		.map(|d| d.normalize())
		.map_err(|e| {
			WalletSyncError::Parse(format!(
				"Amount '{}' does not fit with {} decimals: {}",
				raw, decimals, e
			))
		})
}

/// Parses an amount already expressed in whole coins ("1.5", "0.000001").
pub fn from_coins(raw: &str) -> Result<Decimal, WalletSyncError> {
	let trimmed = raw.trim();
	if trimmed.is_empty() {
		return Ok(Decimal::ZERO);
	}

	Decimal::from_str(trimmed)
		.or_else(|_| Decimal::from_scientific(trimmed))
		.map(|d| d.normalize())
		.map_err(|e| WalletSyncError::Parse(format!("Invalid coin amount '{}': {}", raw, e)))
}

/// Reads a JSON number or numeric string holding whole coins.
pub fn coins_from_json(value: &Value) -> Result<Decimal, WalletSyncError> {
	match value {
		Value::Null => Ok(Decimal::ZERO),
		Value::Number(n) => from_coins(&n.to_string()),
		Value::String(s) => from_coins(s),
		other => Err(WalletSyncError::Parse(format!(
			"Expected a numeric amount, got {}",
			other
		))),
	}
}

/// Reads a JSON number or numeric string holding base units.
pub fn base_units_from_json(value: &Value, decimals: u32) -> Result<Decimal, WalletSyncError> {
	match value {
		Value::Null => Ok(Decimal::ZERO),
		Value::Number(n) => from_base_units(&n.to_string(), decimals),
		Value::String(s) => from_base_units(s, decimals),
		other => Err(WalletSyncError::Parse(format!(
			"Expected a base unit amount, got {}",
			other
		))),
	}
}

pub fn format_token_amount(amount: Decimal, decimals: u32) -> String {
	format!("{:.*}", decimals as usize, amount)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn converts_satoshis_to_coins() {
		assert_eq!(
			from_base_units("150000000", 8).unwrap(),
			Decimal::from_str("1.5").unwrap()
		);
		assert_eq!(
			from_base_units("-25000000", 8).unwrap(),
			Decimal::from_str("-0.25").unwrap()
		);
		assert_eq!(from_base_units("", 8).unwrap(), Decimal::ZERO);
	}

	#[test]
	fn rejects_fractional_base_units() {
		assert!(from_base_units("1.5", 8).is_err());
	}

	#[test]
	fn reads_json_amounts() {
		assert_eq!(
			coins_from_json(&json!(0.5)).unwrap(),
			Decimal::from_str("0.5").unwrap()
		);
		assert_eq!(
			coins_from_json(&json!("2.000000")).unwrap(),
			Decimal::from(2)
		);
		assert_eq!(
			base_units_from_json(&json!(1000000), 6).unwrap(),
			Decimal::ONE
		);
		assert!(coins_from_json(&json!([1])).is_err());
	}

	#[test]
	fn formats_with_fixed_decimals() {
		assert_eq!(
			format_token_amount(Decimal::from_str("1.5").unwrap(), 8),
			"1.50000000"
		);
	}
}
