use crate::error::WalletSyncError;

use super::types::Address;

/// Coin-specific address format function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFormat {
	/// Case-sensitive base58 addresses. Only surrounding whitespace is removed.
	#[default]
	Base58,
	/// Base58 plus segwit addresses. Valid bech32 strings are case-folded to lowercase,
	/// anything else is left as base58.
	Bech32,
	/// 20-byte account addresses in hex, compared case-insensitively.
	Hex,
}

impl AddressFormat {
	pub fn parse(value: &str) -> Result<Self, WalletSyncError> {
		match value.trim().to_lowercase().as_str() {
			"base58" => Ok(AddressFormat::Base58),
			"bech32" => Ok(AddressFormat::Bech32),
			"hex" => Ok(AddressFormat::Hex),
			other => Err(WalletSyncError::Config(format!(
				"Unknown address format: {}",
				other
			))),
		}
	}

	/// Normalized form of `raw`. Two strings refer to the same address iff this returns equal values.
	pub fn normalize(&self, raw: &str) -> Address {
		let trimmed = raw.trim();
		match self {
			AddressFormat::Base58 => Address::new_unchecked(trimmed),
			AddressFormat::Bech32 => {
				if bech32::segwit::decode(trimmed).is_ok() {
					Address::new_unchecked(trimmed.to_lowercase())
				} else {
					Address::new_unchecked(trimmed)
				}
			}
			AddressFormat::Hex => {
				let digits = trimmed
					.strip_prefix("0x")
					.or_else(|| trimmed.strip_prefix("0X"))
					.unwrap_or(trimmed);
				match hex::decode(digits) {
					Ok(bytes) if bytes.len() == 20 => {
						Address::new_unchecked(format!("0x{}", hex::encode(bytes)))
					}
					_ => Address::new_unchecked(trimmed.to_lowercase()),
				}
			}
		}
	}
}

/// Stable identity of an output: `txid/index`.
pub fn make_output_id(txid: &str, index: u32) -> String {
	format!("{}/{}", txid, index)
}

/// Inverse of [`make_output_id`].
pub fn parse_output_id(id: &str) -> Result<(String, u32), WalletSyncError> {
	let (txid, index) = id
		.rsplit_once('/')
		.ok_or_else(|| WalletSyncError::Parse(format!("Invalid output id: {}", id)))?;

	let index = index
		.parse::<u32>()
		.map_err(|e| WalletSyncError::Parse(format!("Invalid output index in {}: {}", id, e)))?;

	Ok((txid.to_string(), index))
}

#[cfg(test)]
mod tests {
	use super::*;

	const SEGWIT: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

	#[test]
	fn folds_case_only_for_bech32() {
		let format = AddressFormat::Bech32;
		assert_eq!(
			format.normalize(&SEGWIT.to_uppercase()),
			format.normalize(SEGWIT)
		);
		assert_eq!(format.normalize(SEGWIT).as_str(), SEGWIT);

		let legacy = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
		assert_eq!(format.normalize(&format!(" {} ", legacy)).as_str(), legacy);
		assert_ne!(
			format.normalize(legacy),
			format.normalize(&legacy.to_lowercase())
		);
	}

	#[test]
	fn hex_addresses_ignore_case() {
		let format = AddressFormat::Hex;
		assert_eq!(
			format.normalize("0xAbCdEf0123456789aBcDeF0123456789AbCdEf01"),
			format.normalize("0xabcdef0123456789abcdef0123456789abcdef01")
		);
		assert_eq!(
			format.normalize("0XABCDEF0123456789ABCDEF0123456789ABCDEF01").as_str(),
			"0xabcdef0123456789abcdef0123456789abcdef01"
		);
	}

	#[test]
	fn output_id_round_trip() {
		let id = make_output_id("deadbeef", 3);
		assert_eq!(id, "deadbeef/3");
		assert_eq!(parse_output_id(&id).unwrap(), ("deadbeef".to_string(), 3));
		assert!(parse_output_id("deadbeef").is_err());
		assert!(parse_output_id("deadbeef/x").is_err());
	}

	#[test]
	fn parses_format_names() {
		assert_eq!(AddressFormat::parse("BECH32").unwrap(), AddressFormat::Bech32);
		assert!(AddressFormat::parse("base32").is_err());
	}
}
