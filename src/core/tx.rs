use chrono::Utc;
use serde::Deserialize;

use super::{Transaction, ValidationError};

/// Wei per whole ether.
pub const WEI_PER_UNIT: u128 = 1_000_000_000_000_000_000;

/// A transaction as reported by a node (`eth_getTransactionByHash`) or
/// submitted to the analysis endpoint. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    pub gas_price: Option<String>,
    #[serde(alias = "data")]
    pub input: Option<String>,
}

impl RawTransaction {
    /// Decode and validate into a `Transaction`.
    pub fn into_transaction(self) -> Result<Transaction, ValidationError> {
        let hash = self.hash.filter(|h| !h.trim().is_empty()).ok_or(ValidationError::MissingHash)?;
        let from = self.from.filter(|f| !f.trim().is_empty()).ok_or(ValidationError::MissingSender)?;

        let value = match self.value.as_deref() {
            Some(v) => parse_quantity("value", v)?,
            None => 0,
        };
        let gas_price = match self.gas_price.as_deref() {
            Some(g) => parse_quantity("gasPrice", g)?,
            None => 0,
        };
        let data = match self.input.as_deref() {
            Some(d) => decode_data(d)?,
            None => Vec::new(),
        };

        let tx = Transaction {
            hash: hash.trim().to_string(),
            from: normalize_address(&from),
            to: self
                .to
                .filter(|t| !t.trim().is_empty())
                .map(|t| normalize_address(&t)),
            value,
            gas_price,
            data,
            seen_at: Utc::now(),
        };
        tx.validate()?;
        Ok(tx)
    }
}

/// Parse a `0x`-prefixed hex or plain decimal quantity.
pub fn parse_quantity(field: &'static str, raw: &str) -> Result<u128, ValidationError> {
    let trimmed = raw.trim();
    let invalid = || ValidationError::InvalidQuantity {
        field,
        value: raw.to_string(),
    };
    if let Some(hex_digits) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        if hex_digits.is_empty() {
            return Ok(0);
        }
        u128::from_str_radix(hex_digits, 16).map_err(|_| invalid())
    } else {
        trimmed.parse::<u128>().map_err(|_| invalid())
    }
}

/// Decode hex call data. An empty string or bare `0x` is empty data.
pub fn decode_data(raw: &str) -> Result<Vec<u8>, ValidationError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| ValidationError::InvalidData(e.to_string()))
}

/// Addresses are compared case-insensitively.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Convert wei to whole units for display and thresholds.
pub fn whole_units(wei: u128) -> f64 {
    wei as f64 / WEI_PER_UNIT as f64
}

/// The 4-byte function selector, if the call data is long enough.
pub fn selector(data: &[u8]) -> Option<[u8; 4]> {
    data.get(..4)?.try_into().ok()
}
