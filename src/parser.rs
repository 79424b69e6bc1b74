// src/parser.rs
//! Parsing for on-chain numeric fields and the indexer's transfer records.
//!
//! Every hex/int/string coercion in the crate goes through this module.
//! Policy: a field that cannot be read as a number becomes `None` at the
//! boundary. Callers that need a concrete number (the ordering key, balance
//! normalization) treat `None` as zero.

use alloy::primitives::U256;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::{RawContract, Transfer, TransferCategory};

/// Integer quantity from a JSON value: numbers pass through, `0x` strings are
/// hex, other strings decimal. Negative, fractional or garbage input is `None`.
pub fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_quantity_str(s),
        _ => None,
    }
}

pub fn parse_quantity_str(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() {
            return Some(0);
        }
        return u64::from_str_radix(hex, 16).ok();
    }
    s.parse::<u64>().ok()
}

/// Decimal amount from a JSON number or numeric string.
pub fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Arbitrary-width raw integer (token balances, raw transfer values).
pub fn parse_u256(s: &str) -> Option<U256> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s == "0x" {
        return Some(U256::ZERO);
    }
    s.parse::<U256>().ok()
}

/// Scale a raw integer down by `10^decimals`.
pub fn normalize_units(raw: U256, decimals: u32) -> f64 {
    let value = raw.to_string().parse::<f64>().unwrap_or(0.0);
    if decimals == 0 {
        return value;
    }
    value / 10f64.powi(decimals as i32)
}

/// Unix seconds from an ISO-8601 timestamp. Naive timestamps are read as UTC.
pub fn parse_iso_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// `2024-01-01T00:00:00Z` style rendering.
pub fn format_iso(ts: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

pub fn normalize_address(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn de_opt_quantity<'de, D>(d: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(parse_quantity))
}

pub fn de_opt_quantity_u32<'de, D>(d: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref()
        .and_then(parse_quantity)
        .and_then(|n| u32::try_from(n).ok()))
}

pub fn de_opt_amount<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(parse_amount))
}

/// Signed unix seconds; accepts numbers, numeric strings and ISO strings.
pub fn de_opt_timestamp<'de, D>(d: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| parse_iso_timestamp(&s)),
        _ => None,
    })
}

fn de_opt_address<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::String(s)) => Some(normalize_address(&s)),
        _ => None,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    #[serde(default)]
    pub block_timestamp: Option<String>,
}

/// A transfer as the indexer (or a stored payload) reports it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default, deserialize_with = "de_opt_address")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "de_opt_address")]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub value: Option<f64>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub category: Option<TransferCategory>,
    #[serde(default, deserialize_with = "de_opt_quantity")]
    pub block_num: Option<u64>,
    #[serde(default, alias = "txIndex", deserialize_with = "de_opt_quantity")]
    pub transaction_index: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_quantity")]
    pub log_index: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub block_timestamp: Option<String>,
    #[serde(default)]
    pub metadata: Option<RecordMetadata>,
    #[serde(default)]
    pub raw_contract: Option<RawContract>,
}

impl From<TransferRecord> for Transfer {
    fn from(r: TransferRecord) -> Self {
        let timestamp = r
            .timestamp
            .or_else(|| r.block_timestamp.as_deref().and_then(parse_iso_timestamp))
            .or_else(|| {
                r.metadata
                    .as_ref()
                    .and_then(|m| m.block_timestamp.as_deref())
                    .and_then(parse_iso_timestamp)
            });

        let raw_contract = r.raw_contract.map(|mut c| {
            c.address = c
                .address
                .map(|a| normalize_address(&a))
                .filter(|a| !a.is_empty());
            c
        });

        Transfer {
            unique_id: r.unique_id,
            hash: r.hash,
            from: r.from.unwrap_or_default(),
            to: r.to.unwrap_or_default(),
            value: r.value,
            asset: r.asset,
            category: r.category.unwrap_or_default(),
            block_num: r.block_num,
            transaction_index: r.transaction_index,
            log_index: r.log_index,
            timestamp,
            raw_contract,
        }
    }
}

/// Normalized value of a transfer: the raw contract integer scaled by its
/// decimals when both are present, otherwise the indexer's decimal `value`.
pub fn normalized_transfer_value(t: &Transfer) -> Option<f64> {
    if let Some(contract) = &t.raw_contract {
        if let (Some(raw), Some(decimals)) = (contract.value.as_deref(), contract.decimal) {
            return parse_u256(raw).map(|v| normalize_units(v, decimals));
        }
    }
    t.value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quantity_accepts_hex_decimal_and_numbers() {
        assert_eq!(parse_quantity(&json!("0x1a")), Some(26));
        assert_eq!(parse_quantity(&json!("0X10")), Some(16));
        assert_eq!(parse_quantity(&json!("42")), Some(42));
        assert_eq!(parse_quantity(&json!(7)), Some(7));
        assert_eq!(parse_quantity(&json!("0x")), Some(0));
    }

    #[test]
    fn quantity_rejects_garbage_instead_of_guessing() {
        assert_eq!(parse_quantity(&json!("0xzz")), None);
        assert_eq!(parse_quantity(&json!("abc")), None);
        assert_eq!(parse_quantity(&json!(-3)), None);
        assert_eq!(parse_quantity(&json!(1.5)), None);
        assert_eq!(parse_quantity(&json!(null)), None);
        assert_eq!(parse_quantity(&json!({"x": 1})), None);
    }

    #[test]
    fn amount_parses_numbers_and_strings() {
        assert_eq!(parse_amount(&json!(0.25)), Some(0.25));
        assert_eq!(parse_amount(&json!("1.5")), Some(1.5));
        assert_eq!(parse_amount(&json!("nope")), None);
        assert_eq!(parse_amount(&json!(null)), None);
    }

    #[test]
    fn iso_roundtrip() {
        let ts = parse_iso_timestamp("2024-03-01T12:00:00.000Z").unwrap();
        assert_eq!(format_iso(ts).unwrap(), "2024-03-01T12:00:00Z");
        assert_eq!(parse_iso_timestamp("2024-03-01T12:00:00"), Some(ts));
        assert_eq!(parse_iso_timestamp("yesterday"), None);
    }

    #[test]
    fn units_scale_by_decimals() {
        let raw = parse_u256("0xde0b6b3a7640000").unwrap(); // 1e18
        assert!((normalize_units(raw, 18) - 1.0).abs() < 1e-12);
        assert_eq!(normalize_units(U256::from(5u64), 0), 5.0);
        assert_eq!(parse_u256("0x"), Some(U256::ZERO));
        assert_eq!(parse_u256(""), None);
    }

    #[test]
    fn record_decodes_indexer_shape() {
        let raw = json!({
            "uniqueId": "0xabc:log:3",
            "hash": "0xabc",
            "from": "0xAAAA",
            "to": "0xBBBB",
            "value": 0.5,
            "asset": "USDC",
            "category": "erc20",
            "blockNum": "0x10",
            "txIndex": "0x2",
            "logIndex": "0x3",
            "metadata": { "blockTimestamp": "2024-01-01T00:00:00.000Z" },
            "rawContract": { "address": "0xA0B8", "value": "0x7a120", "decimal": "0x6" }
        });
        let t: Transfer = serde_json::from_value(raw).unwrap();
        assert_eq!(t.from, "0xaaaa");
        assert_eq!(t.to, "0xbbbb");
        assert_eq!(t.order_key(), (16, 2, 3));
        assert_eq!(t.category, TransferCategory::Erc20);
        assert_eq!(t.timestamp, Some(1_704_067_200));
        assert_eq!(t.contract_address(), Some("0xa0b8"));
        assert!((normalized_transfer_value(&t).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn record_tolerates_missing_and_malformed_fields() {
        let t: Transfer = serde_json::from_value(json!({
            "from": null,
            "blockNum": "garbage",
            "category": "specialnft",
            "value": "n/a"
        }))
        .unwrap();
        assert_eq!(t.from, "");
        assert_eq!(t.block_num, None);
        assert_eq!(t.order_key(), (0, 0, 0));
        assert_eq!(t.category, TransferCategory::Unknown);
        assert_eq!(t.value, None);
        assert_eq!(t.timestamp, None);
    }
}
