// src/features.rs
//! Behavioral features for one address, computed fresh from an extraction
//! payload. Nothing here mutates its inputs or touches the network.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::aggregator::active_days;
use crate::config::{AccelerationConfig, FeatureConfig};
use crate::lists::Stablecoins;
use crate::models::{ExtractionPayload, TokenBalances, TokenMetadataEntry, Transfer};
use crate::parser;

const SECS_PER_DAY: i64 = 86_400;
const FLOW_EPSILON: f64 = 1e-9;

/// Borrowed view of everything the extractor reads.
#[derive(Debug, Clone, Copy)]
pub struct FeatureInput<'a> {
    pub address: &'a str,
    pub transfers: &'a [Transfer],
    pub token_balances: &'a TokenBalances,
    pub token_metadata: &'a BTreeMap<String, TokenMetadataEntry>,
    /// Explicit first-transfer record, when the extraction found one.
    pub first_transfer_ts: Option<i64>,
    /// Reference time for wallet age; falls back to the newest transfer.
    pub as_of: Option<i64>,
    pub transfers_truncated: bool,
}

impl<'a> FeatureInput<'a> {
    pub fn from_payload(payload: &'a ExtractionPayload) -> Self {
        Self {
            address: &payload.address,
            transfers: &payload.transfers,
            token_balances: &payload.token_balances,
            token_metadata: &payload.token_metadata,
            first_transfer_ts: payload.first_transfer.as_ref().and_then(|f| f.timestamp),
            as_of: payload.fetched_at,
            transfers_truncated: payload.transfers_truncated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFeatures {
    pub wallet_age_days: Option<i64>,
    pub active_days: usize,
    pub tx_count: usize,
    pub in_out_ratio: f64,
    pub unique_counterparties: usize,
    pub top_counterparty_concentration: f64,
    pub erc20_count: usize,
    pub stablecoin_balance_flag: bool,
    pub dust_only_flag: bool,
    pub fresh_wallet_burst_flag: bool,
    pub contract_interaction_density: f64,
    /// `None` when the recent window is too quiet to mean anything.
    pub tx_acceleration_ratio: Option<f64>,
    pub tx_acceleration_flag: bool,
    pub transfers_truncated: bool,
    pub low_sample_flag: bool,
}

fn counterparty_counts<'t>(address: &str, transfers: &'t [Transfer]) -> HashMap<&'t str, usize> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in transfers {
        if let Some(other) = t.counterparty(address) {
            *counts.entry(other).or_default() += 1;
        }
    }
    counts
}

/// `(inbound, outbound)` using the indexer's decimal value.
fn total_flow(address: &str, transfers: &[Transfer]) -> (f64, f64) {
    let mut total_in = 0.0;
    let mut total_out = 0.0;
    for t in transfers {
        let value = t.value.unwrap_or(0.0);
        if t.from == address {
            total_out += value;
        } else if t.to == address {
            total_in += value;
        }
    }
    (total_in, total_out)
}

fn utc_date(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

/// Recent daily rate against the preceding baseline's daily rate.
///
/// Windows are anchored on the date of the newest transfer. Below the
/// minimum recent volume the ratio is undefined and the flag stays off; an
/// empty baseline with enough recent volume is flagged without a ratio.
pub fn acceleration_stats(timestamps: &[i64], cfg: &AccelerationConfig) -> (Option<f64>, bool) {
    let Some(max_date) = timestamps.iter().max().and_then(|ts| utc_date(*ts)) else {
        return (None, false);
    };
    let recent_days = cfg.recent_days.max(1);
    let baseline_days = cfg.baseline_days.max(1);
    let recent_start = max_date - Duration::days(recent_days as i64 - 1);
    let baseline_start = recent_start - Duration::days(baseline_days as i64);

    let mut recent_total = 0usize;
    let mut baseline_total = 0usize;
    for day in timestamps.iter().filter_map(|ts| utc_date(*ts)) {
        if day >= recent_start {
            recent_total += 1;
        } else if day >= baseline_start {
            baseline_total += 1;
        }
    }

    if recent_total < cfg.min_recent_total {
        return (None, false);
    }
    let baseline_avg = baseline_total as f64 / baseline_days as f64;
    let recent_avg = recent_total as f64 / recent_days as f64;
    if baseline_avg == 0.0 {
        return (None, true);
    }
    let ratio = recent_avg / baseline_avg;
    (Some(ratio), ratio >= cfg.ratio)
}

pub fn extract_features(input: &FeatureInput<'_>, stablecoins: &Stablecoins, cfg: &FeatureConfig) -> RiskFeatures {
    let address = input.address.to_lowercase();
    let transfers = input.transfers;
    let tx_count = transfers.len();

    let timestamps: Vec<i64> = transfers.iter().filter_map(|t| t.timestamp).collect();
    let (tx_acceleration_ratio, tx_acceleration_flag) = acceleration_stats(&timestamps, &cfg.acceleration);

    let (total_in, total_out) = total_flow(&address, transfers);
    let in_out_ratio = total_out / total_in.max(FLOW_EPSILON);

    let counts = counterparty_counts(&address, transfers);
    let top_counterparty_concentration = if tx_count > 0 {
        counts.values().copied().max().unwrap_or(0) as f64 / tx_count as f64
    } else {
        0.0
    };

    let first_seen = input
        .first_transfer_ts
        .or_else(|| timestamps.iter().min().copied());
    let as_of = input.as_of.or_else(|| timestamps.iter().max().copied());
    let wallet_age_days = match (first_seen, as_of) {
        (Some(first), Some(now)) if first != 0 => Some((now - first) / SECS_PER_DAY),
        _ => None,
    };

    let mut erc20_count = 0usize;
    let mut stablecoin_balance_flag = false;
    let mut normalized_balances: Vec<f64> = Vec::new();
    for balance in &input.token_balances.token_balances {
        let Some(contract) = balance.contract_address.as_deref().filter(|c| !c.is_empty()) else {
            continue;
        };
        let raw = balance
            .token_balance
            .as_deref()
            .and_then(parser::parse_u256)
            .unwrap_or_default();
        if raw.is_zero() {
            continue;
        }
        erc20_count += 1;
        let contract = contract.to_lowercase();
        let decimals = input
            .token_metadata
            .get(&contract)
            .and_then(|entry| entry.metadata.decimals)
            .unwrap_or(0);
        normalized_balances.push(parser::normalize_units(raw, decimals));
        if stablecoins.contains_key(&contract) {
            stablecoin_balance_flag = true;
        }
    }
    let dust_only_flag =
        !normalized_balances.is_empty() && normalized_balances.iter().all(|b| *b <= cfg.dust_threshold);

    let contract_interactions = transfers
        .iter()
        .filter(|t| t.category.is_contract_driven() || t.contract_address().is_some())
        .count();
    let contract_interaction_density = if tx_count > 0 {
        contract_interactions as f64 / tx_count as f64
    } else {
        0.0
    };

    let fresh_wallet_burst_flag =
        wallet_age_days.is_some_and(|age| age <= cfg.fresh_wallet_days) && tx_count >= cfg.burst_tx_count;

    RiskFeatures {
        wallet_age_days,
        active_days: active_days(&timestamps),
        tx_count,
        in_out_ratio,
        unique_counterparties: counts.len(),
        top_counterparty_concentration,
        erc20_count,
        stablecoin_balance_flag,
        dust_only_flag,
        fresh_wallet_burst_flag,
        contract_interaction_density,
        tx_acceleration_ratio,
        tx_acceleration_flag,
        transfers_truncated: input.transfers_truncated,
        low_sample_flag: tx_count > 0 && tx_count < cfg.min_sample_tx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lists::Stablecoin;
    use crate::models::fixtures::transfer;
    use crate::models::{RawContract, TokenBalance, TokenMetadata, TransferCategory};

    const ME: &str = "0xme";
    const DAY: i64 = SECS_PER_DAY;
    const T0: i64 = 1_700_000_000 - (1_700_000_000 % DAY);
    const USDC: &str = "0xusdc";
    const JUNK: &str = "0xjunk";

    fn payload(transfers: Vec<Transfer>) -> ExtractionPayload {
        ExtractionPayload {
            address: ME.to_string(),
            transfers,
            ..Default::default()
        }
    }

    fn features(p: &ExtractionPayload) -> RiskFeatures {
        extract_features(&FeatureInput::from_payload(p), &Stablecoins::new(), &FeatureConfig::default())
    }

    fn metadata(decimals: u32) -> TokenMetadataEntry {
        TokenMetadataEntry {
            contract_address: String::new(),
            metadata: TokenMetadata {
                decimals: Some(decimals),
                ..Default::default()
            },
            fetched_at: 0,
        }
    }

    fn balance(contract: &str, raw: &str) -> TokenBalance {
        TokenBalance {
            contract_address: Some(contract.to_string()),
            token_balance: Some(raw.to_string()),
        }
    }

    #[test]
    fn empty_payload_is_all_defaults() {
        let f = features(&payload(vec![]));
        assert_eq!(f.tx_count, 0);
        assert_eq!(f.wallet_age_days, None);
        assert_eq!(f.top_counterparty_concentration, 0.0);
        assert_eq!(f.in_out_ratio, 0.0);
        assert!(!f.low_sample_flag);
        assert!(!f.dust_only_flag);
        assert_eq!(f.tx_acceleration_ratio, None);
    }

    #[test]
    fn flow_ratio_and_concentration() {
        let mut list = vec![
            transfer(ME, "0xa", 4, 0, Some(T0 + 40)),
            transfer(ME, "0xa", 3, 0, Some(T0 + 30)),
            transfer(ME, "0xa", 2, 0, Some(T0 + 20)),
            transfer("0xb", ME, 1, 0, Some(T0 + 10)),
        ];
        list[3].value = Some(2.0);
        let f = features(&payload(list));
        assert_eq!(f.tx_count, 4);
        assert_eq!(f.unique_counterparties, 2);
        assert!((f.top_counterparty_concentration - 0.75).abs() < 1e-12);
        assert!((f.in_out_ratio - 1.5).abs() < 1e-12);
        assert_eq!(f.active_days, 1);
        assert!(f.low_sample_flag);
    }

    #[test]
    fn no_inbound_uses_epsilon_denominator() {
        let f = features(&payload(vec![transfer(ME, "0xa", 1, 0, Some(T0))]));
        assert!(f.in_out_ratio > 1e8);
    }

    #[test]
    fn wallet_age_prefers_first_transfer_record_and_fetched_at() {
        let mut p = payload(vec![transfer(ME, "0xa", 2, 0, Some(T0 + 10 * DAY))]);
        let f = features(&p);
        assert_eq!(f.wallet_age_days, Some(0));

        p.first_transfer = Some(crate::models::FirstTransfer {
            block_num: None,
            timestamp: Some(T0),
            iso: None,
            hash: None,
            category: None,
        });
        p.fetched_at = Some(T0 + 100 * DAY + 5);
        let f = features(&p);
        assert_eq!(f.wallet_age_days, Some(100));
    }

    #[test]
    fn fresh_burst_needs_young_wallet_and_volume() {
        let list: Vec<_> = (0..25)
            .map(|i| transfer(ME, &format!("0x{:02}", i), 100 - i, 0, Some(T0 + i as i64 * 60)))
            .collect();
        let mut p = payload(list);
        p.fetched_at = Some(T0 + 3 * DAY);
        assert!(features(&p).fresh_wallet_burst_flag);

        p.fetched_at = Some(T0 + 8 * DAY);
        assert!(!features(&p).fresh_wallet_burst_flag);

        p.fetched_at = Some(T0 + 3 * DAY);
        p.transfers.truncate(19);
        assert!(!features(&p).fresh_wallet_burst_flag);
    }

    #[test]
    fn balances_are_normalized_for_dust_and_stablecoins() {
        let mut p = payload(vec![]);
        p.token_balances.token_balances = vec![
            balance(JUNK, "0x3e8"),             // 1000 raw, 6 decimals
            balance("0xzero", "0x0"),           // ignored
            balance("0xnometa", "0x"),          // empty hex, ignored
        ];
        p.token_metadata.insert(JUNK.to_string(), metadata(6));

        let f = features(&p);
        assert_eq!(f.erc20_count, 1);
        assert!(f.dust_only_flag);
        assert!(!f.stablecoin_balance_flag);

        p.token_balances.token_balances.push(balance(USDC, "0xf4240")); // 1.0 with 6 decimals
        p.token_metadata.insert(USDC.to_string(), metadata(6));
        let mut coins = Stablecoins::new();
        coins.insert(USDC.to_string(), Stablecoin::default());
        let f = extract_features(&FeatureInput::from_payload(&p), &coins, &FeatureConfig::default());
        assert_eq!(f.erc20_count, 2);
        assert!(!f.dust_only_flag);
        assert!(f.stablecoin_balance_flag);
    }

    #[test]
    fn missing_metadata_means_zero_decimals() {
        let mut p = payload(vec![]);
        p.token_balances.token_balances = vec![balance(JUNK, "5")];
        let f = features(&p);
        assert_eq!(f.erc20_count, 1);
        assert!(!f.dust_only_flag);
    }

    #[test]
    fn contract_density_counts_token_categories_and_raw_contracts() {
        let mut list = vec![
            transfer(ME, "0xa", 4, 0, None),
            transfer(ME, "0xa", 3, 0, None),
            transfer(ME, "0xa", 2, 0, None),
            transfer(ME, "0xa", 1, 0, None),
        ];
        list[0].category = TransferCategory::Erc20;
        list[1].category = TransferCategory::Internal;
        list[2].raw_contract = Some(RawContract {
            address: Some("0xtoken".into()),
            ..Default::default()
        });
        let f = features(&payload(list));
        assert!((f.contract_interaction_density - 0.75).abs() < 1e-12);
    }

    fn daily(counts: &[(i64, usize)]) -> Vec<i64> {
        counts
            .iter()
            .flat_map(|(day, n)| (0..*n).map(move |i| T0 + day * DAY + i as i64))
            .collect()
    }

    #[test]
    fn acceleration_is_undefined_below_minimum_volume() {
        let cfg = AccelerationConfig::default();
        let ts = daily(&[(20, 24), (0, 10)]);
        assert_eq!(acceleration_stats(&ts, &cfg), (None, false));
    }

    #[test]
    fn acceleration_with_empty_baseline_is_flagged_without_ratio() {
        let cfg = AccelerationConfig::default();
        let ts = daily(&[(20, 30)]);
        assert_eq!(acceleration_stats(&ts, &cfg), (None, true));
    }

    #[test]
    fn acceleration_ratio_against_baseline() {
        let cfg = AccelerationConfig::default();
        // Newest day is 20: recent window days 14..=20, baseline 0..=13.
        let ts = daily(&[(20, 28), (10, 14)]);
        let (ratio, flag) = acceleration_stats(&ts, &cfg);
        // recent 28/7 = 4.0, baseline 14/14 = 1.0
        assert!((ratio.unwrap() - 4.0).abs() < 1e-12);
        assert!(flag);

        let ts = daily(&[(20, 28), (13, 42)]);
        let (ratio, flag) = acceleration_stats(&ts, &cfg);
        assert!((ratio.unwrap() - 4.0 / 3.0).abs() < 1e-12);
        assert!(!flag);

        // Day -1 is before the baseline and ignored.
        let ts = daily(&[(20, 28), (-1, 500)]);
        assert_eq!(acceleration_stats(&ts, &cfg), (None, true));
    }

    #[test]
    fn extraction_leaves_payload_untouched() {
        let p = payload(vec![transfer(ME, "0xa", 1, 0, Some(T0))]);
        let before = p.clone();
        let _ = features(&p);
        assert_eq!(p, before);
    }
}
