// src/scoring.rs
use serde::{Deserialize, Serialize};

use crate::features::RiskFeatures;

pub const BASELINE: i32 = 50;
const MAX_REASONS: usize = 5;

const LOW_DIVERSITY_MIN_TX: usize = 5;
const LOW_DIVERSITY_MAX: usize = 3;
const CONCENTRATION_MIN: f64 = 0.6;
const STABLECOIN_AGE_DAYS: i64 = 90;
const HIGH_COUNTERPARTY_MIN: usize = 20;
const CONSISTENT_ACTIVE_DAYS: usize = 10;

/// Signed contribution to a score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: String,
    pub detail: String,
    pub weight: i32,
}

impl Reason {
    fn new(code: &str, detail: &str, weight: i32) -> Self {
        Self {
            code: code.to_string(),
            detail: detail.to_string(),
            weight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLabel {
    Low,
    Medium,
    High,
}

impl RiskLabel {
    pub fn from_score(score: i32) -> Self {
        if score <= 33 {
            RiskLabel::Low
        } else if score <= 66 {
            RiskLabel::Medium
        } else {
            RiskLabel::High
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub address: String,
    pub score: i32,
    pub label: RiskLabel,
    pub reasons: Vec<Reason>,
    pub features: RiskFeatures,
}

/// Pull the deviation from baseline halfway back, rounding half to even.
fn dampen(score: i32) -> i32 {
    let pulled = BASELINE as f64 + (score - BASELINE) as f64 * 0.5;
    pulled.round_ties_even() as i32
}

/// Score in `[0, 100]` plus at most five reasons ordered by |weight|.
pub fn score(features: &RiskFeatures) -> (i32, Vec<Reason>) {
    let mut score = BASELINE;
    let mut reasons: Vec<Reason> = Vec::new();
    let mut apply = |hit: bool, reason: Reason| {
        if hit {
            score += reason.weight;
            reasons.push(reason);
        }
    };

    apply(
        features.fresh_wallet_burst_flag,
        Reason::new("FRESH_BURST", "Fresh wallet with burst activity", 20),
    );
    apply(
        features.dust_only_flag,
        Reason::new("DUST_ONLY", "Only dust-level token balances", 10),
    );
    apply(
        features.tx_acceleration_flag,
        Reason::new("ACCELERATION", "Rapid increase in activity", 15),
    );
    apply(
        features.tx_count >= LOW_DIVERSITY_MIN_TX
            && features.unique_counterparties <= LOW_DIVERSITY_MAX
            && features.top_counterparty_concentration >= CONCENTRATION_MIN,
        Reason::new("LOW_DIVERSITY", "Low diversity and high concentration", 15),
    );
    apply(
        features.stablecoin_balance_flag
            && features.wallet_age_days.is_some_and(|age| age >= STABLECOIN_AGE_DAYS),
        Reason::new("STABLE_AGE", "Stablecoin usage and older wallet", -10),
    );
    apply(
        features.unique_counterparties >= HIGH_COUNTERPARTY_MIN
            && features.active_days >= CONSISTENT_ACTIVE_DAYS,
        Reason::new("DIVERSE_ACTIVE", "Diverse counterparties and consistent activity", -10),
    );

    // Informational only.
    if features.tx_count == 0 {
        reasons.push(Reason::new("NO_RECENT_ACTIVITY", "No recent activity in window", 0));
    } else if features.low_sample_flag {
        reasons.push(Reason::new(
            "LOW_SAMPLE",
            "Very few transfers; signal quality is limited",
            0,
        ));
    }
    if features.transfers_truncated {
        reasons.push(Reason::new("WINDOW_TRUNCATED", "Transfer window hit the fetch cap", 0));
    }

    if features.low_sample_flag {
        score = dampen(score);
    }
    if reasons.is_empty() {
        reasons.push(Reason::new("NO_SIGNALS", "No strong trust signals detected", 0));
    }

    let score = score.clamp(0, 100);
    // Stable: equal weights keep evaluation order.
    reasons.sort_by_key(|r| std::cmp::Reverse(r.weight.abs()));
    reasons.truncate(MAX_REASONS);
    (score, reasons)
}

pub fn analyze(address: &str, features: RiskFeatures) -> AnalysisResult {
    let (score, reasons) = score(&features);
    AnalysisResult {
        address: address.to_string(),
        score,
        label: RiskLabel::from_score(score),
        reasons,
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(tx_count: usize) -> RiskFeatures {
        RiskFeatures {
            wallet_age_days: Some(30),
            active_days: 5,
            tx_count,
            in_out_ratio: 1.0,
            unique_counterparties: 10,
            top_counterparty_concentration: 0.1,
            erc20_count: 0,
            stablecoin_balance_flag: false,
            dust_only_flag: false,
            fresh_wallet_burst_flag: false,
            contract_interaction_density: 0.0,
            tx_acceleration_ratio: None,
            tx_acceleration_flag: false,
            transfers_truncated: false,
            low_sample_flag: false,
        }
    }

    fn codes(reasons: &[Reason]) -> Vec<&str> {
        reasons.iter().map(|r| r.code.as_str()).collect()
    }

    #[test]
    fn no_flags_scores_baseline_with_one_neutral_reason() {
        let (s, reasons) = score(&quiet(12));
        assert_eq!(s, 50);
        assert_eq!(codes(&reasons), vec!["NO_SIGNALS"]);
    }

    #[test]
    fn zero_activity_is_informational() {
        let (s, reasons) = score(&quiet(0));
        assert_eq!(s, 50);
        assert_eq!(codes(&reasons), vec!["NO_RECENT_ACTIVITY"]);
        assert_eq!(RiskLabel::from_score(s), RiskLabel::Medium);
    }

    #[test]
    fn positive_adjustments_stack_and_clamp() {
        let mut f = quiet(30);
        f.fresh_wallet_burst_flag = true;
        f.dust_only_flag = true;
        f.tx_acceleration_flag = true;
        f.unique_counterparties = 2;
        f.top_counterparty_concentration = 0.9;
        let (s, reasons) = score(&f);
        assert_eq!(s, 100);
        assert_eq!(
            codes(&reasons),
            vec!["FRESH_BURST", "ACCELERATION", "LOW_DIVERSITY", "DUST_ONLY"]
        );
        assert_eq!(RiskLabel::from_score(s), RiskLabel::High);
    }

    #[test]
    fn negative_adjustments() {
        let mut f = quiet(200);
        f.stablecoin_balance_flag = true;
        f.wallet_age_days = Some(365);
        f.unique_counterparties = 40;
        f.active_days = 12;
        let (s, reasons) = score(&f);
        assert_eq!(s, 30);
        assert_eq!(codes(&reasons), vec!["STABLE_AGE", "DIVERSE_ACTIVE"]);
        assert_eq!(RiskLabel::from_score(s), RiskLabel::Low);

        // Stablecoins alone on a young wallet do nothing.
        f.wallet_age_days = Some(10);
        f.unique_counterparties = 5;
        let (s, _) = score(&f);
        assert_eq!(s, 50);
    }

    #[test]
    fn low_sample_dampens_after_adjustments() {
        let mut f = quiet(3);
        f.low_sample_flag = true;
        f.dust_only_flag = true;
        let (s, reasons) = score(&f);
        assert_eq!(s, 55);
        assert_eq!(codes(&reasons), vec!["DUST_ONLY", "LOW_SAMPLE"]);

        // 50 + 25 * 0.5 = 62.5 rounds to even.
        f.tx_acceleration_flag = true;
        let (s, _) = score(&f);
        assert_eq!(s, 62);
    }

    #[test]
    fn reasons_keep_top_five_with_stable_ties() {
        let mut f = quiet(30);
        f.fresh_wallet_burst_flag = true;
        f.dust_only_flag = true;
        f.tx_acceleration_flag = true;
        f.unique_counterparties = 2;
        f.top_counterparty_concentration = 0.9;
        f.stablecoin_balance_flag = true;
        f.wallet_age_days = Some(120);
        f.transfers_truncated = true;
        let (_, reasons) = score(&f);
        assert_eq!(reasons.len(), 5);
        assert_eq!(
            codes(&reasons),
            vec!["FRESH_BURST", "ACCELERATION", "LOW_DIVERSITY", "DUST_ONLY", "STABLE_AGE"]
        );
    }

    #[test]
    fn truncation_is_reported_without_moving_the_score() {
        let mut f = quiet(12);
        f.transfers_truncated = true;
        let (s, reasons) = score(&f);
        assert_eq!(s, 50);
        assert_eq!(codes(&reasons), vec!["WINDOW_TRUNCATED"]);
    }

    #[test]
    fn label_boundaries() {
        assert_eq!(RiskLabel::from_score(33), RiskLabel::Low);
        assert_eq!(RiskLabel::from_score(34), RiskLabel::Medium);
        assert_eq!(RiskLabel::from_score(66), RiskLabel::Medium);
        assert_eq!(RiskLabel::from_score(67), RiskLabel::High);
    }
}
