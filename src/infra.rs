// src/infra.rs
//! Seeder / trap / relay detectors.
//!
//! Each detector is a small additive rule set over [`InfraFeatures`], scored
//! 0-100 and bucketed into NONE (<40), MEDIUM (40-69) and HIGH (>=70).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::aggregator::active_days;
use crate::models::ExtractionPayload;
use crate::parser::normalized_transfer_value;

const DUST_ETH: f64 = 0.001;
const DUST_TOKEN: f64 = 1.0;
const FAST_FORWARD_SECS: i64 = 30 * 60;
const TEN_MINUTES: i64 = 600;
const ONE_HOUR: i64 = 3_600;
const MAX_EXPLAIN: usize = 5;
const REASONS_PER_DETECTOR: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InfraLevel {
    None,
    Medium,
    High,
}

impl InfraLevel {
    pub fn from_score(score: u32) -> Self {
        if score >= 70 {
            InfraLevel::High
        } else if score >= 40 {
            InfraLevel::Medium
        } else {
            InfraLevel::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    pub score: u32,
    pub level: InfraLevel,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InfraFeatures {
    pub tx_in_count: usize,
    pub tx_out_count: usize,
    pub tx_total: usize,
    pub unique_senders: usize,
    pub unique_recipients: usize,
    pub unique_counterparties: usize,
    pub dust_out_count: usize,
    pub dust_out_unique_recipients: usize,
    pub dust_out_ratio: f64,
    pub total_in_value: f64,
    pub total_out_value: f64,
    pub in_out_ratio: f64,
    pub net_flow: f64,
    pub active_days: usize,
    pub peak_tx_per_10m: usize,
    pub peak_tx_per_hour: usize,
    pub median_in_to_out_seconds: Option<i64>,
    pub fast_forward_ratio: f64,
    pub sender_reuse_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detectors {
    pub seeder: DetectorResult,
    pub trap: DetectorResult,
    pub relay: DetectorResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraSummary {
    pub level: InfraLevel,
    pub detectors: Detectors,
    pub features: InfraFeatures,
    pub explain: Vec<String>,
}

/// Most events whose span is strictly shorter than `window_secs`.
pub fn peak_tx_per_window(timestamps: &[i64], window_secs: i64) -> usize {
    if timestamps.is_empty() {
        return 0;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();

    let mut peak = 1;
    let mut left = 0;
    for right in 0..sorted.len() {
        while sorted[right] - sorted[left] >= window_secs && left < right {
            left += 1;
        }
        peak = peak.max(right - left + 1);
    }
    peak
}

/// For each inbound time, seconds until the first outbound strictly after it.
/// Inbounds with no later outbound contribute nothing.
pub fn in_to_out_latency(in_times: &[i64], out_times: &[i64]) -> Vec<i64> {
    if in_times.is_empty() || out_times.is_empty() {
        return Vec::new();
    }
    let mut ins = in_times.to_vec();
    let mut outs = out_times.to_vec();
    ins.sort_unstable();
    outs.sort_unstable();

    let mut latencies = Vec::with_capacity(ins.len());
    let mut j = 0;
    for t_in in ins {
        while j < outs.len() && outs[j] <= t_in {
            j += 1;
        }
        match outs.get(j) {
            Some(t_out) => latencies.push(t_out - t_in),
            None => break,
        }
    }
    latencies
}

/// Lower median for an even count, as whole seconds.
fn median(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]).div_euclid(2))
    }
}

pub fn extract_infra_features(payload: &ExtractionPayload) -> InfraFeatures {
    let address = payload.address.to_lowercase();
    let transfers = &payload.transfers;

    let mut timestamps = Vec::new();
    let mut in_times = Vec::new();
    let mut out_times = Vec::new();
    let mut senders: HashMap<&str, usize> = HashMap::new();
    let mut recipients: HashSet<&str> = HashSet::new();
    let mut dust_out_count = 0usize;
    let mut dust_recipients: HashSet<&str> = HashSet::new();
    let mut total_in_value = 0.0;
    let mut total_out_value = 0.0;

    for t in transfers {
        if let Some(ts) = t.timestamp {
            timestamps.push(ts);
        }
        if t.to == address && !t.from.is_empty() {
            *senders.entry(&t.from).or_default() += 1;
            if let Some(ts) = t.timestamp {
                in_times.push(ts);
            }
        }
        if t.from == address && !t.to.is_empty() {
            recipients.insert(&t.to);
            if let Some(ts) = t.timestamp {
                out_times.push(ts);
            }
        }

        let Some(value) = normalized_transfer_value(t) else {
            continue;
        };
        let dust = if t.contract_address().is_some() { DUST_TOKEN } else { DUST_ETH };
        if t.from == address {
            total_out_value += value;
            if value <= dust {
                dust_out_count += 1;
                dust_recipients.insert(&t.to);
            }
        } else if t.to == address {
            total_in_value += value;
        }
    }

    let latencies = in_to_out_latency(&in_times, &out_times);
    let fast_forward_ratio = if latencies.is_empty() {
        0.0
    } else {
        let fast = latencies.iter().filter(|l| **l <= FAST_FORWARD_SECS).count();
        fast as f64 / in_times.len().max(1) as f64
    };
    let sender_reuse_rate = if senders.is_empty() {
        0.0
    } else {
        senders.values().filter(|c| **c > 1).count() as f64 / senders.len() as f64
    };
    let unique_counterparties = senders
        .keys()
        .copied()
        .chain(recipients.iter().copied())
        .collect::<HashSet<&str>>()
        .len();

    InfraFeatures {
        tx_in_count: in_times.len(),
        tx_out_count: out_times.len(),
        tx_total: transfers.len(),
        unique_senders: senders.len(),
        unique_recipients: recipients.len(),
        unique_counterparties,
        dust_out_count,
        dust_out_unique_recipients: dust_recipients.len(),
        dust_out_ratio: dust_out_count as f64 / out_times.len().max(1) as f64,
        total_in_value,
        total_out_value,
        in_out_ratio: total_out_value / total_in_value.max(1e-9),
        net_flow: total_in_value - total_out_value,
        active_days: active_days(&timestamps),
        peak_tx_per_10m: peak_tx_per_window(&timestamps, TEN_MINUTES),
        peak_tx_per_hour: peak_tx_per_window(&timestamps, ONE_HOUR),
        median_in_to_out_seconds: median(&latencies),
        fast_forward_ratio,
        sender_reuse_rate,
    }
}

struct Rules {
    score: u32,
    reasons: Vec<String>,
}

impl Rules {
    fn new() -> Self {
        Self {
            score: 0,
            reasons: Vec::new(),
        }
    }

    fn add(&mut self, hit: bool, weight: u32, reason: &str) {
        if hit {
            self.score += weight;
            self.reasons.push(reason.to_string());
        }
    }

    fn finish(self) -> DetectorResult {
        let score = self.score.min(100);
        DetectorResult {
            score,
            level: InfraLevel::from_score(score),
            reasons: self.reasons,
        }
    }
}

/// Fan-out distributor: many tiny outbound transfers in bursts.
pub fn detect_seeder(f: &InfraFeatures) -> DetectorResult {
    let mut r = Rules::new();
    r.add(f.dust_out_unique_recipients >= 50, 30, "Many unique dust recipients");
    r.add(f.dust_out_ratio >= 0.7, 20, "Most outgoing transfers are dust-sized");
    r.add(f.peak_tx_per_10m >= 10, 20, "Burst activity in short windows");
    r.add(f.unique_recipients >= 100, 10, "High recipient fan-out");
    r.finish()
}

/// Pass-through collector: many one-off senders, quickly forwarded.
pub fn detect_trap(f: &InfraFeatures) -> DetectorResult {
    let mut r = Rules::new();
    r.add(f.unique_senders >= 30, 30, "Many unique senders");
    r.add(
        f.sender_reuse_rate <= 0.1 && f.unique_senders >= 10,
        20,
        "Low sender reuse",
    );
    r.add(
        f.median_in_to_out_seconds.is_some_and(|m| m <= ONE_HOUR),
        30,
        "Fast forwarding after inbound",
    );
    r.add(f.fast_forward_ratio >= 0.5, 20, "High forward-through ratio");
    r.finish()
}

/// Rapid in/out relay with near-zero net flow.
pub fn detect_relay(f: &InfraFeatures) -> DetectorResult {
    let mut r = Rules::new();
    r.add(
        f.tx_in_count >= 10 && f.tx_out_count >= 10,
        25,
        "Meaningful in/out activity",
    );
    r.add(
        f.median_in_to_out_seconds.is_some_and(|m| m <= 15 * 60),
        35,
        "Very rapid in→out turnover",
    );
    r.add(
        f.total_in_value > 0.0 && f.net_flow.abs() / f.total_in_value.max(1e-9) <= 0.1,
        20,
        "Net flow near zero",
    );
    r.add(f.unique_counterparties >= 30, 20, "Many counterparties");
    r.finish()
}

/// Run all detectors. A known-flagged address is escalated to HIGH when it
/// has activity in the window and to at least MEDIUM when dormant; the
/// escalation reason always survives truncation of the explanation list.
pub fn summarize_infra(payload: &ExtractionPayload, known_flagged: bool) -> InfraSummary {
    let features = extract_infra_features(payload);
    let detectors = Detectors {
        seeder: detect_seeder(&features),
        trap: detect_trap(&features),
        relay: detect_relay(&features),
    };
    let all = [&detectors.seeder, &detectors.trap, &detectors.relay];

    let mut level = all.iter().map(|d| d.level).max().unwrap_or(InfraLevel::None);
    let mut explain: Vec<String> = all
        .iter()
        .filter(|d| d.level >= InfraLevel::Medium)
        .flat_map(|d| d.reasons.iter().take(REASONS_PER_DETECTOR).cloned())
        .collect();

    if known_flagged {
        let forced = if features.tx_total > 0 {
            level = InfraLevel::High;
            "Known flagged address with recent activity"
        } else {
            level = level.max(InfraLevel::Medium);
            "Known flagged address (historical)"
        };
        explain.truncate(MAX_EXPLAIN - 1);
        explain.push(forced.to_string());
    } else {
        explain.truncate(MAX_EXPLAIN);
    }

    InfraSummary {
        level,
        detectors,
        features,
        explain,
    }
}
