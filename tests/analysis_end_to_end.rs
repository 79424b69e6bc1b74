use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use trustscope::config::FeatureConfig;
use trustscope::models::ExtractionPayload;
use trustscope::pipeline::{analyze_report, Lists};
use trustscope::scoring::RiskLabel;

const ME: &str = "0x00000000000000000000000000000000000000aa";
const NOW: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

fn peer(i: usize) -> String {
    format!("0x{:040x}", 0x1000 + i)
}

fn iso(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .unwrap()
        .format("%Y-%m-%dT%H:%M:%S.000Z")
        .to_string()
}

/// Indexer-shaped transfer; even indices are outgoing.
fn transfer(i: usize, ts: i64) -> Value {
    let (from, to) = if i % 2 == 0 { (ME.to_string(), peer(i)) } else { (peer(i), ME.to_string()) };
    json!({
        "uniqueId": format!("0x{:064x}:log:0", i),
        "hash": format!("0x{:064x}", i),
        "from": from,
        "to": to,
        "value": 0.5,
        "asset": "ETH",
        "category": "external",
        "blockNum": format!("0x{:x}", 1_000 + i),
        "metadata": { "blockTimestamp": iso(ts) }
    })
}

fn payload(transfers: Vec<Value>, first_ts: Option<i64>) -> ExtractionPayload {
    serde_json::from_value(json!({
        "address": ME,
        "window_days": 30,
        "transfers": transfers,
        "first_transfer": first_ts.map(|ts| json!({"timestamp": ts})),
        "fetched_at": NOW,
    }))
    .unwrap()
}

fn codes(report: &trustscope::pipeline::AnalysisReport) -> Vec<String> {
    report.result.reasons.iter().map(|r| r.code.clone()).collect()
}

#[test]
fn empty_window_scores_baseline() {
    let report = analyze_report(&payload(vec![], None), &Lists::default(), &FeatureConfig::default(), true);
    assert_eq!(report.result.score, 50);
    assert_eq!(report.result.label, RiskLabel::Medium);
    assert_eq!(codes(&report), vec!["NO_RECENT_ACTIVITY"]);
    assert_eq!(report.infra.as_ref().unwrap().features.tx_total, 0);
}

#[test]
fn fresh_wallet_burst_is_high_risk() {
    let transfers: Vec<Value> = (0..25).map(|i| transfer(i, NOW - 3 * DAY + i as i64 * 3_600)).collect();
    let report = analyze_report(
        &payload(transfers, Some(NOW - 3 * DAY)),
        &Lists::default(),
        &FeatureConfig::default(),
        false,
    );

    let features = &report.result.features;
    assert_eq!(features.wallet_age_days, Some(3));
    assert_eq!(features.tx_count, 25);
    assert!(features.fresh_wallet_burst_flag);
    assert!(report.result.score >= 70);
    assert_eq!(report.result.label, RiskLabel::High);
    assert!(codes(&report).contains(&"FRESH_BURST".to_string()));
    assert!(report.infra.is_none());
}

#[test]
fn steady_wallet_without_signals_is_neutral() {
    // One transfer every five days, each with a new counterparty.
    let transfers: Vec<Value> = (0..12).map(|i| transfer(i, NOW - 60 * DAY + i as i64 * 5 * DAY)).collect();
    let report = analyze_report(
        &payload(transfers, Some(NOW - 400 * DAY)),
        &Lists::default(),
        &FeatureConfig::default(),
        true,
    );

    assert_eq!(report.result.score, 50);
    assert_eq!(codes(&report), vec!["NO_SIGNALS"]);
    assert_eq!(report.result.features.unique_counterparties, 12);
    assert!(!report.result.features.low_sample_flag);
}

#[test]
fn analysis_is_deterministic_and_serializes_flat() {
    let transfers: Vec<Value> = (0..8).map(|i| transfer(i % 2, NOW - i as i64 * DAY)).collect();
    let p = payload(transfers, None);
    let a = analyze_report(&p, &Lists::default(), &FeatureConfig::default(), true);
    let b = analyze_report(&p, &Lists::default(), &FeatureConfig::default(), true);
    assert_eq!(a, b);

    let v = serde_json::to_value(&a).unwrap();
    assert_eq!(v["address"], ME);
    assert!(v["score"].is_i64());
    assert!(v["reasons"].as_array().unwrap().len() <= 5);
    assert!(v["infra"]["level"].is_string());
}
