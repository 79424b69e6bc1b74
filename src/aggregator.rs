use std::collections::HashSet;

use chrono::{DateTime, NaiveDate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::models::{Aggregate, Transfer};
use crate::parser;

/// Distinct UTC calendar dates among `timestamps`.
pub fn active_days(timestamps: &[i64]) -> usize {
    timestamps
        .iter()
        .filter_map(|ts| DateTime::from_timestamp(*ts, 0))
        .map(|dt| dt.date_naive())
        .collect::<HashSet<NaiveDate>>()
        .len()
}

fn to_decimal(value: Option<f64>) -> Decimal {
    value
        .and_then(Decimal::from_f64)
        .filter(|d| d.is_sign_positive())
        .unwrap_or(Decimal::ZERO)
}

/// Lightweight per-address summary over one window of transfers.
///
/// Only transfers with both endpoints count towards flows and counterparties;
/// `tx_count` is the raw list length.
pub fn light_aggregates(address: &str, transfers: &[Transfer]) -> Aggregate {
    let addr = address.to_lowercase();
    let mut timestamps = Vec::with_capacity(transfers.len());
    let mut counterparties: HashSet<&str> = HashSet::new();
    let mut total_in = Decimal::ZERO;
    let mut total_out = Decimal::ZERO;

    for t in transfers {
        if let Some(ts) = t.timestamp {
            timestamps.push(ts);
        }
        if t.from.is_empty() || t.to.is_empty() {
            continue;
        }
        if t.from == addr {
            counterparties.insert(&t.to);
            total_out += to_decimal(t.value);
        } else if t.to == addr {
            counterparties.insert(&t.from);
            total_in += to_decimal(t.value);
        }
    }

    let first_seen = timestamps.iter().min().copied();
    let last_seen = timestamps.iter().max().copied();

    Aggregate {
        address: address.to_string(),
        first_seen,
        first_seen_iso: first_seen.and_then(parser::format_iso),
        last_seen,
        last_seen_iso: last_seen.and_then(parser::format_iso),
        active_days: active_days(&timestamps),
        tx_count: transfers.len(),
        unique_counterparties: counterparties.len(),
        total_in,
        total_out,
    }
}
