use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::processing::enrich::CurrencyCategory;
use crate::pipeline::processing::normalize::NormalizedRecord;
use crate::types::DateKey;

/// Per-day statistics for one target currency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrencyAggregate {
    pub date: DateKey,
    pub base_currency: String,
    pub target_currency: String,
    /// Last observed rate in input order
    pub latest_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub avg_rate: f64,
    /// Sample standard deviation; 0 for a single observation
    pub std_rate: f64,
    /// Coefficient of variation, `std_rate / avg_rate`; 0 when the mean is 0
    pub volatility: f64,
    pub currency_category: CurrencyCategory,
    pub observation_count: usize,
    pub processing_timestamp: DateTime<Utc>,
}

/// Groups by target currency and computes statistics per non-empty group.
/// Output is ordered by target currency code.
pub fn aggregate_by_currency(
    records: &[NormalizedRecord],
    date: DateKey,
    processed_at: DateTime<Utc>,
) -> Vec<CurrencyAggregate> {
    let mut groups: BTreeMap<&str, Vec<&NormalizedRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.target_currency.as_str())
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .filter_map(|(target, group)| {
            let first = group.first()?;
            let last = group.last()?;
            let rates: Vec<f64> = group.iter().map(|r| r.exchange_rate).collect();
            let stats = RateStats::of(&rates);
            Some(CurrencyAggregate {
                date,
                base_currency: first.base_currency.clone(),
                target_currency: target.to_string(),
                latest_rate: last.exchange_rate,
                min_rate: stats.min,
                max_rate: stats.max,
                avg_rate: stats.mean,
                std_rate: stats.std,
                volatility: if stats.mean == 0.0 { 0.0 } else { stats.std / stats.mean },
                currency_category: first.currency_category,
                observation_count: group.len(),
                processing_timestamp: processed_at,
            })
        })
        .collect()
}

struct RateStats {
    min: f64,
    max: f64,
    mean: f64,
    std: f64,
}

impl RateStats {
    fn of(rates: &[f64]) -> Self {
        let n = rates.len() as f64;
        let min = rates.iter().copied().fold(f64::INFINITY, f64::min);
        let max = rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = rates.iter().sum::<f64>() / n;
        let std = if rates.len() < 2 {
            0.0
        } else {
            let ss: f64 = rates.iter().map(|r| (r - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        };
        // Floating-point mean can land a hair outside [min, max] for near-equal inputs
        let mean = mean.clamp(min, max);
        Self { min, max, mean, std }
    }
}
