use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::warn;

use crate::constants::{MAX_PLAUSIBLE_RATE, MIN_PLAUSIBLE_RATE};
use crate::pipeline::processing::normalize::RateCandidate;
use crate::types::DateKey;

type PairKey = (String, String, DateKey);

/// Why a candidate was dropped by the quality gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Rate absent or not numeric
    MissingRate,
    /// Rate zero or negative
    NonPositive,
    /// Rate outside the plausible band
    OutOfRange,
    /// Same (base, target, date) already accepted
    Duplicate,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingRate => "missing_rate",
            DropReason::NonPositive => "non_positive",
            DropReason::OutOfRange => "out_of_range",
            DropReason::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate that passed every check; `rate` is guaranteed inside the band
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedRate {
    pub candidate: RateCandidate,
    pub rate: f64,
}

/// Outcome counts for one quality-gate pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub input: usize,
    pub kept: usize,
    pub dropped: BTreeMap<DropReason, usize>,
}

impl QualityReport {
    pub fn total_dropped(&self) -> usize {
        self.dropped.values().sum()
    }

    pub fn dropped_for(&self, reason: DropReason) -> usize {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }
}

/// Applies the checks in order: missing, non-positive, band, duplicate.
/// The first failing check decides the drop reason. Drops are never fatal.
pub fn apply(candidates: Vec<RateCandidate>) -> (Vec<AcceptedRate>, QualityReport) {
    let mut report = QualityReport {
        input: candidates.len(),
        ..Default::default()
    };
    let mut seen: HashSet<PairKey> = HashSet::new();
    let mut accepted = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match check(&candidate, &mut seen) {
            Ok(rate) => accepted.push(AcceptedRate { candidate, rate }),
            Err(reason) => {
                warn!(
                    target_currency = %candidate.target_currency,
                    rate = ?candidate.rate,
                    reason = %reason,
                    "dropping rate"
                );
                *report.dropped.entry(reason).or_insert(0) += 1;
            }
        }
    }

    report.kept = accepted.len();
    (accepted, report)
}

fn check(
    candidate: &RateCandidate,
    seen: &mut HashSet<PairKey>,
) -> std::result::Result<f64, DropReason> {
    let rate = candidate
        .rate
        .filter(|r| !r.is_nan())
        .ok_or(DropReason::MissingRate)?;
    if rate <= 0.0 {
        return Err(DropReason::NonPositive);
    }
    if !(MIN_PLAUSIBLE_RATE..=MAX_PLAUSIBLE_RATE).contains(&rate) {
        return Err(DropReason::OutOfRange);
    }
    let key = (
        candidate.base_currency.clone(),
        candidate.target_currency.clone(),
        candidate.date,
    );
    if !seen.insert(key) {
        return Err(DropReason::Duplicate);
    }
    Ok(rate)
}
