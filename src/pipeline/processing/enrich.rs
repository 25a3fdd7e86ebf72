use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::constants::{EMERGING_CURRENCIES, MAJOR_CURRENCIES};
use crate::pipeline::processing::normalize::NormalizedRecord;
use crate::pipeline::processing::quality_gate::AcceptedRate;

/// Market grouping used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyCategory {
    Major,
    Emerging,
    Other,
}

impl CurrencyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyCategory::Major => "major",
            CurrencyCategory::Emerging => "emerging",
            CurrencyCategory::Other => "other",
        }
    }
}

impl fmt::Display for CurrencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static CATEGORIES: Lazy<HashMap<&'static str, CurrencyCategory>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for code in MAJOR_CURRENCIES {
        map.insert(*code, CurrencyCategory::Major);
    }
    for code in EMERGING_CURRENCIES {
        map.insert(*code, CurrencyCategory::Emerging);
    }
    map
});

/// Static lookup; unknown codes fall into `Other`
pub fn categorize(currency: &str) -> CurrencyCategory {
    CATEGORIES
        .get(currency)
        .copied()
        .unwrap_or(CurrencyCategory::Other)
}

/// Adds inverse rate, category and processing time to an accepted rate
pub fn enrich(accepted: AcceptedRate, processed_at: DateTime<Utc>) -> NormalizedRecord {
    let AcceptedRate { candidate, rate } = accepted;
    NormalizedRecord {
        currency_category: categorize(&candidate.target_currency),
        inverse_rate: 1.0 / rate,
        processing_timestamp: processed_at,
        date: candidate.date,
        timestamp: candidate.timestamp,
        base_currency: candidate.base_currency,
        target_currency: candidate.target_currency,
        exchange_rate: rate,
        source: candidate.source,
        ingestion_timestamp: candidate.ingestion_timestamp,
        api_last_update: candidate.api_last_update,
    }
}
