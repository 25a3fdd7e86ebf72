use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::SOURCE_ID;
use crate::error::{PipelineError, Result};
use crate::types::DateKey;

/// One (base, target) pair lifted out of a raw snapshot, before any quality checks.
///
/// `rate` is `None` when the provider value was absent or not numeric; the
/// quality gate decides what to do with those.
#[derive(Debug, Clone, PartialEq)]
pub struct RateCandidate {
    /// Partition the candidate belongs to
    pub date: DateKey,
    /// When the candidate was extracted
    pub timestamp: DateTime<Utc>,
    pub base_currency: String,
    pub target_currency: String,
    pub rate: Option<f64>,
    /// Source system that provided the snapshot
    pub source: String,
    /// Capture time recorded by the ingestion stage
    pub ingestion_timestamp: Option<DateTime<Utc>>,
    /// Provider-reported last update (`time_last_update_utc`), kept verbatim
    pub api_last_update: Option<String>,
}

/// Canonical normalized row, written one per line to the normalized tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedRecord {
    pub date: DateKey,
    pub timestamp: DateTime<Utc>,
    pub base_currency: String,
    pub target_currency: String,
    /// Units of target per one unit of base; always strictly positive
    pub exchange_rate: f64,
    pub source: String,
    pub ingestion_timestamp: Option<DateTime<Utc>>,
    pub api_last_update: Option<String>,
    /// `1 / exchange_rate`
    pub inverse_rate: f64,
    pub currency_category: super::enrich::CurrencyCategory,
    pub processing_timestamp: DateTime<Utc>,
}

/// Extracts candidates from a raw artifact body.
///
/// Accepts either the wrapped snapshot (`{metadata, raw_data}`) or a bare
/// provider payload. When `allow_list` is non-empty, pairs outside it are
/// skipped without being counted as drops.
pub fn extract_candidates(
    raw: &Value,
    date: DateKey,
    allow_list: &[String],
    now: DateTime<Utc>,
) -> Result<Vec<RateCandidate>> {
    let payload = raw.get("raw_data").unwrap_or(raw);
    let ingestion_timestamp = raw
        .get("metadata")
        .and_then(|m| m.get("ingestion_timestamp"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    let base_currency = payload
        .get("base_code")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            PipelineError::Validation("raw artifact has no base_code".to_string())
        })?
        .to_string();
    let rates = payload
        .get("conversion_rates")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            PipelineError::Validation("raw artifact has no conversion_rates object".to_string())
        })?;
    let api_last_update = payload
        .get("time_last_update_utc")
        .and_then(Value::as_str)
        .map(str::to_string);

    let candidates = rates
        .iter()
        .filter(|(target, _)| allow_list.is_empty() || allow_list.iter().any(|a| a == *target))
        .map(|(target, value)| RateCandidate {
            date,
            timestamp: now,
            base_currency: base_currency.clone(),
            target_currency: target.clone(),
            rate: numeric_rate(value),
            source: SOURCE_ID.to_string(),
            ingestion_timestamp,
            api_last_update: api_last_update.clone(),
        })
        .collect();

    Ok(candidates)
}

/// Numbers pass through; numeric strings are coerced; anything else is missing.
fn numeric_rate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|r| r.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day() -> DateKey {
        "2024-01-15".parse().unwrap()
    }

    fn snapshot(rates: Value) -> Value {
        json!({
            "metadata": {
                "ingestion_timestamp": "2024-01-15T08:00:00Z",
                "source": "exchangerate-api.com",
                "base_currency": "USD",
                "currencies_count": 3,
                "payload_sha256": "00"
            },
            "raw_data": {
                "result": "success",
                "base_code": "USD",
                "time_last_update_utc": "Mon, 15 Jan 2024 00:00:01 +0000",
                "conversion_rates": rates
            }
        })
    }

    #[test]
    fn extracts_every_pair_with_lineage() {
        let raw = snapshot(json!({"EUR": 0.92, "BRL": 4.9}));
        let now = Utc::now();
        let candidates = extract_candidates(&raw, day(), &[], now).unwrap();

        assert_eq!(candidates.len(), 2);
        let eur = candidates.iter().find(|c| c.target_currency == "EUR").unwrap();
        assert_eq!(eur.base_currency, "USD");
        assert_eq!(eur.rate, Some(0.92));
        assert_eq!(eur.date, day());
        assert_eq!(eur.timestamp, now);
        assert_eq!(eur.source, SOURCE_ID);
        assert!(eur.ingestion_timestamp.is_some());
        assert_eq!(eur.api_last_update.as_deref(), Some("Mon, 15 Jan 2024 00:00:01 +0000"));
    }

    #[test]
    fn allow_list_restricts_targets() {
        let raw = snapshot(json!({"EUR": 0.92, "BRL": 4.9, "JPY": 148.0}));
        let allow = vec!["EUR".to_string(), "JPY".to_string()];
        let targets: Vec<String> = extract_candidates(&raw, day(), &allow, Utc::now())
            .unwrap()
            .into_iter()
            .map(|c| c.target_currency)
            .collect();
        assert_eq!(targets, vec!["EUR", "JPY"]);
    }

    #[test]
    fn non_numeric_rates_become_missing() {
        let raw = snapshot(json!({"EUR": "0.92", "BRL": "n/a", "XXX": null, "YYY": [1]}));
        let candidates = extract_candidates(&raw, day(), &[], Utc::now()).unwrap();
        let rate = |code: &str| {
            candidates
                .iter()
                .find(|c| c.target_currency == code)
                .unwrap()
                .rate
        };
        assert_eq!(rate("EUR"), Some(0.92));
        assert_eq!(rate("BRL"), None);
        assert_eq!(rate("XXX"), None);
        assert_eq!(rate("YYY"), None);
    }

    #[test]
    fn bare_payload_is_accepted() {
        let raw = json!({"base_code": "EUR", "conversion_rates": {"USD": 1.09}});
        let candidates = extract_candidates(&raw, day(), &[], Utc::now()).unwrap();
        assert_eq!(candidates[0].base_currency, "EUR");
        assert!(candidates[0].ingestion_timestamp.is_none());
    }

    #[test]
    fn missing_structure_is_a_validation_error() {
        let err = extract_candidates(&json!({"raw_data": {}}), day(), &[], Utc::now()).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
