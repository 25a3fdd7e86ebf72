// Pipeline processing: normalization, quality filtering, enrichment and aggregation

pub mod aggregate;
pub mod enrich;
pub mod narrative;
pub mod normalize;
pub mod quality_gate;

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::error::Result;
use crate::storage::ArtifactStore;
use crate::types::{ArtifactRef, DateKey, Tier};
use normalize::NormalizedRecord;
use quality_gate::QualityReport;

/// Transform stage: raw snapshot in, normalized records out
pub struct Transformer {
    config: Arc<Config>,
    store: ArtifactStore,
}

impl Transformer {
    pub fn new(config: Arc<Config>, store: ArtifactStore) -> Self {
        Self { config, store }
    }

    /// Normalizes, filters and enriches one day's raw snapshot.
    ///
    /// An empty result is not an error: the empty artifact is written and a
    /// warning is logged so downstream stages see "no data for this day".
    #[instrument(skip(self, raw), fields(stage = "transform", date = %date))]
    pub fn transform(&self, raw: &ArtifactRef, date: DateKey) -> Result<(ArtifactRef, QualityReport)> {
        let t0 = Instant::now();
        info!(status = "started", raw = %raw, "Pipeline stage started");

        let result = self.run(raw, date);
        let duration_ms = t0.elapsed().as_millis() as u64;
        match &result {
            Ok((artifact, report)) => info!(
                status = "completed",
                duration_ms,
                kept = report.kept,
                dropped = report.total_dropped(),
                file_path = %artifact.path.display(),
                "Pipeline stage completed"
            ),
            Err(e) => error!(status = "failed", duration_ms, error = %e, "Pipeline stage failed"),
        }
        result
    }

    fn run(&self, raw: &ArtifactRef, date: DateKey) -> Result<(ArtifactRef, QualityReport)> {
        let body: Value = self.store.read_json(raw)?;
        let now = Utc::now();

        let candidates =
            normalize::extract_candidates(&body, date, &self.config.currencies.targets, now)?;
        info!(operation = "normalize", records_count = candidates.len(), "Data processing completed");

        let (accepted, report) = quality_gate::apply(candidates);
        for (reason, count) in &report.dropped {
            warn!(reason = %reason, count, "records removed by quality filter");
            crate::metrics::transform::records_dropped(reason.as_str(), *count);
        }
        crate::metrics::transform::records_kept(report.kept);

        let records: Vec<NormalizedRecord> = accepted
            .into_iter()
            .map(|a| enrich::enrich(a, now))
            .collect();

        if records.is_empty() {
            crate::metrics::transform::empty_day();
            warn!(input = report.input, "no records survived the quality filter");
        }

        let artifact = self.store.write_ndjson(Tier::Normalized, date, &records)?;
        Ok((artifact, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataPaths;
    use crate::pipeline::processing::enrich::CurrencyCategory;
    use crate::pipeline::processing::quality_gate::DropReason;
    use serde_json::json;

    fn setup(targets: Vec<String>) -> (tempfile::TempDir, Transformer, ArtifactStore) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_paths = DataPaths::under(tmp.path());
        config.currencies.targets = targets;
        let store = ArtifactStore::new(config.data_paths.clone());
        (tmp, Transformer::new(Arc::new(config), store.clone()), store)
    }

    fn day() -> DateKey {
        "2024-01-15".parse().unwrap()
    }

    fn write_raw(store: &ArtifactStore, rates: Value) -> ArtifactRef {
        store
            .write_json(
                Tier::Raw,
                day(),
                &json!({
                    "metadata": {"ingestion_timestamp": "2024-01-15T08:00:00Z"},
                    "raw_data": {"result": "success", "base_code": "USD", "conversion_rates": rates}
                }),
            )
            .unwrap()
    }

    #[test]
    fn filters_and_enriches_into_the_normalized_tier() {
        let (_tmp, transformer, store) = setup(vec![]);
        let raw = write_raw(&store, json!({"EUR": 0.9, "BRL": 5.0, "XXX": -1, "ZZZ": 0.00001}));

        let (artifact, report) = transformer.transform(&raw, day()).unwrap();
        assert_eq!(artifact.tier, Tier::Normalized);
        assert_eq!(report.kept, 2);
        assert_eq!(report.dropped_for(DropReason::NonPositive), 1);
        assert_eq!(report.dropped_for(DropReason::OutOfRange), 1);

        let rows: Vec<NormalizedRecord> = store.read_ndjson(&artifact).unwrap();
        assert_eq!(rows.len(), 2);
        let brl = rows.iter().find(|r| r.target_currency == "BRL").unwrap();
        assert!((brl.inverse_rate - 0.2).abs() < 1e-12);
        assert_eq!(brl.currency_category, CurrencyCategory::Emerging);
        for row in &rows {
            assert!(row.exchange_rate >= 0.0001 && row.exchange_rate <= 1_000_000.0);
            assert_eq!(row.date, day());
        }
    }

    #[test]
    fn allow_list_is_applied() {
        let (_tmp, transformer, store) = setup(vec!["EUR".into()]);
        let raw = write_raw(&store, json!({"EUR": 0.9, "BRL": 5.0}));
        let (artifact, report) = transformer.transform(&raw, day()).unwrap();
        let rows: Vec<NormalizedRecord> = store.read_ndjson(&artifact).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(report.total_dropped(), 0);
    }

    #[test]
    fn empty_result_still_writes_an_artifact() {
        let (_tmp, transformer, store) = setup(vec![]);
        let raw = write_raw(&store, json!({"XXX": -1}));
        let (artifact, report) = transformer.transform(&raw, day()).unwrap();
        assert_eq!(report.kept, 0);
        assert!(artifact.path.is_file());
        let rows: Vec<NormalizedRecord> = store.read_ndjson(&artifact).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn missing_raw_artifact_fails() {
        let (_tmp, transformer, store) = setup(vec![]);
        let raw = store.artifact_ref(Tier::Raw, day());
        assert!(transformer.transform(&raw, day()).is_err());
    }
}
