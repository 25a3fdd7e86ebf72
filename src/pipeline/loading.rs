// Aggregation/load stage: normalized records in, per-currency statistics out

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::app::ports::MirrorSinkPort;
use crate::error::Result;
use crate::pipeline::processing::aggregate::{aggregate_by_currency, CurrencyAggregate};
use crate::pipeline::processing::normalize::NormalizedRecord;
use crate::storage::ArtifactStore;
use crate::types::{ArtifactRef, DateKey, Tier};

/// Mirror target: a sink plus the table rows are appended to
pub struct Mirror {
    pub sink: Arc<dyn MirrorSinkPort>,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub artifact: ArtifactRef,
    pub rows: usize,
    /// Set when the mirror append failed; the file artifact is still valid
    pub mirror_error: Option<String>,
}

pub struct Loader {
    store: ArtifactStore,
    mirror: Option<Mirror>,
}

impl Loader {
    pub fn new(store: ArtifactStore, mirror: Option<Mirror>) -> Self {
        Self { store, mirror }
    }

    #[instrument(skip(self, normalized), fields(stage = "aggregate", date = %date))]
    pub async fn aggregate(&self, normalized: &ArtifactRef, date: DateKey) -> Result<LoadOutcome> {
        let t0 = Instant::now();
        info!(status = "started", normalized = %normalized, "Pipeline stage started");

        let result = self.run(normalized, date).await;
        let duration_ms = t0.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => info!(
                status = "completed",
                duration_ms,
                rows = outcome.rows,
                mirror_ok = outcome.mirror_error.is_none(),
                file_path = %outcome.artifact.path.display(),
                "Pipeline stage completed"
            ),
            Err(e) => error!(status = "failed", duration_ms, error = %e, "Pipeline stage failed"),
        }
        result
    }

    async fn run(&self, normalized: &ArtifactRef, date: DateKey) -> Result<LoadOutcome> {
        let records: Vec<NormalizedRecord> = self.store.read_ndjson(normalized)?;
        let aggregates = aggregate_by_currency(&records, date, Utc::now());
        crate::metrics::load::groups_aggregated(aggregates.len());
        info!(
            operation = "calculate_aggregations",
            records_count = aggregates.len(),
            "Data processing completed"
        );

        let artifact = self.store.write_ndjson(Tier::Aggregate, date, &aggregates)?;
        let mirror_error = self.mirror_rows(&aggregates).await;

        Ok(LoadOutcome {
            artifact,
            rows: aggregates.len(),
            mirror_error,
        })
    }

    /// Best-effort append; failures are reported, never propagated
    async fn mirror_rows(&self, rows: &[CurrencyAggregate]) -> Option<String> {
        let mirror = self.mirror.as_ref()?;
        if rows.is_empty() {
            return None;
        }
        match mirror.sink.append(&mirror.table, rows).await {
            Ok(appended) => {
                crate::metrics::load::mirror_rows_appended(appended);
                info!(table = %mirror.table, rows = appended, "rows appended to mirror");
                None
            }
            Err(e) => {
                crate::metrics::load::mirror_error();
                warn!(table = %mirror.table, error = %e, "mirror append failed");
                Some(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataPaths;
    use crate::error::PipelineError;
    use crate::pipeline::processing::enrich::categorize;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        appended: Mutex<Vec<(String, usize)>>,
        fail: bool,
    }

    #[async_trait]
    impl MirrorSinkPort for RecordingSink {
        async fn append(&self, table: &str, rows: &[CurrencyAggregate]) -> Result<usize> {
            if self.fail {
                return Err(PipelineError::persistence("mirror", "database is locked"));
            }
            self.appended.lock().unwrap().push((table.to_string(), rows.len()));
            Ok(rows.len())
        }
    }

    fn day() -> DateKey {
        "2024-01-15".parse().unwrap()
    }

    fn normalized(store: &ArtifactStore, rates: &[(&str, f64)]) -> ArtifactRef {
        let now = Utc::now();
        let rows: Vec<NormalizedRecord> = rates
            .iter()
            .map(|(code, rate)| NormalizedRecord {
                date: day(),
                timestamp: now,
                base_currency: "USD".into(),
                target_currency: code.to_string(),
                exchange_rate: *rate,
                source: "test".into(),
                ingestion_timestamp: None,
                api_last_update: None,
                inverse_rate: 1.0 / rate,
                currency_category: categorize(code),
                processing_timestamp: now,
            })
            .collect();
        store.write_ndjson(Tier::Normalized, day(), &rows).unwrap()
    }

    #[tokio::test]
    async fn writes_aggregate_artifact_and_mirrors_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(DataPaths::under(tmp.path()));
        let sink = Arc::new(RecordingSink::default());
        let loader = Loader::new(
            store.clone(),
            Some(Mirror { sink: sink.clone(), table: "rates".into() }),
        );

        let input = normalized(&store, &[("EUR", 0.9), ("BRL", 5.0)]);
        let outcome = loader.aggregate(&input, day()).await.unwrap();

        assert_eq!(outcome.rows, 2);
        assert!(outcome.mirror_error.is_none());
        let rows: Vec<CurrencyAggregate> = store.read_ndjson(&outcome.artifact).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(sink.appended.lock().unwrap().as_slice(), [("rates".to_string(), 2)]);
    }

    #[tokio::test]
    async fn mirror_failure_does_not_fail_the_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(DataPaths::under(tmp.path()));
        let sink = Arc::new(RecordingSink { fail: true, ..Default::default() });
        let loader = Loader::new(store.clone(), Some(Mirror { sink, table: "rates".into() }));

        let input = normalized(&store, &[("EUR", 0.9)]);
        let outcome = loader.aggregate(&input, day()).await.unwrap();
        assert!(outcome.mirror_error.unwrap().contains("database is locked"));
        assert!(outcome.artifact.path.is_file());
    }

    #[tokio::test]
    async fn empty_input_writes_empty_aggregate() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(DataPaths::under(tmp.path()));
        let loader = Loader::new(store.clone(), None);

        let input = normalized(&store, &[]);
        let outcome = loader.aggregate(&input, day()).await.unwrap();
        assert_eq!(outcome.rows, 0);
        let rows: Vec<CurrencyAggregate> = store.read_ndjson(&outcome.artifact).unwrap();
        assert!(rows.is_empty());
    }
}
