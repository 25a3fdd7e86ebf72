use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::ports::{HttpClientPort, MirrorSinkPort, NarrativePort};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::infra::http_client::ReqwestHttp;
use crate::infra::openai_client::OpenAiClient;
use crate::infra::sqlite_sink::SqliteMirrorSink;
use crate::pipeline::ingestion::Ingester;
use crate::pipeline::loading::{Loader, Mirror};
use crate::pipeline::processing::quality_gate::QualityReport;
use crate::pipeline::processing::Transformer;
use crate::pipeline::reporting::{NarrativeOutput, Narrator};
use crate::storage::ArtifactStore;
use crate::types::{ArtifactRef, DateKey, Stage};

/// Outcome of one single-day run. Never persisted.
#[derive(Debug, Clone)]
pub enum PipelineRunResult {
    Completed {
        date: DateKey,
        run_id: Uuid,
        raw: ArtifactRef,
        normalized: ArtifactRef,
        aggregate: ArtifactRef,
        narrative: NarrativeOutput,
        quality: QualityReport,
        /// Mirror append failure, if any; the run still counts as successful
        mirror_error: Option<String>,
        elapsed: Duration,
    },
    Failed {
        date: DateKey,
        run_id: Uuid,
        stage: Stage,
        error: PipelineError,
        elapsed: Duration,
    },
}

impl PipelineRunResult {
    pub fn date(&self) -> DateKey {
        match self {
            Self::Completed { date, .. } | Self::Failed { date, .. } => *date,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Completed { elapsed, .. } | Self::Failed { elapsed, .. } => *elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateFailure {
    pub date: DateKey,
    pub stage: Stage,
    pub error: PipelineError,
}

#[derive(Debug, Clone)]
pub struct RangeRunResult {
    pub processed_dates: Vec<DateKey>,
    pub errors: Vec<DateFailure>,
    /// Wall time including inter-day pauses
    pub total_elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub pipeline_ready: bool,
    pub config_loaded: bool,
    pub components_initialized: bool,
    pub api_keys_present: bool,
    pub missing_keys: Option<String>,
    /// Label → directory exists
    pub data_paths: BTreeMap<String, bool>,
}

pub struct Pipeline {
    config: Arc<Config>,
    store: ArtifactStore,
    ingester: Ingester,
    transformer: Transformer,
    loader: Loader,
    narrator: Narrator,
}

impl Pipeline {
    /// Wires the production adapters from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let http: Arc<dyn HttpClientPort> = Arc::new(ReqwestHttp::new(config.api.timeout)?);
        let narrator: Arc<dyn NarrativePort> = Arc::new(OpenAiClient::new(
            config.llm.base_url.clone(),
            config.credentials.openai_api_key.clone().unwrap_or_default(),
            config.llm.timeout,
        )?);
        let mirror: Option<Arc<dyn MirrorSinkPort>> = config
            .database
            .as_ref()
            .map(|db| Arc::new(SqliteMirrorSink::new(db.path.clone())) as Arc<dyn MirrorSinkPort>);
        Ok(Self::from_parts(config, http, narrator, mirror))
    }

    /// Wires the pipeline around caller-supplied adapters
    pub fn from_parts(
        config: Config,
        http: Arc<dyn HttpClientPort>,
        narrator: Arc<dyn NarrativePort>,
        mirror: Option<Arc<dyn MirrorSinkPort>>,
    ) -> Self {
        let config = Arc::new(config);
        let store = ArtifactStore::new(config.data_paths.clone());
        let mirror = match (mirror, config.database.as_ref()) {
            (Some(sink), Some(db)) => Some(Mirror { sink, table: db.table.clone() }),
            _ => None,
        };

        Self {
            ingester: Ingester::new(config.clone(), http, store.clone()),
            transformer: Transformer::new(config.clone(), store.clone()),
            loader: Loader::new(store.clone(), mirror),
            narrator: Narrator::new(config.clone(), narrator, store.clone()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Fails when credentials are missing or data directories cannot be created
    pub fn ensure_ready(&self) -> Result<()> {
        self.config.validate_api_keys()?;
        self.config.ensure_data_directories()
    }

    pub fn status(&self) -> PipelineStatus {
        let keys = self.config.validate_api_keys();
        let data_paths = self
            .config
            .data_paths
            .labelled()
            .into_iter()
            .map(|(label, path)| (label.to_string(), path.is_dir()))
            .collect();
        PipelineStatus {
            pipeline_ready: keys.is_ok(),
            config_loaded: true,
            components_initialized: true,
            api_keys_present: keys.is_ok(),
            missing_keys: keys.err().map(|e| e.to_string()),
            data_paths,
        }
    }

    /// Runs every stage for `date` in order; the first failure stops the run.
    /// Artifacts from stages that completed before the failure are left in place.
    pub async fn run_daily(&self, date: DateKey) -> PipelineRunResult {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", run_id = %run_id, date = %date);
        self.run_daily_inner(date, run_id).instrument(span).await
    }

    async fn run_daily_inner(&self, date: DateKey, run_id: Uuid) -> PipelineRunResult {
        let t0 = Instant::now();
        info!("daily pipeline started");

        let failed = |stage: Stage, error: PipelineError| {
            let elapsed = t0.elapsed();
            crate::metrics::pipeline::run_failed(stage.as_str());
            error!(stage = %stage, error = %error, elapsed_ms = elapsed.as_millis() as u64, "daily pipeline failed");
            PipelineRunResult::Failed { date, run_id, stage, error, elapsed }
        };

        let raw = match self.ingester.ingest(date).await {
            Ok(r) => r,
            Err(e) => return failed(Stage::Ingest, e),
        };
        let (normalized, quality) = match self.transformer.transform(&raw, date) {
            Ok(r) => r,
            Err(e) => return failed(Stage::Transform, e),
        };
        let load = match self.loader.aggregate(&normalized, date).await {
            Ok(r) => r,
            Err(e) => return failed(Stage::Aggregate, e),
        };
        let narrative = match self.narrator.narrate(&load.artifact, date).await {
            Ok(r) => r,
            Err(e) => return failed(Stage::Narrate, e),
        };

        let elapsed = t0.elapsed();
        crate::metrics::pipeline::run_completed(elapsed.as_secs_f64());
        info!(elapsed_ms = elapsed.as_millis() as u64, "daily pipeline completed");

        PipelineRunResult::Completed {
            date,
            run_id,
            raw,
            normalized,
            aggregate: load.artifact,
            narrative,
            quality,
            mirror_error: load.mirror_error,
            elapsed,
        }
    }

    /// Runs every calendar day from `start` to `end` inclusive.
    ///
    /// Only an unparseable or inverted range is an error; per-day failures are
    /// collected and the loop moves on.
    pub async fn run_range(&self, start: &str, end: &str) -> Result<RangeRunResult> {
        let t0 = Instant::now();
        let start_key: DateKey = start.parse()?;
        let end_key: DateKey = end.parse()?;
        if start_key > end_key {
            return Err(PipelineError::Validation(format!(
                "start date {start_key} is after end date {end_key}"
            )));
        }

        let days = DateKey::days_inclusive(start_key, end_key);
        info!(start = %start_key, end = %end_key, days = days.len(), "historical pipeline started");

        let pause = self.config.pipeline.inter_day_pause;
        let mut processed_dates = Vec::with_capacity(days.len());
        let mut errors = Vec::new();

        for (i, day) in days.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            match self.run_daily(*day).await {
                PipelineRunResult::Completed { .. } => processed_dates.push(*day),
                PipelineRunResult::Failed { stage, error, .. } => {
                    warn!(date = %day, stage = %stage, error = %error, "day failed, continuing");
                    errors.push(DateFailure { date: *day, stage, error });
                }
            }
        }

        let total_elapsed = t0.elapsed();
        info!(
            processed = processed_dates.len(),
            failed = errors.len(),
            total_ms = total_elapsed.as_millis() as u64,
            "historical pipeline completed"
        );
        Ok(RangeRunResult { processed_dates, errors, total_elapsed })
    }
}
