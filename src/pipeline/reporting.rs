// Narrative stage: aggregate statistics in, business report out

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

use crate::app::ports::{NarrativePort, NarrativeRequest};
use crate::config::Config;
use crate::constants::{DEFAULT_FOCUS_COUNT, NARRATIVE_REPORT_TYPE};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::aggregate::CurrencyAggregate;
use crate::pipeline::processing::narrative::{
    data_summary, explanation_prompt, focus_currencies, insights_prompt, NarrativeReport,
    ReportMetadata, EXPLANATION_SYSTEM_PROMPT, INSIGHTS_SYSTEM_PROMPT,
};
use crate::storage::ArtifactStore;
use crate::types::{ArtifactRef, DateKey, Tier};

/// Paths of the two narrative files written for a day
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeOutput {
    pub report_json: ArtifactRef,
    pub report_txt: PathBuf,
}

pub struct Narrator {
    config: Arc<Config>,
    port: Arc<dyn NarrativePort>,
    store: ArtifactStore,
}

impl Narrator {
    pub fn new(config: Arc<Config>, port: Arc<dyn NarrativePort>, store: ArtifactStore) -> Self {
        Self { config, port, store }
    }

    #[instrument(skip(self, aggregate), fields(stage = "narrate", date = %date))]
    pub async fn narrate(&self, aggregate: &ArtifactRef, date: DateKey) -> Result<NarrativeOutput> {
        let t0 = Instant::now();
        info!(status = "started", aggregate = %aggregate, "Pipeline stage started");

        let result = self.run(aggregate, date).await;
        let duration_ms = t0.elapsed().as_millis() as u64;
        match &result {
            Ok(output) => info!(
                status = "completed",
                duration_ms,
                report_path = %output.report_json.path.display(),
                "Pipeline stage completed"
            ),
            Err(e) => error!(status = "failed", duration_ms, error = %e, "Pipeline stage failed"),
        }
        result
    }

    async fn run(&self, aggregate: &ArtifactRef, date: DateKey) -> Result<NarrativeOutput> {
        let aggregates: Vec<CurrencyAggregate> = self.store.read_ndjson(aggregate)?;
        if aggregates.is_empty() {
            return Err(PipelineError::Validation(format!(
                "no aggregate data for {date}"
            )));
        }
        info!(records_count = aggregates.len(), "aggregate data loaded for narrative");

        let summary = data_summary(&aggregates, date);
        let business_insights = self
            .complete(INSIGHTS_SYSTEM_PROMPT, insights_prompt(&summary))
            .await?;

        // `llm.focus_currencies` replaces the most-volatile ranking when set
        let focus = focus_currencies(
            &aggregates,
            self.config.llm.focus_currencies.as_deref(),
            DEFAULT_FOCUS_COUNT,
        );
        let base = aggregates[0].base_currency.as_str();
        let currency_explanation = self
            .complete(EXPLANATION_SYSTEM_PROMPT, explanation_prompt(&focus, base))
            .await?;

        let now = Utc::now();
        let report = NarrativeReport {
            metadata: ReportMetadata {
                generation_date: now,
                model_used: self.config.llm.model.clone(),
                report_type: NARRATIVE_REPORT_TYPE.to_string(),
            },
            date,
            business_insights,
            currency_explanation,
            generation_timestamp: now,
        };

        let report_json = self.store.write_json(Tier::Narrative, date, &report)?;
        let report_txt = self.store.narrative_text_path(date);
        self.store.write_text(&report_txt, &report.to_text())?;
        info!(
            operation = "save_llm_insights",
            records_count = 2,
            file_path = %report_json.path.display(),
            "Data processing completed"
        );

        Ok(NarrativeOutput { report_json, report_txt })
    }

    async fn complete(&self, system: &str, prompt: String) -> Result<String> {
        let request = NarrativeRequest {
            system: system.to_string(),
            prompt,
            model: self.config.llm.model.clone(),
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
        };

        let t0 = Instant::now();
        let completion = match self.port.complete(&request).await {
            Ok(c) => c,
            Err(e) => {
                crate::metrics::narrative::completion_error();
                return Err(e);
            }
        };
        let elapsed = t0.elapsed();
        crate::metrics::narrative::completion(elapsed.as_secs_f64(), completion.tokens_used);
        info!(
            model = %request.model,
            prompt_length = request.prompt.len(),
            response_length = completion.text.len(),
            tokens_used = ?completion.tokens_used,
            response_time_ms = elapsed.as_millis() as u64,
            "LLM interaction"
        );
        Ok(completion.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::NarrativeCompletion;
    use crate::config::DataPaths;
    use crate::pipeline::processing::enrich::categorize;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedModel {
        requests: Mutex<Vec<NarrativeRequest>>,
    }

    #[async_trait]
    impl NarrativePort for ScriptedModel {
        async fn complete(&self, request: &NarrativeRequest) -> Result<NarrativeCompletion> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            Ok(NarrativeCompletion {
                text: format!("response {}", requests.len()),
                tokens_used: Some(42),
            })
        }
    }

    struct DownModel;

    #[async_trait]
    impl NarrativePort for DownModel {
        async fn complete(&self, _request: &NarrativeRequest) -> Result<NarrativeCompletion> {
            Err(PipelineError::Transport("connection refused".into()))
        }
    }

    fn day() -> DateKey {
        "2024-01-15".parse().unwrap()
    }

    fn setup(port: Arc<dyn NarrativePort>) -> (tempfile::TempDir, Narrator, ArtifactStore) {
        setup_with(port, None)
    }

    fn setup_with(
        port: Arc<dyn NarrativePort>,
        focus: Option<Vec<String>>,
    ) -> (tempfile::TempDir, Narrator, ArtifactStore) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_paths = DataPaths::under(tmp.path());
        config.llm.focus_currencies = focus;
        let store = ArtifactStore::new(config.data_paths.clone());
        (tmp, Narrator::new(Arc::new(config), port, store.clone()), store)
    }

    fn aggregates(store: &ArtifactStore, codes: &[&str]) -> ArtifactRef {
        let rows: Vec<CurrencyAggregate> = codes
            .iter()
            .enumerate()
            .map(|(i, code)| CurrencyAggregate {
                date: day(),
                base_currency: "USD".into(),
                target_currency: code.to_string(),
                latest_rate: 1.0 + i as f64,
                min_rate: 1.0 + i as f64,
                max_rate: 1.0 + i as f64,
                avg_rate: 1.0 + i as f64,
                std_rate: 0.0,
                volatility: 0.0,
                currency_category: categorize(code),
                observation_count: 1,
                processing_timestamp: Utc::now(),
            })
            .collect();
        store.write_ndjson(Tier::Aggregate, day(), &rows).unwrap()
    }

    #[tokio::test]
    async fn writes_json_report_and_text_companion() {
        let model = Arc::new(ScriptedModel::default());
        let (_tmp, narrator, store) = setup(model.clone());
        let input = aggregates(&store, &["EUR", "BRL"]);

        let output = narrator.narrate(&input, day()).await.unwrap();
        let report: NarrativeReport = store.read_json(&output.report_json).unwrap();
        assert_eq!(report.business_insights, "response 1");
        assert_eq!(report.currency_explanation, "response 2");
        assert_eq!(report.metadata.model_used, "gpt-4o-mini");
        assert_eq!(report.metadata.report_type, "currency_analysis");
        assert!(output.report_txt.ends_with("llm_report_2024-01-15.txt"));
        let text = std::fs::read_to_string(&output.report_txt).unwrap();
        assert!(text.contains("response 1"));

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].max_tokens, 1500);
        assert!((requests[0].temperature - 0.3).abs() < f32::EPSILON);
        assert!(requests[0].prompt.contains("EUR"));
    }

    #[tokio::test]
    async fn configured_focus_limits_the_explanation() {
        let model = Arc::new(ScriptedModel::default());
        let (_tmp, narrator, store) = setup_with(model.clone(), Some(vec!["BRL".into()]));
        let input = aggregates(&store, &["EUR", "BRL"]);

        narrator.narrate(&input, day()).await.unwrap();
        let requests = model.requests.lock().unwrap();
        assert!(requests[1].prompt.contains("BRL"));
        assert!(!requests[1].prompt.contains("EUR"));
    }

    #[tokio::test]
    async fn empty_aggregate_is_a_validation_error() {
        let model = Arc::new(ScriptedModel::default());
        let (_tmp, narrator, store) = setup(model.clone());
        let input = aggregates(&store, &[]);

        let err = narrator.narrate(&input, day()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(model.requests.lock().unwrap().is_empty());
        assert!(!store.exists(Tier::Narrative, day()));
    }

    #[tokio::test]
    async fn model_outage_fails_without_writing() {
        let (_tmp, narrator, store) = setup(Arc::new(DownModel));
        let input = aggregates(&store, &["EUR"]);

        let err = narrator.narrate(&input, day()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!store.exists(Tier::Narrative, day()));
    }
}
