// Ingestion stage: one provider call per day, validated before anything is persisted

use crate::app::ports::HttpClientPort;
use crate::config::Config;
use crate::constants::{LATEST_ENDPOINT, SOURCE_ID};
use crate::error::{PipelineError, Result};
use crate::storage::ArtifactStore;
use crate::types::{ArtifactRef, DateKey, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

/// Capture metadata stored next to the untouched provider payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureMetadata {
    pub ingestion_timestamp: DateTime<Utc>,
    pub source: String,
    pub base_currency: String,
    pub currencies_count: usize,
    pub payload_sha256: String,
}

/// Raw-tier artifact: the provider response exactly as received, plus capture metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub metadata: CaptureMetadata,
    pub raw_data: Value,
}

/// Checks the provider payload shape. Any violation rejects the whole snapshot.
pub fn validate_api_response(data: &Value) -> Result<()> {
    let obj = data.as_object().ok_or_else(|| {
        PipelineError::Validation("API response is not a JSON object".to_string())
    })?;

    for field in ["result", "base_code", "conversion_rates"] {
        if !obj.contains_key(field) {
            return Err(PipelineError::Validation(format!(
                "Required field missing from API response: {field}"
            )));
        }
    }

    if obj.get("result").and_then(Value::as_str) != Some("success") {
        let error_type = obj
            .get("error-type")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return Err(PipelineError::Validation(format!(
            "API returned error: {error_type}"
        )));
    }

    let rates = match obj.get("conversion_rates").and_then(Value::as_object) {
        Some(rates) if !rates.is_empty() => rates,
        _ => {
            return Err(PipelineError::Validation(
                "No exchange rates found in API response".to_string(),
            ))
        }
    };

    for (currency, rate) in rates {
        match rate.as_f64() {
            Some(r) if r.is_finite() && r > 0.0 => {}
            _ => {
                return Err(PipelineError::Validation(format!(
                    "Invalid rate for {currency}: {rate}"
                )))
            }
        }
    }

    Ok(())
}

pub struct Ingester {
    config: Arc<Config>,
    http: Arc<dyn HttpClientPort>,
    store: ArtifactStore,
}

impl Ingester {
    pub fn new(config: Arc<Config>, http: Arc<dyn HttpClientPort>, store: ArtifactStore) -> Self {
        Self { config, http, store }
    }

    /// Fetches the latest snapshot for the configured base currency.
    /// Returns the decoded payload together with the exact response bytes.
    pub async fn fetch_exchange_rates(&self) -> Result<(Value, Vec<u8>)> {
        let base = &self.config.currencies.base;
        let endpoint = format!("{LATEST_ENDPOINT}/{base}");
        let url = self.config.api_url(&endpoint)?;
        let log_url = self.config.redacted_api_url(&endpoint);

        info!(base_currency = %base, "fetching exchange rates");
        let t0 = Instant::now();
        let response = match self.http.get(&url).await {
            Ok(r) => r,
            Err(e) => {
                crate::metrics::ingest::request_error();
                error!(url = %log_url, error = %e, "provider request failed");
                return Err(e);
            }
        };
        let elapsed = t0.elapsed();
        info!(
            url = %log_url,
            method = "GET",
            status_code = response.status,
            response_time_ms = elapsed.as_millis() as u64,
            "API request completed"
        );

        if !response.is_success() {
            crate::metrics::ingest::request_error();
            return Err(PipelineError::Transport(format!(
                "provider returned HTTP {}",
                response.status
            )));
        }
        crate::metrics::ingest::request_success(elapsed.as_secs_f64(), response.bytes.len());

        let data: Value = serde_json::from_slice(&response.bytes).map_err(|e| {
            crate::metrics::ingest::validation_failed();
            PipelineError::Validation(format!("API response is not valid JSON: {e}"))
        })?;

        if let Err(e) = validate_api_response(&data) {
            crate::metrics::ingest::validation_failed();
            error!(error = %e, "API response failed validation");
            return Err(e);
        }

        let count = data["conversion_rates"].as_object().map_or(0, |m| m.len());
        info!(currencies_count = count, "exchange rates fetched");
        Ok((data, response.bytes))
    }

    /// Wraps a validated payload with capture metadata and writes the raw artifact,
    /// replacing any earlier snapshot for the same date.
    pub fn save_raw_data(&self, data: Value, payload: &[u8], date: DateKey) -> Result<ArtifactRef> {
        let currencies_count = data["conversion_rates"].as_object().map_or(0, |m| m.len());
        let snapshot = RawSnapshot {
            metadata: CaptureMetadata {
                ingestion_timestamp: Utc::now(),
                source: SOURCE_ID.to_string(),
                base_currency: data["base_code"].as_str().unwrap_or_default().to_string(),
                currencies_count,
                payload_sha256: hex::encode(Sha256::digest(payload)),
            },
            raw_data: data,
        };

        let artifact = self.store.write_json(Tier::Raw, date, &snapshot)?;
        crate::metrics::ingest::snapshot_written(currencies_count);
        info!(
            operation = "save_raw_data",
            records_count = currencies_count,
            file_path = %artifact.path.display(),
            "Data processing completed"
        );
        Ok(artifact)
    }

    #[instrument(skip(self), fields(stage = "ingest", date = %date))]
    pub async fn ingest(&self, date: DateKey) -> Result<ArtifactRef> {
        let t0 = Instant::now();
        info!(status = "started", "Pipeline stage started");

        let result = async {
            let (data, payload) = self.fetch_exchange_rates().await?;
            self.save_raw_data(data, &payload, date)
        }
        .await;

        let duration_ms = t0.elapsed().as_millis() as u64;
        match &result {
            Ok(artifact) => info!(
                status = "completed",
                duration_ms,
                file_path = %artifact.path.display(),
                "Pipeline stage completed"
            ),
            Err(e) => error!(status = "failed", duration_ms, error = %e, "Pipeline stage failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::HttpGetResult;
    use crate::config::DataPaths;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedHttp {
        status: u16,
        body: Vec<u8>,
        urls: Mutex<Vec<String>>,
    }

    impl CannedHttp {
        fn json(body: Value) -> Self {
            Self::raw(200, serde_json::to_vec(&body).unwrap())
        }

        fn raw(status: u16, body: Vec<u8>) -> Self {
            Self { status, body, urls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl HttpClientPort for CannedHttp {
        async fn get(&self, url: &str) -> Result<HttpGetResult> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(HttpGetResult {
                status: self.status,
                bytes: self.body.clone(),
                content_type: "application/json".to_string(),
            })
        }
    }

    fn setup(http: Arc<CannedHttp>) -> (tempfile::TempDir, Ingester, ArtifactStore) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_paths = DataPaths::under(tmp.path());
        config.credentials.exchange_rate_api_key = Some("test_key".to_string());
        let store = ArtifactStore::new(config.data_paths.clone());
        let ingester = Ingester::new(Arc::new(config), http, store.clone());
        (tmp, ingester, store)
    }

    fn day() -> DateKey {
        "2024-01-15".parse().unwrap()
    }

    fn good_payload() -> Value {
        json!({
            "result": "success",
            "base_code": "USD",
            "time_last_update_utc": "Mon, 15 Jan 2024 00:00:01 +0000",
            "conversion_rates": {"USD": 1, "EUR": 0.92, "BRL": 4.9}
        })
    }

    #[test]
    fn validation_accepts_well_formed_payload() {
        assert!(validate_api_response(&good_payload()).is_ok());
    }

    #[test]
    fn validation_rejects_shape_violations() {
        let cases = vec![
            json!([]),
            json!({"base_code": "USD", "conversion_rates": {"EUR": 1.0}}),
            json!({"result": "error", "error-type": "invalid-key", "base_code": "USD", "conversion_rates": {"EUR": 1.0}}),
            json!({"result": "success", "base_code": "USD", "conversion_rates": {}}),
            json!({"result": "success", "base_code": "USD", "conversion_rates": []}),
            json!({"result": "success", "base_code": "USD", "conversion_rates": {"EUR": -1}}),
            json!({"result": "success", "base_code": "USD", "conversion_rates": {"EUR": 0}}),
            json!({"result": "success", "base_code": "USD", "conversion_rates": {"EUR": "0.9"}}),
            json!({"result": "success", "base_code": "USD", "conversion_rates": {"EUR": null}}),
        ];
        for case in cases {
            let err = validate_api_response(&case).unwrap_err();
            assert!(matches!(err, PipelineError::Validation(_)), "case {case}");
        }
    }

    #[test]
    fn provider_error_type_is_reported() {
        let err = validate_api_response(&json!({
            "result": "error",
            "error-type": "quota-reached",
            "base_code": "USD",
            "conversion_rates": {"EUR": 1.0}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("quota-reached"));
    }

    #[tokio::test]
    async fn ingest_writes_one_raw_artifact_with_metadata() {
        let http = Arc::new(CannedHttp::json(good_payload()));
        let (_tmp, ingester, store) = setup(http.clone());

        let artifact = ingester.ingest(day()).await.unwrap();
        assert_eq!(artifact.tier, Tier::Raw);
        assert!(artifact.path.ends_with("exchange_rates_2024-01-15.json"));

        let snapshot: RawSnapshot = store.read_json(&artifact).unwrap();
        assert_eq!(snapshot.metadata.source, SOURCE_ID);
        assert_eq!(snapshot.metadata.base_currency, "USD");
        assert_eq!(snapshot.metadata.currencies_count, 3);
        assert_eq!(snapshot.metadata.payload_sha256.len(), 64);
        assert_eq!(snapshot.raw_data, good_payload());

        let urls = http.urls.lock().unwrap();
        assert_eq!(urls.as_slice(), ["https://v6.exchangerate-api.com/v6/test_key/latest/USD"]);
    }

    #[tokio::test]
    async fn reingesting_overwrites_the_same_file() {
        let http = Arc::new(CannedHttp::json(good_payload()));
        let (_tmp, ingester, store) = setup(http);

        let first = ingester.ingest(day()).await.unwrap();
        let first_meta: RawSnapshot = store.read_json(&first).unwrap();
        let second = ingester.ingest(day()).await.unwrap();
        let second_meta: RawSnapshot = store.read_json(&second).unwrap();

        assert_eq!(first.path, second.path);
        assert!(second_meta.metadata.ingestion_timestamp >= first_meta.metadata.ingestion_timestamp);
        let entries = std::fs::read_dir(store.tier_dir(Tier::Raw)).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn empty_rates_fail_without_writing() {
        let http = Arc::new(CannedHttp::json(json!({
            "result": "success",
            "base_code": "USD",
            "conversion_rates": {}
        })));
        let (_tmp, ingester, store) = setup(http);

        let err = ingester.ingest(day()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(!store.exists(Tier::Raw, day()));
    }

    #[tokio::test]
    async fn non_2xx_is_a_transport_error() {
        let http = Arc::new(CannedHttp::raw(503, b"unavailable".to_vec()));
        let (_tmp, ingester, store) = setup(http);

        let err = ingester.ingest(day()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!store.exists(Tier::Raw, day()));
    }

    #[tokio::test]
    async fn non_json_body_is_a_validation_error() {
        let http = Arc::new(CannedHttp::raw(200, b"<html>".to_vec()));
        let (_tmp, ingester, _store) = setup(http);

        let err = ingester.ingest(day()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let http = Arc::new(CannedHttp::json(good_payload()));
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_paths = DataPaths::under(tmp.path());
        let store = ArtifactStore::new(config.data_paths.clone());
        let ingester = Ingester::new(Arc::new(config), http.clone(), store);

        let err = ingester.ingest(day()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(http.urls.lock().unwrap().is_empty());
    }
}
