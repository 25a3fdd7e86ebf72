use crate::constants::DEFAULT_MIRROR_TABLE;
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

pub const API_KEY_ENV: &str = "EXCHANGE_RATE_API_KEY";
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DB_PATH_ENV: &str = "DB_PATH";

// On-disk shape. Every field is optional so older files keep loading;
// `normalize` resolves aliases and defaults exactly once.

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    api: Option<RawApi>,
    /// Legacy name of `[api]`
    exchange_rate_api: Option<RawApi>,
    currencies: Option<RawCurrencies>,
    data_paths: Option<RawDataPaths>,
    llm: Option<RawLlm>,
    logging: Option<RawLogging>,
    database: Option<RawDatabase>,
    pipeline: Option<RawPipeline>,
}

#[derive(Debug, Default, Deserialize)]
struct RawApi {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
    /// Legacy name of `timeout_seconds`
    timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCurrencies {
    base: Option<String>,
    targets: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDataPaths {
    bronze: Option<PathBuf>,
    /// Legacy name of `bronze`
    raw: Option<PathBuf>,
    silver: Option<PathBuf>,
    gold: Option<PathBuf>,
    reports: Option<PathBuf>,
    logs: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLlm {
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
    focus_currencies: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogging {
    level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDatabase {
    enabled: Option<bool>,
    path: Option<PathBuf>,
    table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPipeline {
    inter_day_pause_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CurrencyConfig {
    pub base: String,
    /// Allow-list of target currencies; empty keeps every pair
    pub targets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DataPaths {
    pub bronze: PathBuf,
    pub silver: PathBuf,
    pub gold: PathBuf,
    pub reports: PathBuf,
    pub logs: PathBuf,
}

impl DataPaths {
    /// Every data root with a stable label, in tier order
    pub fn labelled(&self) -> Vec<(&'static str, &Path)> {
        vec![
            ("bronze", self.bronze.as_path()),
            ("silver", self.silver.as_path()),
            ("gold", self.gold.as_path()),
            ("reports", self.reports.as_path()),
            ("logs", self.logs.as_path()),
        ]
    }

    /// All paths rebased under `root`; used by tests and sandboxed runs
    pub fn under(root: &Path) -> Self {
        Self {
            bronze: root.join("bronze"),
            silver: root.join("silver"),
            gold: root.join("gold"),
            reports: root.join("reports"),
            logs: root.join("logs"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub base_url: String,
    pub timeout: Duration,
    /// Currencies the explanation covers; `None` picks the most volatile ones
    pub focus_currencies: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub inter_day_pause: Duration,
}

#[derive(Clone, Default)]
pub struct Credentials {
    pub exchange_rate_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<missing>" };
        f.debug_struct("Credentials")
            .field("exchange_rate_api_key", &mask(&self.exchange_rate_api_key))
            .field("openai_api_key", &mask(&self.openai_api_key))
            .finish()
    }
}

/// Fully resolved configuration, built once and handed to every stage
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub currencies: CurrencyConfig,
    pub data_paths: DataPaths,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    /// `None` when the relational mirror is disabled
    pub database: Option<DatabaseConfig>,
    pub pipeline: PipelineSettings,
    pub credentials: Credentials,
    pub source_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        // An empty document normalizes to the built-in defaults
        normalize(RawConfig::default()).expect("built-in defaults are valid")
    }
}

impl Config {
    /// Load from `path` (or the default location), then apply `.env` and process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let content = fs::read_to_string(&config_path).map_err(|e| {
            PipelineError::Configuration(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.source_path = Some(config_path);
        config.apply_env();
        Ok(config)
    }

    /// Parse and normalize a TOML document without touching the environment
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        normalize(raw)
    }

    fn apply_env(&mut self) {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        self.credentials = Credentials {
            exchange_rate_api_key: non_empty(API_KEY_ENV),
            openai_api_key: non_empty(OPENAI_KEY_ENV),
        };
        if let (Some(db), Some(path)) = (self.database.as_mut(), non_empty(DB_PATH_ENV)) {
            db.path = PathBuf::from(path);
        }
    }

    /// Fails with every missing key listed in one message
    pub fn validate_api_keys(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.credentials.exchange_rate_api_key.is_none() {
            missing.push(format!("{API_KEY_ENV} not found"));
        }
        if self.credentials.openai_api_key.is_none() {
            missing.push(format!("{OPENAI_KEY_ENV} not found"));
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration(missing.join("; ")))
        }
    }

    /// Full provider URL for `endpoint`, e.g. `latest/USD`
    pub fn api_url(&self, endpoint: &str) -> Result<String> {
        let key = self
            .credentials
            .exchange_rate_api_key
            .as_deref()
            .ok_or_else(|| PipelineError::Configuration(format!("{API_KEY_ENV} not found")))?;
        Ok(format!("{}/{}/{}", self.api.base_url.trim_end_matches('/'), key, endpoint))
    }

    /// Same as `api_url` with the key masked, for logs
    pub fn redacted_api_url(&self, endpoint: &str) -> String {
        format!("{}/***/{}", self.api.base_url.trim_end_matches('/'), endpoint)
    }

    pub fn ensure_data_directories(&self) -> Result<()> {
        for (_, path) in self.data_paths.labelled() {
            fs::create_dir_all(path).map_err(|e| PipelineError::persistence(path, e))?;
        }
        Ok(())
    }
}

fn normalize(raw: RawConfig) -> Result<Config> {
    let api = raw.api.or(raw.exchange_rate_api).unwrap_or_default();
    let api_timeout = api.timeout_seconds.or(api.timeout).unwrap_or(30);
    if api_timeout == 0 {
        return Err(PipelineError::Configuration(
            "api.timeout_seconds must be greater than zero".to_string(),
        ));
    }

    let currencies = raw.currencies.unwrap_or_default();
    let base = currencies
        .base
        .map(|b| b.trim().to_uppercase())
        .unwrap_or_else(|| "USD".to_string());
    if base.is_empty() {
        return Err(PipelineError::Configuration(
            "currencies.base must not be empty".to_string(),
        ));
    }
    let mut targets: Vec<String> = Vec::new();
    for target in currencies.targets.unwrap_or_default() {
        let code = target.trim().to_uppercase();
        if !code.is_empty() && !targets.contains(&code) {
            targets.push(code);
        }
    }

    let paths = raw.data_paths.unwrap_or_default();
    let data_paths = DataPaths {
        bronze: paths
            .bronze
            .or(paths.raw)
            .unwrap_or_else(|| PathBuf::from("data/bronze")),
        silver: paths.silver.unwrap_or_else(|| PathBuf::from("data/silver")),
        gold: paths.gold.unwrap_or_else(|| PathBuf::from("data/gold")),
        reports: paths.reports.unwrap_or_else(|| PathBuf::from("data/reports")),
        logs: paths.logs.unwrap_or_else(|| PathBuf::from("logs")),
    };

    let llm = raw.llm.unwrap_or_default();
    let temperature = llm.temperature.unwrap_or(0.3);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(PipelineError::Configuration(format!(
            "llm.temperature must be within [0, 2], got {temperature}"
        )));
    }
    let llm_timeout = llm.timeout_seconds.unwrap_or(60);
    if llm_timeout == 0 {
        return Err(PipelineError::Configuration(
            "llm.timeout_seconds must be greater than zero".to_string(),
        ));
    }

    let mut focus: Vec<String> = Vec::new();
    for code in llm.focus_currencies.unwrap_or_default() {
        let code = code.trim().to_uppercase();
        if !code.is_empty() && !focus.contains(&code) {
            focus.push(code);
        }
    }

    let database = raw.database.unwrap_or_default();
    let database = if database.enabled.unwrap_or(false) {
        Some(DatabaseConfig {
            path: database
                .path
                .unwrap_or_else(|| PathBuf::from("data/warehouse.db")),
            table: database
                .table
                .unwrap_or_else(|| DEFAULT_MIRROR_TABLE.to_string()),
        })
    } else {
        None
    };

    Ok(Config {
        api: ApiConfig {
            base_url: api
                .base_url
                .unwrap_or_else(|| "https://v6.exchangerate-api.com/v6".to_string()),
            timeout: Duration::from_secs(api_timeout),
        },
        currencies: CurrencyConfig { base, targets },
        data_paths,
        llm: LlmConfig {
            model: llm.model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            max_tokens: llm.max_tokens.unwrap_or(1500),
            temperature,
            base_url: llm
                .base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout: Duration::from_secs(llm_timeout),
            focus_currencies: (!focus.is_empty()).then_some(focus),
        },
        logging: LoggingConfig {
            level: raw
                .logging
                .and_then(|l| l.level)
                .unwrap_or_else(|| "INFO".to_string()),
        },
        database,
        pipeline: PipelineSettings {
            inter_day_pause: Duration::from_millis(
                raw.pipeline.and_then(|p| p.inter_day_pause_ms).unwrap_or(1000),
            ),
        },
        credentials: Credentials::default(),
        source_path: None,
    })
}
