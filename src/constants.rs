/// Identifier recorded as the source of every raw snapshot and normalized record
pub const SOURCE_ID: &str = "exchangerate-api.com";

/// Provider endpoint for the latest snapshot of a base currency
pub const LATEST_ENDPOINT: &str = "latest";

/// Plausible exchange-rate band; anything outside is treated as a provider glitch
pub const MIN_PLAUSIBLE_RATE: f64 = 0.0001;
pub const MAX_PLAUSIBLE_RATE: f64 = 1_000_000.0;

/// Artifact file naming
pub const RAW_FILE_PREFIX: &str = "exchange_rates_";
pub const NORMALIZED_FILE_PREFIX: &str = "exchange_rates_silver_";
pub const AGGREGATE_FILE_PREFIX: &str = "exchange_rates_gold_";
pub const NARRATIVE_FILE_PREFIX: &str = "llm_insights_";
pub const NARRATIVE_TEXT_PREFIX: &str = "llm_report_";

/// Report type stamped into narrative metadata
pub const NARRATIVE_REPORT_TYPE: &str = "currency_analysis";

/// Number of currencies the per-currency explanation focuses on by default
pub const DEFAULT_FOCUS_COUNT: usize = 5;

/// Default mirror table name
pub const DEFAULT_MIRROR_TABLE: &str = "exchange_rates_gold";

/// Developed-market currencies classified as `major`
pub const MAJOR_CURRENCIES: &[&str] = &["USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD"];

/// Currencies classified as `emerging`
pub const EMERGING_CURRENCIES: &[&str] = &["BRL", "MXN", "ARS", "CNY"];
