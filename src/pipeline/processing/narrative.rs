//! Prompt construction and report shaping for the narrative tier.
//!
//! Everything here is pure; the model call itself lives behind `NarrativePort`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::pipeline::processing::aggregate::CurrencyAggregate;
use crate::types::DateKey;

pub const INSIGHTS_SYSTEM_PROMPT: &str = "You are a financial analyst specialised in foreign exchange \
who gives clear insights to business executives.";

pub const EXPLANATION_SYSTEM_PROMPT: &str = "You are a financial advisor who explains currency \
exchange in a simple and practical way.";

/// Aggregates sorted by descending volatility; ties keep code order
pub fn by_volatility(aggregates: &[CurrencyAggregate]) -> Vec<&CurrencyAggregate> {
    let mut sorted: Vec<&CurrencyAggregate> = aggregates.iter().collect();
    sorted.sort_by(|a, b| {
        b.volatility
            .partial_cmp(&a.volatility)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.target_currency.cmp(&b.target_currency))
    });
    sorted
}

/// Plain-text data summary fed to the insights prompt
pub fn data_summary(aggregates: &[CurrencyAggregate], date: DateKey) -> String {
    let base = aggregates
        .first()
        .map(|a| a.base_currency.as_str())
        .unwrap_or_default();

    let mut out = String::new();
    let _ = writeln!(out, "EXCHANGE RATE REPORT - {date}");
    let _ = writeln!(out);
    let _ = writeln!(out, "Base currency: {base}");
    let _ = writeln!(out, "Currencies analysed: {}", aggregates.len());
    let _ = writeln!(out);
    let _ = writeln!(out, "DETAIL BY CURRENCY:");
    for agg in by_volatility(aggregates) {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} ({}):",
            agg.target_currency,
            agg.currency_category.as_str().to_uppercase()
        );
        let _ = writeln!(out, "- Current rate: {:.4}", agg.latest_rate);
        let _ = writeln!(out, "- Range: {:.4} - {:.4}", agg.min_rate, agg.max_rate);
        let _ = writeln!(out, "- Average rate: {:.4}", agg.avg_rate);
        let _ = writeln!(out, "- Volatility: {:.2}%", agg.volatility * 100.0);
    }
    out.trim_end().to_string()
}

pub fn insights_prompt(summary: &str) -> String {
    format!(
        "Analyse the exchange rate data below and give executive insights in plain language \
for business users.

{summary}

Please include:

1. EXECUTIVE SUMMARY: one paragraph on the overall state of the currency market today.

2. KEY HIGHLIGHTS:
   - Most volatile currencies and what that means
   - Most stable currencies
   - Opportunities or risks identified

3. ANALYSIS BY CATEGORY:
   - Developed (major) currencies: how they are behaving
   - Emerging currencies: observed trends

4. PRACTICAL RECOMMENDATIONS:
   - For companies that import or export
   - For investors
   - Points to watch over the coming days

Use clear language and avoid technical jargon. Focus on actionable insights for business decisions."
    )
}

/// Currencies the explanation covers: the explicit focus list when given,
/// otherwise the `count` most volatile.
pub fn focus_currencies<'a>(
    aggregates: &'a [CurrencyAggregate],
    focus: Option<&[String]>,
    count: usize,
) -> Vec<&'a CurrencyAggregate> {
    match focus {
        Some(codes) => aggregates
            .iter()
            .filter(|a| codes.iter().any(|c| c == &a.target_currency))
            .collect(),
        None => by_volatility(aggregates).into_iter().take(count).collect(),
    }
}

pub fn explanation_prompt(focus: &[&CurrencyAggregate], base_currency: &str) -> String {
    let mut details = String::new();
    for agg in focus {
        let _ = writeln!(
            details,
            "{}: current rate {:.4}, volatility {:.2}%",
            agg.target_currency,
            agg.latest_rate,
            agg.volatility * 100.0
        );
    }
    format!(
        "Explain in simple terms how the following currencies stand against {base_currency} today:

{details}
For each currency, explain:
- Whether the current rate is high or low
- What the volatility means in practice
- The impact for anyone who needs to buy or sell that currency

Use accessible language, as if explaining to someone who is not a currency specialist."
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportMetadata {
    pub generation_date: DateTime<Utc>,
    pub model_used: String,
    pub report_type: String,
}

/// Narrative-tier artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NarrativeReport {
    pub metadata: ReportMetadata,
    pub date: DateKey,
    pub business_insights: String,
    pub currency_explanation: String,
    pub generation_timestamp: DateTime<Utc>,
}

impl NarrativeReport {
    /// Human-readable companion rendering
    pub fn to_text(&self) -> String {
        let rule = "=".repeat(60);
        format!(
            "CURRENCY ANALYSIS REPORT - {date} (generated {generated})
{rule}

BUSINESS INSIGHTS:
{insights}

{rule}

CURRENCY EXPLANATION:
{explanation}

{rule}
Report generated automatically by the exchange rate pipeline
Model used: {model}
",
            date = self.date,
            generated = self.generation_timestamp.format("%Y-%m-%d %H:%M UTC"),
            insights = self.business_insights,
            explanation = self.currency_explanation,
            model = self.metadata.model_used,
        )
    }
}
