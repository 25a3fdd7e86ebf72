use crate::error::{PipelineError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Calendar-date partition key for every artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn today() -> Self {
        Self(chrono::Local::now().date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn next_day(&self) -> Option<DateKey> {
        self.0.checked_add_signed(Duration::days(1)).map(DateKey)
    }

    /// Every calendar day from `start` to `end` inclusive, ascending.
    pub fn days_inclusive(start: DateKey, end: DateKey) -> Vec<DateKey> {
        let mut days = Vec::new();
        let mut current = Some(start);
        while let Some(day) = current {
            if day > end {
                break;
            }
            days.push(day);
            current = day.next_day();
        }
        days
    }
}

impl FromStr for DateKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        // NaiveDate accepts unpadded fields, so also require the canonical width.
        if trimmed.len() != 10 {
            return Err(PipelineError::Validation(format!(
                "invalid date '{s}', expected YYYY-MM-DD"
            )));
        }
        NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .map(DateKey)
            .map_err(|e| PipelineError::Validation(format!("invalid date '{s}': {e}")))
    }
}

impl TryFrom<String> for DateKey {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DateKey> for String {
    fn from(key: DateKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

/// Successive refinement tiers of the same daily data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Raw,
    Normalized,
    Aggregate,
    Narrative,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Raw, Tier::Normalized, Tier::Aggregate, Tier::Narrative];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Raw => "raw",
            Tier::Normalized => "normalized",
            Tier::Aggregate => "aggregate",
            Tier::Narrative => "narrative",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location descriptor handed from one stage to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub tier: Tier,
    pub date: DateKey,
    pub path: PathBuf,
}

impl ArtifactRef {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Stages of a single-day run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Transform,
    Aggregate,
    Narrate,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [Stage::Ingest, Stage::Transform, Stage::Aggregate, Stage::Narrate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Transform => "transform",
            Stage::Aggregate => "aggregate",
            Stage::Narrate => "narrate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_canonical_dates() {
        let key: DateKey = "2024-01-15".parse().unwrap();
        assert_eq!(key.to_string(), "2024-01-15");
        assert_eq!(key.date(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!("2024-1-5".parse::<DateKey>().is_err());
        assert!("2024-02-30".parse::<DateKey>().is_err());
        assert!("15/01/2024".parse::<DateKey>().is_err());
        assert!("".parse::<DateKey>().is_err());
    }

    #[test]
    fn inclusive_range_crosses_month_and_leap_day() {
        let start: DateKey = "2024-02-27".parse().unwrap();
        let end: DateKey = "2024-03-01".parse().unwrap();
        let days: Vec<String> = DateKey::days_inclusive(start, end)
            .iter()
            .map(|d| d.to_string())
            .collect();
        assert_eq!(days, vec!["2024-02-27", "2024-02-28", "2024-02-29", "2024-03-01"]);
    }

    #[test]
    fn single_day_and_inverted_ranges() {
        let day: DateKey = "2024-05-01".parse().unwrap();
        assert_eq!(DateKey::days_inclusive(day, day), vec![day]);
        let later: DateKey = "2024-05-02".parse().unwrap();
        assert!(DateKey::days_inclusive(later, day).is_empty());
    }

    #[test]
    fn serializes_as_plain_string() {
        let key: DateKey = "2024-01-15".parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"2024-01-15\"");
        let back: DateKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<DateKey>("\"not-a-date\"").is_err());
    }
}
