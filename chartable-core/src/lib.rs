//! Core model and decision logic for finding chartable clinical series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod classify;
mod frequency;
mod grouping;

pub use classify::{classify_points, span_days};
pub use frequency::FrequencyCounter;
pub use grouping::{group_chartables, title_for_code, BLOOD_PRESSURE_TITLE, DIASTOLIC, SYSTOLIC};

/// Thresholds for the per-patient classifier and grouper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChartabilityConfig {
    /// Minimum number of qualifying points for a code.
    pub min_points: usize,
    /// Minimum whole days between the first and last point.
    pub min_span_days: i64,
    /// Whether patient-reported survey scores get their own panel titles.
    pub include_surveys: bool,
}

impl Default for ChartabilityConfig {
    fn default() -> Self {
        Self {
            min_points: 5,
            min_span_days: 7,
            include_surveys: false,
        }
    }
}

/// Caps for the count-only population pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreeningConfig {
    /// Maximum number of records to scan; the current page is always finished.
    pub sample: usize,
    /// Minimum record count for a patient to qualify.
    pub min_points: usize,
    /// Maximum qualifying patient ids returned, in scan order.
    pub max_qualified: usize,
    /// Highest-count patients handed to the full classifier.
    pub max_candidates: usize,
    /// Per-patient record cap for the full classifier pass.
    pub patient_record_cap: usize,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            sample: 2000,
            min_points: 5,
            max_qualified: 200,
            max_candidates: 100,
            patient_record_cap: 2000,
        }
    }
}

/// A single numeric reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporalPoint {
    pub recorded_at: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
}

/// A reading tagged with the code and display text it was found under.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPoint {
    pub code: String,
    pub display: Option<String>,
    pub point: TemporalPoint,
}

/// A code with enough repeated, time-spread readings to plot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChartableSeries {
    pub code: String,
    pub label: String,
    /// Distinct units, most frequent first.
    pub units: Vec<String>,
    pub count: usize,
    pub span_days: i64,
}

impl ChartableSeries {
    pub fn primary_unit(&self) -> Option<&str> {
        self.units.first().map(String::as_str)
    }
}

/// One chart: a title and the series drawn on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChartGroup {
    pub title: String,
    pub series: Vec<ChartableSeries>,
}

impl ChartGroup {
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|series| series.code.as_str())
    }
}

/// Label used when no record carried display text for a code.
pub fn fallback_label(code: &str) -> String {
    format!("LOINC {code}")
}

/// Errors surfaced by fetching and rendering. Malformed records are skipped, never reported.
#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("FHIR server returned status {status} for {url}")]
    Transport { status: u16, url: String },
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("Could not read FHIR payload: {0}")]
    Parse(String),
    #[error("Could not draw chart: {0}")]
    Render(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChartError {
    /// True when the record server could not be reached or answered with a failure status.
    pub fn is_transport(&self) -> bool {
        matches!(self, ChartError::Transport { .. } | ChartError::Request { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let chart = ChartabilityConfig::default();
        assert_eq!(chart.min_points, 5);
        assert_eq!(chart.min_span_days, 7);
        assert!(!chart.include_surveys);

        let screen = ScreeningConfig::default();
        assert_eq!(screen.min_points, chart.min_points);
        assert_eq!(screen.max_qualified, 200);
        assert_eq!(screen.max_candidates, 100);
    }

    #[test]
    fn transport_errors_are_distinguishable() {
        let err = ChartError::Transport {
            status: 503,
            url: "http://fhir/Observation".to_string(),
        };
        assert!(err.is_transport());
        assert!(!ChartError::Parse("bad".to_string()).is_transport());
    }

    #[test]
    fn config_reads_from_json() {
        let value = serde_json::json!({
            "min_points": 3,
            "min_span_days": 30,
            "include_surveys": true
        });
        let config: ChartabilityConfig = serde_json::from_value(value).expect("config");
        assert_eq!(config.min_points, 3);
        assert!(config.include_surveys);
    }
}
