use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{fallback_label, ChartabilityConfig, ChartableSeries, ExtractedPoint, FrequencyCounter};

/// Whole days between two instants, truncated toward zero.
pub fn span_days(first: DateTime<Utc>, last: DateTime<Utc>) -> i64 {
    last.signed_duration_since(first).num_days()
}

#[derive(Default)]
struct SeriesAccumulator {
    times: Vec<DateTime<Utc>>,
    labels: FrequencyCounter<String>,
    units: FrequencyCounter<String>,
}

impl SeriesAccumulator {
    fn push(&mut self, point: ExtractedPoint) {
        if let Some(display) = point.display.filter(|text| !text.trim().is_empty()) {
            self.labels.add(display);
        }
        if !point.point.unit.is_empty() {
            self.units.add(point.point.unit);
        }
        self.times.push(point.point.recorded_at);
    }

    fn finish(mut self, code: String, config: &ChartabilityConfig) -> Option<ChartableSeries> {
        let count = self.times.len();
        if count < config.min_points || count == 0 {
            return None;
        }

        self.times.sort();
        let span = span_days(self.times[0], self.times[count - 1]);
        if span < config.min_span_days {
            return None;
        }

        let label = self
            .labels
            .top()
            .cloned()
            .unwrap_or_else(|| fallback_label(&code));
        let units = self
            .units
            .most_common()
            .into_iter()
            .map(|(unit, _)| unit.clone())
            .collect();

        Some(ChartableSeries {
            code,
            label,
            units,
            count,
            span_days: span,
        })
    }
}

/// Aggregate points per code and keep the codes that meet both thresholds.
///
/// Output is ordered by point count, descending, then by code.
pub fn classify_points<I>(points: I, config: &ChartabilityConfig) -> Vec<ChartableSeries>
where
    I: IntoIterator<Item = ExtractedPoint>,
{
    let mut by_code: HashMap<String, SeriesAccumulator> = HashMap::new();
    for point in points {
        by_code.entry(point.code.clone()).or_default().push(point);
    }

    let mut chartable: Vec<ChartableSeries> = by_code
        .into_iter()
        .filter_map(|(code, acc)| acc.finish(code, config))
        .collect();
    chartable.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));
    chartable
}
