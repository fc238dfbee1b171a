use std::collections::{BTreeMap, HashSet};

use chartable_core::{ChartError, TemporalPoint};

use crate::extract::extract_points;
use crate::fetch::{ObservationQuery, RecordFetcher};

/// Full time series for the requested codes, each sorted by time.
///
/// Top-level and component values are both collected. Codes without data are
/// absent from the map.
pub fn fetch_timeseries<F>(
    fetcher: &F,
    patient_id: &str,
    codes: &[String],
    since: Option<&str>,
    until: Option<&str>,
) -> Result<BTreeMap<String, Vec<TemporalPoint>>, ChartError>
where
    F: RecordFetcher + ?Sized,
{
    let wanted: HashSet<String> = codes.iter().cloned().collect();
    let mut series: BTreeMap<String, Vec<TemporalPoint>> = BTreeMap::new();
    if wanted.is_empty() {
        return Ok(series);
    }

    let mut query_codes: Vec<String> = wanted.iter().cloned().collect();
    query_codes.sort();
    let query = ObservationQuery::for_patient(patient_id)
        .with_codes(query_codes)
        .with_bounds(since.map(str::to_string), until.map(str::to_string));

    for record in fetcher.fetch_records(&query, usize::MAX)? {
        for extracted in extract_points(&record, &wanted) {
            series.entry(extracted.code).or_default().push(extracted.point);
        }
    }
    for points in series.values_mut() {
        points.sort_by_key(|point| point.recorded_at);
    }
    Ok(series)
}
