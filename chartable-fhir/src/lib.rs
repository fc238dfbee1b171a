//! FHIR Observation reading, fetching and per-patient chartability analysis.

use std::collections::{BTreeSet, HashSet};

use chartable_core::{classify_points, ChartabilityConfig, ChartableSeries};

mod bundle;
mod extract;
mod fetch;
mod http;
mod record;
mod screen;
mod series;

pub use bundle::BundleFetcher;
pub use extract::{extract_points, parse_timestamp, record_timestamp};
pub use fetch::{ObservationQuery, PageRequest, RecordFetcher, RecordPage, DEFAULT_PAGE_SIZE};
pub use http::{search_params, HttpFetcher, DEFAULT_BASE_URL};
pub use record::{
    bundle_resources, next_link, patient_id_from_reference, ClinicalRecord, CodedValue,
    Component, Quantity,
};
pub use screen::{identify_chartable_patients, screen_population, PatientChartables, ScreenResult};
pub use series::fetch_timeseries;

/// Chartable series across one patient's records.
///
/// Component values share the code keyspace with top-level values, so a
/// panel's systolic component and a standalone systolic record feed one series.
pub fn classify_records(
    records: &[ClinicalRecord],
    config: &ChartabilityConfig,
) -> Vec<ChartableSeries> {
    let every_code = HashSet::new();
    classify_points(
        records
            .iter()
            .flat_map(|record| extract_points(record, &every_code)),
        config,
    )
}

/// Distinct category tokens across a patient's records.
pub fn observation_categories(records: &[ClinicalRecord]) -> BTreeSet<String> {
    records
        .iter()
        .flat_map(|record| record.categories.iter().cloned())
        .collect()
}
