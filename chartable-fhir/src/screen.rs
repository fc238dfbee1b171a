//! Count-only population screening and the per-patient follow-up pass.

use chartable_core::{
    ChartError, ChartabilityConfig, ChartableSeries, FrequencyCounter, ScreeningConfig,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify_records;
use crate::fetch::{ObservationQuery, PageRequest, RecordFetcher, DEFAULT_PAGE_SIZE};

#[derive(Debug, Clone, Default)]
pub struct ScreenResult {
    /// Patients meeting the count threshold, in scan order, capped.
    pub qualified: Vec<String>,
    /// Records per patient, in first-seen order.
    pub counts: FrequencyCounter<String>,
    /// Records examined, including whole pages past the sample cap.
    pub scanned: usize,
    /// True when scanning stopped at the sample cap with pages left.
    pub truncated: bool,
}

impl ScreenResult {
    /// The `n` highest-count patients; ties keep first-seen order.
    pub fn top_candidates(&self, n: usize) -> Vec<(&str, usize)> {
        self.counts
            .most_common()
            .into_iter()
            .take(n)
            .map(|(id, count)| (id.as_str(), count))
            .collect()
    }
}

/// Count records per patient across a population search.
///
/// No values or timestamps are parsed. Scanning stops once `sample` records
/// have been seen; the page in hand is always counted in full.
pub fn screen_population<F>(
    fetcher: &F,
    query: &ObservationQuery,
    config: &ScreeningConfig,
) -> Result<ScreenResult, ChartError>
where
    F: RecordFetcher + ?Sized,
{
    let mut result = ScreenResult::default();
    let mut page = fetcher.fetch_page(PageRequest::Search {
        query,
        page_size: DEFAULT_PAGE_SIZE,
    })?;

    loop {
        for record in &page.records {
            if let Some(patient) = &record.subject_id {
                result.counts.add(patient.clone());
            }
        }
        result.scanned += page.records.len();
        debug!(scanned = result.scanned, "screened page");

        let Some(next) = page.next.take() else {
            break;
        };
        if result.scanned >= config.sample {
            warn!(
                scanned = result.scanned,
                sample = config.sample,
                "sample cap reached, remaining pages not fetched"
            );
            result.truncated = true;
            break;
        }
        page = fetcher.fetch_page(PageRequest::Next(&next))?;
    }

    result.qualified = result
        .counts
        .iter()
        .filter(|(_, count)| *count >= config.min_points)
        .map(|(patient, _)| patient.clone())
        .take(config.max_qualified)
        .collect();

    info!(
        scanned = result.scanned,
        patients = result.counts.len(),
        qualified = result.qualified.len(),
        "population screened"
    );
    Ok(result)
}

/// A patient with at least one chartable series.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatientChartables {
    pub patient_id: String,
    pub record_count: usize,
    pub series: Vec<ChartableSeries>,
}

/// Screen the population, then run the full classifier over the
/// highest-count candidates. Results follow the screener's ranking.
pub fn identify_chartable_patients<F>(
    fetcher: &F,
    query: &ObservationQuery,
    screening: &ScreeningConfig,
    chartability: &ChartabilityConfig,
) -> Result<Vec<PatientChartables>, ChartError>
where
    F: RecordFetcher + ?Sized,
{
    let screen = screen_population(fetcher, query, screening)?;
    let mut chartable = Vec::new();

    for (patient_id, record_count) in screen.top_candidates(screening.max_candidates) {
        let patient_query = ObservationQuery {
            patient: Some(patient_id.to_string()),
            ..query.clone()
        };
        let records = fetcher.fetch_records(&patient_query, screening.patient_record_cap)?;
        let series = classify_records(&records, chartability);
        if series.is_empty() {
            debug!(patient_id, "no chartable series");
            continue;
        }
        chartable.push(PatientChartables {
            patient_id: patient_id.to_string(),
            record_count,
            series,
        });
    }

    info!(patients = chartable.len(), "chartable patients identified");
    Ok(chartable)
}
