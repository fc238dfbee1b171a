//! The record-fetching seam between the analysis and a record store.

use chartable_core::ChartError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::record::{bundle_resources, next_link, ClinicalRecord};

pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Filters for an Observation search.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservationQuery {
    pub patient: Option<String>,
    #[serde(default)]
    pub codes: Vec<String>,
    pub category: Option<String>,
    /// Inclusive lower bound, ISO date or date-time.
    pub since: Option<String>,
    /// Inclusive upper bound, ISO date or date-time.
    pub until: Option<String>,
}

impl ObservationQuery {
    pub fn for_patient(patient_id: impl Into<String>) -> Self {
        Self {
            patient: Some(patient_id.into()),
            ..Self::default()
        }
    }

    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_bounds(mut self, since: Option<String>, until: Option<String>) -> Self {
        self.since = since;
        self.until = until;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PageRequest<'a> {
    /// First page of a new search.
    Search {
        query: &'a ObservationQuery,
        page_size: usize,
    },
    /// Continuation link returned by a previous page.
    Next(&'a str),
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<ClinicalRecord>,
    /// Ids of Patient resources included alongside the records.
    pub patients: Vec<String>,
    pub next: Option<String>,
}

impl RecordPage {
    pub fn from_bundle(bundle: &Value) -> Self {
        let mut page = RecordPage {
            next: next_link(bundle),
            ..RecordPage::default()
        };
        for resource in bundle_resources(bundle) {
            match resource.get("resourceType").and_then(Value::as_str) {
                Some("Observation") => page.records.extend(ClinicalRecord::from_resource(resource)),
                Some("Patient") => page.patients.extend(
                    resource
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                ),
                _ => {}
            }
        }
        page
    }
}

/// Source of Observation records, already resolved to resources.
///
/// Implementations report transport failures as errors; an empty result is
/// an empty page, never an error.
pub trait RecordFetcher {
    fn fetch_page(&self, request: PageRequest<'_>) -> Result<RecordPage, ChartError>;

    /// Candidate patients, optionally only those with a record in `category`.
    fn fetch_population_ids(
        &self,
        category: Option<&str>,
        page_cap: usize,
    ) -> Result<Vec<String>, ChartError>;

    /// Follow continuation links until the search is exhausted or
    /// `max_count` records have been collected.
    fn fetch_records(
        &self,
        query: &ObservationQuery,
        max_count: usize,
    ) -> Result<Vec<ClinicalRecord>, ChartError> {
        let mut records = Vec::new();
        if max_count == 0 {
            return Ok(records);
        }

        let mut page = self.fetch_page(PageRequest::Search {
            query,
            page_size: DEFAULT_PAGE_SIZE.min(max_count),
        })?;
        loop {
            records.extend(page.records);
            if records.len() >= max_count {
                records.truncate(max_count);
                break;
            }
            let Some(next) = page.next else {
                break;
            };
            debug!(collected = records.len(), "following next link");
            page = self.fetch_page(PageRequest::Next(&next))?;
        }
        Ok(records)
    }
}
