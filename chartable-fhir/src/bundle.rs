//! In-memory fetcher over FHIR Bundle documents, for offline runs and tests.

use std::fs;
use std::path::Path;

use chartable_core::ChartError;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::debug;

use crate::extract::{parse_timestamp, record_timestamp};
use crate::fetch::{ObservationQuery, PageRequest, RecordFetcher, RecordPage};
use crate::record::{bundle_resources, patient_id_from_reference, ClinicalRecord};

const NEXT_PREFIX: &str = "bundle:next:";

#[derive(Debug, Clone, Default)]
pub struct BundleFetcher {
    records: Vec<ClinicalRecord>,
    patients: Vec<String>,
    max_page_size: Option<usize>,
}

impl BundleFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve pages of at most `size` records regardless of the requested size.
    pub fn with_max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = Some(size.max(1));
        self
    }

    pub fn from_json_str(document: &str) -> Result<Self, ChartError> {
        let mut fetcher = Self::new();
        fetcher.add_json_str(document)?;
        Ok(fetcher)
    }

    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ChartError> {
        let mut fetcher = Self::new();
        for path in paths {
            let text = fs::read_to_string(path)?;
            fetcher
                .add_json_str(&text)
                .map_err(|err| ChartError::Parse(format!("{}: {err}", path.as_ref().display())))?;
        }
        Ok(fetcher)
    }

    pub fn add_json_str(&mut self, document: &str) -> Result<(), ChartError> {
        let value: Value =
            serde_json::from_str(document).map_err(|err| ChartError::Parse(err.to_string()))?;
        self.add_document(&value);
        Ok(())
    }

    /// Add every Observation and Patient carried by a Bundle or bare resource.
    pub fn add_document(&mut self, document: &Value) {
        for resource in bundle_resources(document) {
            match resource.get("resourceType").and_then(Value::as_str) {
                Some("Observation") => self.records.extend(ClinicalRecord::from_resource(resource)),
                Some("Patient") => {
                    if let Some(id) = resource.get("id").and_then(Value::as_str) {
                        if !self.patients.iter().any(|known| known == id) {
                            self.patients.push(id.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn page(
        &self,
        query: &ObservationQuery,
        offset: usize,
        page_size: usize,
    ) -> Result<RecordPage, ChartError> {
        let page_size = self
            .max_page_size
            .map_or(page_size, |cap| page_size.min(cap))
            .max(1);
        let bounds = Bounds::parse(query)?;

        let matching: Vec<&ClinicalRecord> = self
            .records
            .iter()
            .filter(|record| matches(record, query, &bounds))
            .collect();

        let end = (offset + page_size).min(matching.len());
        let records: Vec<ClinicalRecord> = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|record| (*record).clone())
            .collect();

        let next = if end < matching.len() {
            let encoded =
                serde_json::to_string(query).map_err(|err| ChartError::Parse(err.to_string()))?;
            Some(format!("{NEXT_PREFIX}{end}:{page_size}:{encoded}"))
        } else {
            None
        };

        debug!(offset, returned = records.len(), total = matching.len(), "bundle page");
        Ok(RecordPage {
            records,
            patients: Vec::new(),
            next,
        })
    }
}

impl RecordFetcher for BundleFetcher {
    fn fetch_page(&self, request: PageRequest<'_>) -> Result<RecordPage, ChartError> {
        match request {
            PageRequest::Search { query, page_size } => self.page(query, 0, page_size),
            PageRequest::Next(link) => {
                let (offset, page_size, query) = decode_next(link)?;
                self.page(&query, offset, page_size)
            }
        }
    }

    fn fetch_population_ids(
        &self,
        category: Option<&str>,
        page_cap: usize,
    ) -> Result<Vec<String>, ChartError> {
        let mut candidates = self.patients.clone();
        for record in &self.records {
            if let Some(id) = &record.subject_id {
                if !candidates.contains(id) {
                    candidates.push(id.clone());
                }
            }
        }

        Ok(candidates
            .into_iter()
            .filter(|id| match category {
                None => true,
                Some(category) => self.records.iter().any(|record| {
                    record.subject_id.as_deref() == Some(id.as_str())
                        && record.categories.iter().any(|token| token == category)
                }),
            })
            .take(page_cap)
            .collect())
    }
}

fn decode_next(link: &str) -> Result<(usize, usize, ObservationQuery), ChartError> {
    let invalid = || ChartError::Parse(format!("unrecognised continuation link {link}"));
    let rest = link.strip_prefix(NEXT_PREFIX).ok_or_else(invalid)?;
    let mut parts = rest.splitn(3, ':');
    let offset = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let page_size = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let query = parts
        .next()
        .and_then(|p| serde_json::from_str(p).ok())
        .ok_or_else(invalid)?;
    Ok((offset, page_size, query))
}

/// Date bounds of a query, parsed once per page.
struct Bounds {
    since: Option<DateTime<Utc>>,
    until: Option<UpperBound>,
}

enum UpperBound {
    Day(NaiveDate),
    Instant(DateTime<Utc>),
}

impl Bounds {
    fn parse(query: &ObservationQuery) -> Result<Self, ChartError> {
        let invalid = |text: &str| ChartError::Parse(format!("invalid date bound {text}"));

        let since = match query.since.as_deref() {
            Some(text) => Some(parse_timestamp(text).ok_or_else(|| invalid(text))?),
            None => None,
        };
        let until = match query.until.as_deref() {
            Some(text) => match NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d") {
                Ok(day) => Some(UpperBound::Day(day)),
                Err(_) => Some(UpperBound::Instant(
                    parse_timestamp(text).ok_or_else(|| invalid(text))?,
                )),
            },
            None => None,
        };
        Ok(Self { since, until })
    }

    fn is_open(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        if self.since.is_some_and(|since| at < since) {
            return false;
        }
        match &self.until {
            Some(UpperBound::Day(day)) => at.date_naive() <= *day,
            Some(UpperBound::Instant(until)) => at <= *until,
            None => true,
        }
    }
}

fn matches(record: &ClinicalRecord, query: &ObservationQuery, bounds: &Bounds) -> bool {
    if let Some(patient) = &query.patient {
        let wanted = patient_id_from_reference(patient);
        if wanted.is_none() || record.subject_id != wanted {
            return false;
        }
    }
    if !query.codes.is_empty() && !record.codes().any(|code| query.codes.iter().any(|c| c == code)) {
        return false;
    }
    if let Some(category) = &query.category {
        if !record.categories.iter().any(|token| token == category) {
            return false;
        }
    }
    if bounds.is_open() {
        return true;
    }
    record_timestamp(record).is_some_and(|at| bounds.contains(at))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn observation(patient: &str, code: &str, when: &str) -> Value {
        json!({
            "resourceType": "Observation",
            "code": {"coding": [{"code": code}]},
            "subject": {"reference": format!("Patient/{patient}")},
            "effectiveDateTime": when,
            "category": [{"coding": [{"code": "vital-signs"}]}],
            "valueQuantity": {"value": 1}
        })
    }

    fn bundle(resources: Vec<Value>) -> Value {
        json!({
            "resourceType": "Bundle",
            "entry": resources.into_iter().map(|r| json!({"resource": r})).collect::<Vec<_>>()
        })
    }

    #[test]
    fn pages_follow_continuation_links() {
        let resources = (1..=5)
            .map(|day| observation("p1", "8867-4", &format!("2021-01-0{day}")))
            .collect();
        let mut fetcher = BundleFetcher::new().with_max_page_size(2);
        fetcher.add_document(&bundle(resources));

        let query = ObservationQuery::for_patient("p1");
        let first = fetcher
            .fetch_page(PageRequest::Search { query: &query, page_size: 200 })
            .expect("first page");
        assert_eq!(first.records.len(), 2);
        let link = first.next.expect("next link");
        let second = fetcher.fetch_page(PageRequest::Next(&link)).expect("second page");
        assert_eq!(second.records.len(), 2);

        let all = fetcher.fetch_records(&query, 100).expect("records");
        assert_eq!(all.len(), 5);
        let capped = fetcher.fetch_records(&query, 3).expect("records");
        assert_eq!(capped.len(), 3);
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let mut fetcher = BundleFetcher::new();
        fetcher.add_document(&bundle(vec![
            observation("p1", "8867-4", "2021-01-01T10:00:00Z"),
            observation("p1", "8867-4", "2021-02-01T10:00:00Z"),
            observation("p1", "8867-4", "2021-03-01T10:00:00Z"),
        ]));
        let query = ObservationQuery::for_patient("Patient/p1")
            .with_bounds(Some("2021-02-01".to_string()), Some("2021-03-01".to_string()));
        assert_eq!(fetcher.fetch_records(&query, 10).expect("records").len(), 2);

        let bad = ObservationQuery::default().with_bounds(Some("soon".to_string()), None);
        assert!(fetcher.fetch_records(&bad, 10).is_err());
    }

    #[test]
    fn population_ids_filter_by_category() {
        let mut fetcher = BundleFetcher::new();
        fetcher.add_document(&bundle(vec![
            json!({"resourceType": "Patient", "id": "p9"}),
            observation("p1", "8867-4", "2021-01-01"),
        ]));
        assert_eq!(
            fetcher.fetch_population_ids(None, 10).expect("ids"),
            vec!["p9".to_string(), "p1".to_string()]
        );
        assert_eq!(
            fetcher.fetch_population_ids(Some("vital-signs"), 10).expect("ids"),
            vec!["p1".to_string()]
        );
        assert!(fetcher.fetch_population_ids(Some("laboratory"), 10).expect("ids").is_empty());
    }

    #[test]
    fn foreign_links_are_rejected() {
        let fetcher = BundleFetcher::new();
        let err = fetcher
            .fetch_page(PageRequest::Next("http://elsewhere/next"))
            .expect_err("foreign link");
        assert!(!err.is_transport());
    }
}
