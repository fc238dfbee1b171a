//! FHIR REST fetcher over blocking HTTP.

use std::time::Duration;

use chartable_core::ChartError;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::debug;

use crate::fetch::{ObservationQuery, PageRequest, RecordFetcher, RecordPage};
use crate::record::bundle_resources;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/fhir";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpFetcher {
    base_url: String,
    client: Client,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChartError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ChartError::Request {
                url: base_url.clone(),
                message: err.to_string(),
            })?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URLs pass through; anything else is joined to the base URL.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }

    fn get_json(&self, url: &str, params: &[(String, String)]) -> Result<Value, ChartError> {
        debug!(url, params = params.len(), "GET");
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/fhir+json")
            .query(params)
            .send()
            .map_err(|err| ChartError::Request {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChartError::Transport {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<Value>()
            .map_err(|err| ChartError::Parse(format!("{url}: {err}")))
    }
}

/// Search parameters for an Observation query.
///
/// Codes use `combo-code` so panel components match as well as top-level codes.
pub fn search_params(query: &ObservationQuery, page_size: usize) -> Vec<(String, String)> {
    let mut params = vec![("_count".to_string(), page_size.to_string())];
    if let Some(patient) = &query.patient {
        params.push(("patient".to_string(), patient.clone()));
    }
    if !query.codes.is_empty() {
        params.push(("combo-code".to_string(), query.codes.join(",")));
    }
    if let Some(category) = &query.category {
        params.push(("category".to_string(), category.clone()));
    }
    if let Some(since) = &query.since {
        params.push(("date".to_string(), format!("ge{since}")));
    }
    if let Some(until) = &query.until {
        params.push(("date".to_string(), format!("le{until}")));
    }
    params
}

impl RecordFetcher for HttpFetcher {
    fn fetch_page(&self, request: PageRequest<'_>) -> Result<RecordPage, ChartError> {
        let bundle = match request {
            PageRequest::Search { query, page_size } => {
                self.get_json(&self.resolve("Observation"), &search_params(query, page_size))?
            }
            PageRequest::Next(url) => self.get_json(&self.resolve(url), &[])?,
        };
        Ok(RecordPage::from_bundle(&bundle))
    }

    fn fetch_population_ids(
        &self,
        category: Option<&str>,
        page_cap: usize,
    ) -> Result<Vec<String>, ChartError> {
        let mut params = vec![("_count".to_string(), page_cap.to_string())];
        if let Some(category) = category {
            params.push((
                "_has:Observation:patient:category".to_string(),
                category.to_string(),
            ));
        }
        let bundle = self.get_json(&self.resolve("Patient"), &params)?;

        let ids = bundle_resources(&bundle)
            .into_iter()
            .filter(|resource| resource.get("resourceType").and_then(Value::as_str) == Some("Patient"))
            .filter_map(|resource| resource.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .take(page_cap)
            .collect();
        Ok(ids)
    }
}
