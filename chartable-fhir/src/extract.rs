use std::collections::HashSet;

use chartable_core::{ExtractedPoint, TemporalPoint};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

use crate::record::{ClinicalRecord, CodedValue, Quantity};

/// Parse an ISO-8601 timestamp. `Z` and explicit offsets are honoured; values
/// without an offset are taken as UTC and a bare date as UTC midnight.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let text = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Effective time if it parses, otherwise the issued time.
pub fn record_timestamp(record: &ClinicalRecord) -> Option<DateTime<Utc>> {
    [record.effective_time.as_deref(), record.issued_time.as_deref()]
        .into_iter()
        .flatten()
        .find_map(parse_timestamp)
}

/// Numeric readings of one record: its own value and each component value.
///
/// `codes` restricts the output; an empty set keeps every code.
pub fn extract_points(record: &ClinicalRecord, codes: &HashSet<String>) -> Vec<ExtractedPoint> {
    let Some(recorded_at) = record_timestamp(record) else {
        debug!(id = ?record.id, "skipping observation without a usable timestamp");
        return Vec::new();
    };

    let own = (record.code.as_ref(), record.value.as_ref());
    let components = record
        .components
        .iter()
        .map(|component| (component.code.as_ref(), component.value.as_ref()));

    std::iter::once(own)
        .chain(components)
        .filter_map(|(coded, quantity)| numeric_point(coded, quantity, recorded_at, codes))
        .collect()
}

fn numeric_point(
    coded: Option<&CodedValue>,
    quantity: Option<&Quantity>,
    recorded_at: DateTime<Utc>,
    codes: &HashSet<String>,
) -> Option<ExtractedPoint> {
    let coded = coded?;
    let code = coded.code.as_deref()?;
    if !codes.is_empty() && !codes.contains(code) {
        return None;
    }
    let quantity = quantity?;
    let value = quantity.value?;

    Some(ExtractedPoint {
        code: code.to_string(),
        display: coded.display.clone(),
        point: TemporalPoint {
            recorded_at,
            value,
            unit: quantity.unit_text(),
        },
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[test]
    fn timestamp_variants() {
        assert_eq!(parse_timestamp("2020-01-01T00:00:00Z"), Some(utc(2020, 1, 1, 0)));
        assert_eq!(parse_timestamp("2020-01-01T08:00:00+02:00"), Some(utc(2020, 1, 1, 6)));
        assert_eq!(parse_timestamp("2020-01-01T08:00:00.123-0100"), parse_timestamp("2020-01-01T09:00:00.123Z"));
        assert_eq!(parse_timestamp("2020-01-01T08:00:00"), Some(utc(2020, 1, 1, 8)));
        assert_eq!(parse_timestamp("2020-01-01"), Some(utc(2020, 1, 1, 0)));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn unparsable_effective_falls_back_to_issued() {
        let record = ClinicalRecord {
            effective_time: Some("garbage".to_string()),
            issued_time: Some("2021-06-01T00:00:00Z".to_string()),
            ..ClinicalRecord::default()
        };
        assert_eq!(record_timestamp(&record), Some(utc(2021, 6, 1, 0)));
    }

    #[test]
    fn panel_yields_one_point_per_component() {
        let record = ClinicalRecord::from_resource(&json!({
            "resourceType": "Observation",
            "code": {"coding": [{"code": "85354-9"}]},
            "effectiveDateTime": "2021-01-05T09:00:00Z",
            "component": [
                {"code": {"coding": [{"code": "8480-6", "display": "Systolic"}]}, "valueQuantity": {"value": 121, "unit": "mmHg"}},
                {"code": {"coding": [{"code": "8462-4", "display": "Diastolic"}]}, "valueQuantity": {"value": 81, "code": "mm[Hg]"}},
                {"code": {"coding": [{"code": "8478-0"}]}, "valueString": "n/a"}
            ]
        }))
        .expect("observation");

        let points = extract_points(&record, &HashSet::new());
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].code, "8480-6");
        assert_eq!(points[0].display.as_deref(), Some("Systolic"));
        assert_eq!(points[0].point.unit, "mmHg");
        assert_eq!(points[1].point.value, 81.0);
        assert_eq!(points[1].point.unit, "mm[Hg]");
        assert!(points.iter().all(|p| p.point.recorded_at == utc(2021, 1, 5, 9)));
    }

    #[test]
    fn code_filter_applies_to_components() {
        let record = ClinicalRecord::from_resource(&json!({
            "code": {"coding": [{"code": "29463-7"}]},
            "valueQuantity": {"value": 70.5, "unit": "kg"},
            "issued": "2021-01-01T00:00:00Z",
            "component": [{"code": {"coding": [{"code": "8480-6"}]}, "valueQuantity": {"value": 120}}]
        }))
        .expect("observation");

        let wanted: HashSet<String> = ["8480-6".to_string()].into_iter().collect();
        let points = extract_points(&record, &wanted);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].code, "8480-6");
        assert_eq!(points[0].point.unit, "");
    }

    #[test]
    fn record_without_time_contributes_nothing() {
        let record = ClinicalRecord::from_resource(&json!({
            "code": {"coding": [{"code": "29463-7"}]},
            "valueQuantity": {"value": 70.5}
        }))
        .expect("observation");
        assert!(extract_points(&record, &HashSet::new()).is_empty());
    }
}
