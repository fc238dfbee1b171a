//! Tolerant reading of FHIR Observation JSON.
//!
//! Fields with the wrong JSON type are treated as absent; nothing here fails.

use serde_json::Value;

/// A coded identifier: terminology system, code and display text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodedValue {
    pub system: Option<String>,
    pub code: Option<String>,
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quantity {
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub code: Option<String>,
}

impl Quantity {
    /// Human unit text, then the unit code, then empty.
    pub fn unit_text(&self) -> String {
        non_empty(self.unit.as_deref())
            .or_else(|| non_empty(self.code.as_deref()))
            .unwrap_or_default()
            .to_string()
    }
}

/// A nested measurement sharing the parent record's timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Component {
    pub code: Option<CodedValue>,
    pub value: Option<Quantity>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClinicalRecord {
    pub id: Option<String>,
    pub code: Option<CodedValue>,
    pub effective_time: Option<String>,
    pub issued_time: Option<String>,
    pub value: Option<Quantity>,
    pub components: Vec<Component>,
    pub categories: Vec<String>,
    pub subject_id: Option<String>,
}

impl ClinicalRecord {
    /// Read an Observation resource. Other resource types yield `None`.
    pub fn from_resource(resource: &Value) -> Option<Self> {
        resource.as_object()?;
        match resource.get("resourceType").and_then(Value::as_str) {
            None | Some("Observation") => {}
            Some(_) => return None,
        }

        Some(Self {
            id: string_field(resource, "id"),
            code: resource.get("code").and_then(read_coded),
            effective_time: read_effective(resource),
            issued_time: string_field(resource, "issued"),
            value: resource.get("valueQuantity").and_then(read_quantity),
            components: resource
                .get("component")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(read_component).collect())
                .unwrap_or_default(),
            categories: read_categories(resource),
            subject_id: resource
                .get("subject")
                .and_then(|subject| subject.get("reference"))
                .and_then(Value::as_str)
                .and_then(patient_id_from_reference),
        })
    }

    pub fn code_str(&self) -> Option<&str> {
        self.code.as_ref().and_then(|coded| coded.code.as_deref())
    }

    /// The record's own code followed by every component code.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.code_str().into_iter().chain(
            self.components
                .iter()
                .filter_map(|component| component.code.as_ref()?.code.as_deref()),
        )
    }
}

/// Strip a `Patient/` reference down to its id. Bare ids pass through and
/// version suffixes (`/_history/N`) are dropped.
pub fn patient_id_from_reference(reference: &str) -> Option<String> {
    let reference = reference.trim();
    let id = match reference.rsplit_once("Patient/") {
        Some((_, rest)) => rest.split('/').next().unwrap_or_default(),
        None if !reference.contains('/') => reference,
        None => return None,
    };
    non_empty(Some(id)).map(str::to_string)
}

/// Resources carried by a Bundle, or the document itself when it is a bare resource.
pub fn bundle_resources(document: &Value) -> Vec<&Value> {
    match document.get("resourceType").and_then(Value::as_str) {
        Some("Bundle") => document
            .get("entry")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("resource"))
                    .collect()
            })
            .unwrap_or_default(),
        Some(_) => vec![document],
        None => Vec::new(),
    }
}

/// URL of the `next` link of a search Bundle.
pub fn next_link(bundle: &Value) -> Option<String> {
    bundle
        .get("link")
        .and_then(Value::as_array)?
        .iter()
        .find(|link| link.get("relation").and_then(Value::as_str) == Some("next"))
        .and_then(|link| link.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn read_effective(resource: &Value) -> Option<String> {
    string_field(resource, "effectiveDateTime")
        .or_else(|| string_field(resource, "effectiveInstant"))
        .or_else(|| {
            resource
                .get("effectivePeriod")
                .and_then(|period| string_field(period, "start"))
        })
}

fn read_coded(concept: &Value) -> Option<CodedValue> {
    let coding = concept
        .get("coding")
        .and_then(Value::as_array)
        .and_then(|codings| codings.first());

    let coded = CodedValue {
        system: coding.and_then(|c| string_field(c, "system")),
        code: coding.and_then(|c| string_field(c, "code")),
        display: coding
            .and_then(|c| string_field(c, "display"))
            .or_else(|| string_field(concept, "text")),
    };

    if coded == CodedValue::default() {
        None
    } else {
        Some(coded)
    }
}

fn read_quantity(quantity: &Value) -> Option<Quantity> {
    quantity.as_object()?;
    Some(Quantity {
        value: quantity.get("value").and_then(Value::as_f64),
        unit: string_field(quantity, "unit"),
        code: string_field(quantity, "code"),
    })
}

fn read_component(component: &Value) -> Option<Component> {
    component.as_object()?;
    Some(Component {
        code: component.get("code").and_then(read_coded),
        value: component.get("valueQuantity").and_then(read_quantity),
    })
}

fn read_categories(resource: &Value) -> Vec<String> {
    let Some(categories) = resource.get("category").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut tokens = Vec::new();
    for category in categories {
        let codes: Vec<String> = category
            .get("coding")
            .and_then(Value::as_array)
            .map(|codings| codings.iter().filter_map(|c| string_field(c, "code")).collect())
            .unwrap_or_default();

        if codes.is_empty() {
            tokens.extend(string_field(category, "text"));
        } else {
            tokens.extend(codes);
        }
    }
    tokens
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    non_empty(value.get(field).and_then(Value::as_str)).map(str::to_string)
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}
