//! Priority-ordered assignment of chartable series to chart panels.

use std::collections::{HashMap, HashSet};

use crate::{ChartGroup, ChartableSeries};

pub const SYSTOLIC: &str = "8480-6";
pub const DIASTOLIC: &str = "8462-4";
pub const BLOOD_PRESSURE_TITLE: &str = "Blood Pressure (mmHg)";

const BLOOD_PRESSURE: &[(&str, &str)] = &[
    (SYSTOLIC, "Systolic Blood Pressure (mmHg)"),
    (DIASTOLIC, "Diastolic Blood Pressure (mmHg)"),
];

const VITALS: &[(&str, &str)] = &[
    ("8867-4", "Heart Rate (beats/min)"),
    ("9279-1", "Respiratory Rate (breaths/min)"),
    ("8302-2", "Body Height (cm)"),
    ("29463-7", "Body Weight (kg)"),
    ("39156-5", "Body Mass Index (kg/m2)"),
];

const LIPIDS: &[(&str, &str)] = &[
    ("2093-3", "Total Cholesterol (mg/dL)"),
    ("2085-9", "HDL Cholesterol (mg/dL)"),
    ("18262-6", "LDL Cholesterol (mg/dL)"),
    ("13457-7", "LDL Cholesterol, Calculated (mg/dL)"),
    ("2571-8", "Triglycerides (mg/dL)"),
];

const METABOLIC: &[(&str, &str)] = &[
    ("2339-0", "Glucose (mg/dL)"),
    ("2951-2", "Sodium (mmol/L)"),
    ("6298-4", "Potassium (mmol/L)"),
    ("2075-0", "Chloride (mmol/L)"),
    ("2028-9", "Carbon Dioxide (mmol/L)"),
    ("6299-2", "Urea Nitrogen (mg/dL)"),
    ("38483-4", "Creatinine (mg/dL)"),
    ("49765-1", "Calcium (mg/dL)"),
];

// Creatinine is normally claimed by the metabolic panel already.
const RENAL: &[(&str, &str)] = &[
    ("38483-4", "Creatinine (mg/dL)"),
    ("33914-3", "eGFR (mL/min/1.73m2)"),
];

const LIVER: &[(&str, &str)] = &[
    ("1742-6", "ALT (U/L)"),
    ("1920-8", "AST (U/L)"),
    ("6768-6", "Alkaline Phosphatase (U/L)"),
    ("1975-2", "Total Bilirubin (mg/dL)"),
    ("1751-7", "Albumin (g/dL)"),
    ("2885-2", "Total Protein (g/dL)"),
];

const SURVEYS: &[(&str, &str)] = &[
    ("72514-3", "Pain Severity (0-10)"),
    ("44261-6", "PHQ-9 Total Score"),
    ("55758-7", "PHQ-2 Total Score"),
    ("70274-6", "GAD-7 Total Score"),
];

enum Rule {
    /// Systolic and diastolic share one chart when both are present.
    BloodPressure,
    /// One chart per listed code.
    Each(&'static [(&'static str, &'static str)]),
    /// Like `Each`, only when surveys are requested.
    Surveys(&'static [(&'static str, &'static str)]),
}

const RULES: &[Rule] = &[
    Rule::BloodPressure,
    Rule::Each(VITALS),
    Rule::Each(LIPIDS),
    Rule::Each(METABOLIC),
    Rule::Each(RENAL),
    Rule::Each(LIVER),
    Rule::Surveys(SURVEYS),
];

/// Fixed chart title for a known code, if any.
pub fn title_for_code(code: &str) -> Option<&'static str> {
    [BLOOD_PRESSURE, VITALS, LIPIDS, METABOLIC, RENAL, LIVER, SURVEYS]
        .into_iter()
        .flatten()
        .find(|(known, _)| *known == code)
        .map(|(_, title)| *title)
}

struct Assignment<'a> {
    by_code: HashMap<&'a str, &'a ChartableSeries>,
    claimed: HashSet<&'a str>,
    titles: HashSet<String>,
    groups: Vec<ChartGroup>,
}

impl<'a> Assignment<'a> {
    fn new(series: &'a [ChartableSeries]) -> Self {
        let mut by_code = HashMap::new();
        for item in series {
            by_code.entry(item.code.as_str()).or_insert(item);
        }
        Self {
            by_code,
            claimed: HashSet::new(),
            titles: HashSet::new(),
            groups: Vec::new(),
        }
    }

    fn unclaimed(&self, code: &str) -> Option<&'a ChartableSeries> {
        if self.claimed.contains(code) {
            return None;
        }
        self.by_code.get(code).copied()
    }

    fn push(&mut self, title: String, members: Vec<&'a ChartableSeries>) {
        for member in members.iter().copied() {
            self.claimed.insert(member.code.as_str());
        }
        self.titles.insert(title.clone());
        self.groups.push(ChartGroup {
            title,
            series: members.into_iter().cloned().collect(),
        });
    }

    fn apply(&mut self, rule: &Rule, include_surveys: bool) {
        match rule {
            Rule::BloodPressure => {
                match (self.unclaimed(SYSTOLIC), self.unclaimed(DIASTOLIC)) {
                    (Some(systolic), Some(diastolic)) => {
                        self.push(BLOOD_PRESSURE_TITLE.to_string(), vec![systolic, diastolic]);
                    }
                    _ => self.each(BLOOD_PRESSURE),
                }
            }
            Rule::Each(table) => self.each(table),
            Rule::Surveys(table) => {
                if include_surveys {
                    self.each(table);
                }
            }
        }
    }

    fn each(&mut self, table: &[(&str, &str)]) {
        for (code, title) in table {
            if let Some(series) = self.unclaimed(code) {
                self.push(title.to_string(), vec![series]);
            }
        }
    }

    fn fallback(&mut self, series: &'a [ChartableSeries]) {
        for item in series {
            if self.claimed.contains(item.code.as_str()) {
                continue;
            }
            let mut title = match item.primary_unit() {
                Some(unit) => format!("{} ({unit})", item.label),
                None => item.label.clone(),
            };
            if self.titles.contains(&title) {
                title = format!("{title} [{}]", item.code);
            }
            self.push(title, vec![item]);
        }
    }
}

/// Assign every series to exactly one chart.
///
/// Known panels are claimed first in a fixed order (blood pressure, vitals,
/// lipids, metabolic, renal, liver, surveys); anything left gets its own chart
/// titled from its label and primary unit. Repeated codes in the input are
/// charted once.
pub fn group_chartables(series: &[ChartableSeries], include_surveys: bool) -> Vec<ChartGroup> {
    let mut assignment = Assignment::new(series);
    for rule in RULES {
        assignment.apply(rule, include_surveys);
    }
    assignment.fallback(series);
    assignment.groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(code: &str, label: &str, unit: Option<&str>) -> ChartableSeries {
        ChartableSeries {
            code: code.to_string(),
            label: label.to_string(),
            units: unit.map(|u| vec![u.to_string()]).unwrap_or_default(),
            count: 5,
            span_days: 30,
        }
    }

    fn titles(groups: &[ChartGroup]) -> Vec<&str> {
        groups.iter().map(|group| group.title.as_str()).collect()
    }

    #[test]
    fn blood_pressure_pair_shares_a_chart() {
        let input = vec![
            series(DIASTOLIC, "Diastolic", Some("mm[Hg]")),
            series("8867-4", "Heart rate", Some("/min")),
            series(SYSTOLIC, "Systolic", Some("mm[Hg]")),
        ];
        let groups = group_chartables(&input, false);
        assert_eq!(titles(&groups), vec![BLOOD_PRESSURE_TITLE, "Heart Rate (beats/min)"]);
        let codes: Vec<_> = groups[0].codes().collect();
        assert_eq!(codes, vec![SYSTOLIC, DIASTOLIC]);
    }

    #[test]
    fn lone_diastolic_gets_its_own_chart() {
        let groups = group_chartables(&[series(DIASTOLIC, "Diastolic", None)], false);
        assert_eq!(titles(&groups), vec!["Diastolic Blood Pressure (mmHg)"]);
    }

    #[test]
    fn surveys_fall_back_unless_requested() {
        let input = vec![series("72514-3", "Pain severity", Some("{score}"))];
        let without = group_chartables(&input, false);
        assert_eq!(titles(&without), vec!["Pain severity ({score})"]);
        let with = group_chartables(&input, true);
        assert_eq!(titles(&with), vec!["Pain Severity (0-10)"]);
    }

    #[test]
    fn panel_order_is_fixed_not_input_order() {
        let input = vec![
            series("1742-6", "ALT", None),
            series("33914-3", "eGFR", None),
            series("38483-4", "Creatinine", None),
            series("2093-3", "Cholesterol", None),
            series("29463-7", "Weight", None),
        ];
        let groups = group_chartables(&input, false);
        assert_eq!(
            titles(&groups),
            vec![
                "Body Weight (kg)",
                "Total Cholesterol (mg/dL)",
                "Creatinine (mg/dL)",
                "eGFR (mL/min/1.73m2)",
                "ALT (U/L)",
            ]
        );
    }

    #[test]
    fn fallback_titles_stay_unique() {
        let input = vec![
            series("1111-1", "Score", Some("{score}")),
            series("2222-2", "Score", Some("{score}")),
            series("2222-2", "Score", Some("{score}")),
        ];
        let groups = group_chartables(&input, false);
        assert_eq!(
            titles(&groups),
            vec!["Score ({score})", "Score ({score}) [2222-2]"]
        );
    }

    #[test]
    fn title_lookup_covers_every_panel() {
        assert_eq!(title_for_code(SYSTOLIC), Some("Systolic Blood Pressure (mmHg)"));
        assert_eq!(title_for_code("33914-3"), Some("eGFR (mL/min/1.73m2)"));
        assert_eq!(title_for_code("72514-3"), Some("Pain Severity (0-10)"));
        assert_eq!(title_for_code("0000-0"), None);
    }
}
