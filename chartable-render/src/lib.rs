//! Render chart groups to PNG files, one image per group.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chartable_core::{fallback_label, ChartError, ChartGroup, TemporalPoint};
use chartable_fhir::{fetch_timeseries, RecordFetcher};
use chrono::{TimeZone, Utc};
use plotters::prelude::*;
use tracing::{debug, info};

const ALLOWED_PUNCTUATION: &str = " -_.()+#";
const DAY_MILLIS: i64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub out_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("./charts"),
            width: 960,
            height: 540,
            since: None,
            until: None,
        }
    }
}

/// Filesystem-safe stem for a chart title.
///
/// Characters outside letters, digits and ` -_.()+#` become `_`; runs of
/// spaces and underscores collapse to one `_`; edges are trimmed.
pub fn sanitize_file_stem(title: &str) -> String {
    let mut stem = String::with_capacity(title.len());
    let mut in_gap = false;
    for ch in title.chars() {
        let ch = if ch.is_ascii_alphanumeric() || ALLOWED_PUNCTUATION.contains(ch) {
            ch
        } else {
            '_'
        };
        if ch == ' ' || ch == '_' {
            if !in_gap {
                stem.push('_');
            }
            in_gap = true;
        } else {
            stem.push(ch);
            in_gap = false;
        }
    }

    let trimmed = stem.trim_matches(|ch: char| ch == ' ' || ch == '_');
    if trimmed.is_empty() {
        "chart".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn chart_file_name(title: &str) -> String {
    format!("{}.png", sanitize_file_stem(title))
}

fn unique_file_name(title: &str, taken: &mut HashSet<String>) -> String {
    let stem = sanitize_file_stem(title);
    let mut candidate = stem.clone();
    let mut suffix = 2;
    while taken.contains(&candidate) {
        candidate = format!("{stem}_{suffix}");
        suffix += 1;
    }
    taken.insert(candidate.clone());
    format!("{candidate}.png")
}

struct PlotLine<'a> {
    label: String,
    points: &'a [TemporalPoint],
}

/// Re-fetch every series named by `groups` and draw one PNG per group.
///
/// Groups whose series have no data are skipped. Returns `(title, path)` for
/// each file written, in group order.
pub fn render_groups<F>(
    fetcher: &F,
    patient_id: &str,
    groups: &[ChartGroup],
    options: &RenderOptions,
) -> Result<Vec<(String, PathBuf)>, ChartError>
where
    F: RecordFetcher + ?Sized,
{
    fs::create_dir_all(&options.out_dir)?;

    let codes: Vec<String> = groups
        .iter()
        .flat_map(|group| group.codes())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let data = fetch_timeseries(
        fetcher,
        patient_id,
        &codes,
        options.since.as_deref(),
        options.until.as_deref(),
    )?;

    let mut taken = HashSet::new();
    let mut written = Vec::new();
    for group in groups {
        let lines: Vec<PlotLine<'_>> = group
            .series
            .iter()
            .filter_map(|series| {
                let points = data.get(&series.code).filter(|points| !points.is_empty())?;
                let label = if series.label.trim().is_empty() {
                    fallback_label(&series.code)
                } else {
                    series.label.clone()
                };
                Some(PlotLine { label, points })
            })
            .collect();

        if lines.is_empty() {
            debug!(title = %group.title, "no data for chart, skipping");
            continue;
        }

        let path = options.out_dir.join(unique_file_name(&group.title, &mut taken));
        draw_chart(&path, &group.title, &lines, options.width, options.height)?;
        info!(title = %group.title, path = %path.display(), "chart written");
        written.push((group.title.clone(), path));
    }
    Ok(written)
}

fn render_error<E: std::fmt::Display>(err: E) -> ChartError {
    ChartError::Render(err.to_string())
}

fn axis_ranges(lines: &[PlotLine<'_>]) -> (std::ops::Range<i64>, std::ops::Range<f64>) {
    let all = lines.iter().flat_map(|line| line.points.iter());
    let (mut x_min, mut x_max) = (i64::MAX, i64::MIN);
    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for point in all {
        let x = point.recorded_at.timestamp_millis();
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(point.value);
        y_max = y_max.max(point.value);
    }

    if x_min >= x_max {
        x_min -= DAY_MILLIS;
        x_max += DAY_MILLIS;
    }
    let pad = if y_max > y_min {
        (y_max - y_min) * 0.1
    } else {
        (y_max.abs() * 0.1).max(1.0)
    };
    (x_min..x_max, (y_min - pad)..(y_max + pad))
}

fn format_day(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn draw_chart(
    path: &Path,
    title: &str,
    lines: &[PlotLine<'_>],
    width: u32,
    height: u32,
) -> Result<(), ChartError> {
    let (x_range, y_range) = axis_ranges(lines);

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(16)
        .x_label_area_size(48)
        .y_label_area_size(56)
        .build_cartesian_2d(x_range, y_range)
        .map_err(render_error)?;

    chart
        .configure_mesh()
        .x_labels(8)
        .x_label_formatter(&|millis: &i64| format_day(*millis))
        .x_desc("Date")
        .y_desc("Value")
        .draw()
        .map_err(render_error)?;

    for (index, line) in lines.iter().enumerate() {
        let color = Palette99::pick(index).to_rgba();
        let points: Vec<(i64, f64)> = line
            .points
            .iter()
            .map(|point| (point.recorded_at.timestamp_millis(), point.value))
            .collect();

        chart
            .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))
            .map_err(render_error)?
            .label(line.label.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));

        chart
            .draw_series(points.into_iter().map(|xy| Circle::new(xy, 3, color.filled())))
            .map_err(render_error)?;
    }

    if lines.len() > 1 {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(render_error)?;
    }

    root.present().map_err(render_error)?;
    Ok(())
}
