use std::path::PathBuf;

use anyhow::Context;
use chartable_core::{group_chartables, ChartabilityConfig, ScreeningConfig};
use chartable_fhir::{
    classify_records, identify_chartable_patients, observation_categories, screen_population,
    BundleFetcher, HttpFetcher, ObservationQuery, RecordFetcher, DEFAULT_BASE_URL,
};
use chartable_render::{render_groups, RenderOptions};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_TARGETS: [&str; 4] = [
    "chartable",
    "chartable_core",
    "chartable_fhir",
    "chartable_render",
];

#[derive(Parser, Debug)]
#[command(
    name = "chartable",
    about = "Find patients and codes with chartable observation history and draw them."
)]
struct Cli {
    /// FHIR server base URL.
    #[arg(long, env = "FHIR_BASE", default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,

    /// Read FHIR Bundle JSON files instead of querying a server.
    #[arg(long, global = true)]
    bundle: Vec<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count records per patient across the population.
    Screen(ScreenArgs),
    /// Screen, then classify the highest-count patients.
    Chartable {
        #[command(flatten)]
        screen: ScreenArgs,
        #[command(flatten)]
        chart: ChartArgs,
    },
    /// Chartable series and chart groups for one patient, as JSON.
    Analyze(PatientArgs),
    /// Draw one PNG per chart group for one patient.
    Render {
        #[command(flatten)]
        patient: PatientArgs,
        /// Output directory.
        #[arg(long, default_value = "./charts")]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 960)]
        width: u32,
        #[arg(long, default_value_t = 540)]
        height: u32,
    },
    /// Observation category tokens present for one patient.
    Categories {
        #[arg(long)]
        patient: String,
    },
    /// List candidate patient ids.
    Patients {
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Comma-separated observation codes.
    #[arg(long, value_delimiter = ',')]
    codes: Vec<String>,
    /// Observation category, e.g. vital-signs or laboratory.
    #[arg(long)]
    category: Option<String>,
    /// Earliest date, ISO-8601.
    #[arg(long)]
    since: Option<String>,
    /// Latest date, ISO-8601.
    #[arg(long)]
    until: Option<String>,
}

impl FilterArgs {
    fn query(&self) -> ObservationQuery {
        ObservationQuery::default()
            .with_codes(self.codes.iter().cloned())
            .with_category(self.category.clone())
            .with_bounds(self.since.clone(), self.until.clone())
    }
}

#[derive(Args, Debug)]
struct ScreenArgs {
    #[command(flatten)]
    filter: FilterArgs,
    /// Maximum records to scan.
    #[arg(long, default_value_t = ScreeningConfig::default().sample)]
    sample: usize,
    /// Minimum records for a patient to qualify.
    #[arg(long, default_value_t = ScreeningConfig::default().min_points)]
    min_records: usize,
    #[arg(long, default_value_t = ScreeningConfig::default().max_qualified)]
    max_qualified: usize,
    /// Patients passed on to the full classifier.
    #[arg(long, default_value_t = ScreeningConfig::default().max_candidates)]
    max_candidates: usize,
    #[arg(long, default_value_t = ScreeningConfig::default().patient_record_cap)]
    max_records: usize,
}

impl ScreenArgs {
    fn config(&self) -> ScreeningConfig {
        ScreeningConfig {
            sample: self.sample,
            min_points: self.min_records,
            max_qualified: self.max_qualified,
            max_candidates: self.max_candidates,
            patient_record_cap: self.max_records,
        }
    }
}

#[derive(Args, Debug)]
struct ChartArgs {
    /// Minimum points per code.
    #[arg(long, default_value_t = ChartabilityConfig::default().min_points)]
    min_points: usize,
    /// Minimum days between first and last point.
    #[arg(long, default_value_t = ChartabilityConfig::default().min_span_days)]
    min_span_days: i64,
    /// Give survey scores their own panel titles.
    #[arg(long)]
    include_surveys: bool,
}

impl ChartArgs {
    fn config(&self) -> ChartabilityConfig {
        ChartabilityConfig {
            min_points: self.min_points,
            min_span_days: self.min_span_days,
            include_surveys: self.include_surveys,
        }
    }
}

#[derive(Args, Debug)]
struct PatientArgs {
    #[arg(long)]
    patient: String,
    #[command(flatten)]
    filter: FilterArgs,
    #[command(flatten)]
    chart: ChartArgs,
    #[arg(long, default_value_t = ScreeningConfig::default().patient_record_cap)]
    max_records: usize,
}

impl PatientArgs {
    fn query(&self) -> ObservationQuery {
        ObservationQuery {
            patient: Some(self.patient.clone()),
            ..self.filter.query()
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default_filter = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_fetcher(cli: &Cli) -> anyhow::Result<Box<dyn RecordFetcher>> {
    if cli.bundle.is_empty() {
        tracing::info!(base_url = %cli.base_url, "using FHIR server");
        let fetcher = HttpFetcher::new(cli.base_url.as_str())
            .with_context(|| format!("Could not create client for {}", cli.base_url))?;
        Ok(Box::new(fetcher))
    } else {
        let fetcher = BundleFetcher::load_files(&cli.bundle)
            .with_context(|| format!("Could not load bundles {:?}", cli.bundle))?;
        tracing::info!(records = fetcher.len(), "using local bundles");
        Ok(Box::new(fetcher))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let fetcher = open_fetcher(&cli)?;
    let fetcher = fetcher.as_ref();

    match &cli.command {
        Command::Screen(args) => {
            let result = screen_population(fetcher, &args.filter.query(), &args.config())
                .context("Population screen failed")?;
            println!(
                "Scanned: {}{}\nPatients: {}\nQualified: {}",
                result.scanned,
                if result.truncated { " (sample cap reached)" } else { "" },
                result.counts.len(),
                result.qualified.len()
            );
            for (patient, count) in result.top_candidates(args.max_candidates) {
                println!("{patient}\t{count}");
            }
        }
        Command::Chartable { screen, chart } => {
            let found = identify_chartable_patients(
                fetcher,
                &screen.filter.query(),
                &screen.config(),
                &chart.config(),
            )
            .context("Chartable patient search failed")?;
            println!("{}", serde_json::to_string_pretty(&found)?);
        }
        Command::Analyze(args) => {
            let records = fetcher
                .fetch_records(&args.query(), args.max_records)
                .with_context(|| format!("Could not fetch observations for {}", args.patient))?;
            let config = args.chart.config();
            let series = classify_records(&records, &config);
            let groups = group_chartables(&series, config.include_surveys);
            let report = json!({
                "patient_id": args.patient,
                "record_count": records.len(),
                "series": series,
                "groups": groups,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Render {
            patient,
            out_dir,
            width,
            height,
        } => {
            let records = fetcher
                .fetch_records(&patient.query(), patient.max_records)
                .with_context(|| format!("Could not fetch observations for {}", patient.patient))?;
            let config = patient.chart.config();
            let series = classify_records(&records, &config);
            let groups = group_chartables(&series, config.include_surveys);

            let options = RenderOptions {
                out_dir: out_dir.clone(),
                width: *width,
                height: *height,
                since: patient.filter.since.clone(),
                until: patient.filter.until.clone(),
            };
            let written = render_groups(fetcher, &patient.patient, &groups, &options)
                .context("Rendering charts failed")?;
            for (title, path) in written {
                println!("{title}\t{}", path.display());
            }
        }
        Command::Categories { patient } => {
            let records = fetcher
                .fetch_records(
                    &ObservationQuery::for_patient(patient.as_str()),
                    ScreeningConfig::default().patient_record_cap,
                )
                .with_context(|| format!("Could not fetch observations for {patient}"))?;
            for category in observation_categories(&records) {
                println!("{category}");
            }
        }
        Command::Patients { category, limit } => {
            let ids = fetcher
                .fetch_population_ids(category.as_deref(), *limit)
                .context("Could not list patients")?;
            for id in ids {
                println!("{id}");
            }
        }
    }

    Ok(())
}
