//! CLI entry point for the melanoma site mapper.
//!
//! Joins patient melanoma sites with the body-map reference table and writes
//! per-site counts or drainage frequencies for the visualisation tooling.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use melanoma_sites::{
    config::{EmptySubsetPolicy, JoinDirection, PipelineConfig},
    filter::{FilterExpression, NodeFieldMode},
    loader::{Datasets, InputPaths},
    metrics::TracingObserver,
    output::{OutputFormat, print_json},
    pipeline::{RunOptions, run},
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "melanoma_sites")]
#[command(about = "Map melanoma sites and lymphatic drainage onto the body map", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional JSON config file with column names and policies
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Body-map reference table (CSV)
    #[arg(long, global = true, default_value = "data/all_melanoma_sites.csv")]
    sites: PathBuf,

    /// Patient melanoma sites (CSV)
    #[arg(long, global = true, default_value = "data/melanoma_sites.csv")]
    patients: PathBuf,

    /// Follow-up data keyed by patient (CSV)
    #[arg(long, global = true, default_value = "data/mia_follow_up_data.csv")]
    followup: PathBuf,

    /// Do not join follow-up data
    #[arg(long, global = true, default_value_t = false)]
    no_followup: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Ipdata,
    Exdata,
    Both,
}

impl FormatArg {
    fn formats(self) -> Vec<OutputFormat> {
        match self {
            FormatArg::Ipdata => vec![OutputFormat::Ipdata],
            FormatArg::Exdata => vec![OutputFormat::Exdata],
            FormatArg::Both => vec![OutputFormat::Ipdata, OutputFormat::Exdata],
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Filter patients, aggregate per site and write the output files
    Export {
        /// Filter such as "Sex=F&Age>50" or "Node Fields=ro,rc1"
        #[arg(short, long)]
        filter: Option<String>,

        /// Output base path; the extension is replaced per format
        #[arg(short, long, default_value = "output/melanoma")]
        output: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = FormatArg::Both)]
        format: FormatArg,

        /// Express counts as a percentage of all patients at each site
        #[arg(short, long, default_value_t = false)]
        normalise: bool,

        /// Add every known node field to the filter
        #[arg(short, long, default_value_t = false)]
        all_node_fields: bool,

        /// Combine node fields into one output instead of one per field
        #[arg(short, long, default_value_t = false)]
        cluster: bool,

        /// Only write sites that have patients
        #[arg(long, default_value_t = false)]
        patient_driven: bool,

        /// Write output files even when a filter matches no patients
        #[arg(long, default_value_t = false)]
        emit_empty: bool,
    },
    /// List the fields that can be used in filters
    Fields,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/melanoma_sites.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("melanoma_sites.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    execute(cli).inspect_err(|e| error!(error = %format!("{e:#}"), "Run failed"))
}

fn execute(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let paths = InputPaths {
        sites: &cli.sites,
        patients: &cli.patients,
        followup: (!cli.no_followup).then_some(cli.followup.as_path()),
    };

    match cli.command {
        Commands::Export {
            filter,
            output,
            format,
            normalise,
            all_node_fields,
            cluster,
            patient_driven,
            emit_empty,
        } => {
            if patient_driven {
                config.join = JoinDirection::Patient;
            }
            if emit_empty {
                config.empty_subset = EmptySubsetPolicy::Emit;
            }

            let mut expr = match filter.as_deref() {
                Some(text) => text
                    .parse::<FilterExpression>()
                    .with_context(|| format!("invalid filter '{text}'"))?,
                None => FilterExpression::default(),
            };
            if all_node_fields {
                expr = expr.with_node_fields(config.all_node_fields.iter().cloned());
            }

            let options = RunOptions {
                filter: expr,
                mode: if cluster {
                    NodeFieldMode::Cluster
                } else {
                    NodeFieldMode::Expand
                },
                normalise,
                formats: format.formats(),
                output,
            };

            let data = Datasets::load(&paths, &config)?;
            let report = run(&data, &config, &options, &TracingObserver)?;
            print_json(&report)?;

            for artifact in &report.artifacts {
                info!(
                    label = %artifact.label,
                    patients = artifact.patients,
                    files = ?artifact.paths,
                    "Artifact written"
                );
            }
        }
        Commands::Fields => {
            let data = Datasets::load(&paths, &config)?;
            let fields = data.patients.sorted_columns();
            info!(total = fields.len(), "Filterable fields");
            for field in &fields {
                println!("{field}");
            }
        }
    }

    Ok(())
}
