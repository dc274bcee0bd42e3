use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dcsim_artifact::{ArtifactKind, ArtifactValidator, HttpTransport};
use dcsim_core::prelude::*;
use dcsim_core::VERSION;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Config read from the working directory when `--config` is absent
const DEFAULT_CONFIG_FILE: &str = "dcsim.toml";

const DEFAULT_LOG_FILTER: &str = "dcsim=info";

fn phase_arg() -> Arg {
    Arg::new("phase")
        .long("phase")
        .value_parser(value_parser!(PhaseId))
        .action(ArgAction::Append)
        .help("Only run this phase (1-4); repeatable")
}

fn cli() -> Command {
    Command::new("dcsim-precalc")
        .version(VERSION)
        .about("Precalculate datacenter-simulation benchmark results per phase")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Pipeline config (default: ./dcsim.toml when present)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .arg(phase_arg())
        .subcommand(
            Command::new("run")
                .about("Run the dataset step and every configured phase (default)")
                .arg(phase_arg()),
        )
        .subcommand(
            Command::new("acquire")
                .about("Fetch and validate the dataset archive")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Download even if a valid archive is present"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Classify an existing archive file")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Report completeness of a persisted phase document")
                .arg(
                    Arg::new("phase")
                        .required(true)
                        .value_parser(value_parser!(PhaseId)),
                ),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("json-logs"));

    let outcome = match matches.subcommand() {
        None => run_pipeline(&matches).await,
        Some(("run", args)) => run_pipeline(args).await,
        Some(("acquire", args)) => acquire(args).await,
        Some(("verify", args)) => verify(args).await,
        Some(("inspect", args)) => inspect(args).await,
        Some((other, _)) => Err(anyhow::anyhow!("unknown command {other}")),
    };

    match outcome {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

/// Explicit path, else `./dcsim.toml`, else built-in defaults
fn resolve_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    if let Some(path) = explicit {
        return PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()));
    }

    let local = Path::new(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return PipelineConfig::load(local).context("loading ./dcsim.toml");
    }

    let config = PipelineConfig::default();
    config.validate()?;
    Ok(config)
}

fn config_from(args: &ArgMatches) -> Result<PipelineConfig> {
    resolve_config(args.get_one::<PathBuf>("config").map(PathBuf::as_path))
}

fn http_transport(dataset: &DatasetConfig) -> Result<Arc<HttpTransport>> {
    let transport = HttpTransport::new(dataset.timeout()).context("building HTTP client")?;
    Ok(Arc::new(transport))
}

async fn run_pipeline(args: &ArgMatches) -> Result<bool> {
    let config = config_from(args)?;
    let selection: Vec<PhaseId> = args
        .get_many::<PhaseId>("phase")
        .map(|phases| phases.copied().collect())
        .unwrap_or_default();

    let dataset = config.dataset.clone();
    let mut pipeline = PrecalculationPipeline::from_config(config, &selection)?;
    if let Some(dataset) = dataset {
        let transport = http_transport(&dataset)?;
        pipeline = pipeline.with_dataset(DatasetTask::from_config(&dataset, transport));
    }

    print_header(&pipeline);
    let report = pipeline.run_all().await;
    print_report(&report);
    Ok(report.success)
}

fn print_header(pipeline: &PrecalculationPipeline) {
    let config = pipeline.config();
    let stages: Vec<String> = pipeline.stages().iter().map(ToString::to_string).collect();

    println!("DCSim precalculation v{VERSION}");
    match (config.dates.first(), config.dates.last()) {
        (Some(first), Some(last)) => {
            println!("Dates: {} ({first} .. {last})", config.dates.len());
        }
        _ => println!("Dates: 0"),
    }
    println!("Output: {}", pipeline.store().dir().display());
    println!("Gap policy: {:?}", config.gap_policy);
    println!("Tasks: {}", stages.join(", "));
    println!();
}

fn print_report(report: &PipelineReport) {
    if let Some(dataset) = &report.dataset {
        let verb = if dataset.reused { "reused" } else { "downloaded" };
        println!(
            "[ok] dataset {verb}: {} ({} bytes, blake3 {})",
            dataset.artifact.path.display(),
            dataset.artifact.bytes_written,
            dataset.artifact.digest.short()
        );
    }

    for outcome in &report.phases {
        println!(
            "[ok] {}: {} algorithm(s) x {} date(s) in {:.1}s -> {}",
            outcome.phase,
            outcome.algorithms,
            outcome.dates,
            outcome.duration.as_secs_f64(),
            outcome.artifact.display()
        );
        for gap in &outcome.gaps {
            println!(
                "     gap: {} on {} ({:?})",
                gap.algorithm, gap.date, gap.reason
            );
        }
    }

    if let Some(failure) = &report.failure {
        println!();
        println!("[FAILED] {} ({})", failure.stage, failure.kind);
        println!("  error: {}", failure.error);
        let mut source = std::error::Error::source(&failure.error);
        while let Some(cause) = source {
            println!("  caused by: {cause}");
            source = std::error::Error::source(cause);
        }
        if !report.skipped.is_empty() {
            let skipped: Vec<String> = report.skipped.iter().map(ToString::to_string).collect();
            println!("  not run: {}", skipped.join(", "));
        }
    }

    println!();
    println!("Phase durations:");
    for (phase, elapsed) in report.per_phase_durations() {
        println!("  {phase}: {}", format_duration(elapsed));
    }
    println!(
        "{} in {}",
        if report.success { "Completed" } else { "Aborted" },
        format_duration(report.total_duration)
    );
}

fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 60.0 {
        format!("{}m {:.1}s", elapsed.as_secs() / 60, secs % 60.0)
    } else {
        format!("{secs:.2}s")
    }
}

async fn acquire(args: &ArgMatches) -> Result<bool> {
    let config = config_from(args)?;
    let dataset = config.dataset.as_ref().ok_or(ConfigError::MissingDataset)?;
    let transport = http_transport(dataset)?;

    println!("Acquiring {} -> {}", dataset.url, dataset.destination.display());
    let outcome = DatasetTask::from_config(dataset, transport)
        .force(args.get_flag("force"))
        .run()
        .await;

    match outcome {
        Ok(outcome) => {
            println!(
                "[ok] {} ({} bytes, blake3 {}){}",
                outcome.artifact.path.display(),
                outcome.artifact.bytes_written,
                outcome.artifact.digest,
                if outcome.reused { ", already present" } else { "" }
            );
            Ok(true)
        }
        Err(error) => {
            println!("[FAILED] dataset ({})", error.kind());
            println!("  error: {error}");
            Ok(false)
        }
    }
}

async fn verify(args: &ArgMatches) -> Result<bool> {
    let path = args
        .get_one::<PathBuf>("path")
        .context("missing path argument")?;

    match ArtifactValidator::new().classify_file(path).await {
        Ok(classification) => {
            println!("{}: {}", path.display(), classification.kind);
            if let Some(preview) = &classification.preview {
                println!("  preview: {}", preview.escape_debug());
            }
            Ok(classification.kind == ArtifactKind::Valid)
        }
        Err(error) => {
            println!("{}: {error}", path.display());
            Ok(false)
        }
    }
}

async fn inspect(args: &ArgMatches) -> Result<bool> {
    let config = config_from(args)?;
    let phase = *args
        .get_one::<PhaseId>("phase")
        .context("missing phase argument")?;

    let store = ResultStore::new(&config.output_dir);
    let document = store
        .load(phase)
        .await
        .with_context(|| format!("reading {phase} results"))?;

    let missing = document.missing_dates(&config.dates);
    let complete = document.is_complete(&config.dates);

    println!("{}", store.path_for(phase).display());
    println!("  generated: {}", document.generated_at.to_rfc3339());
    println!("  success: {}", document.success);
    println!("  metrics: {}", document.results.len());
    println!(
        "  algorithms: {}",
        document
            .algorithms
            .iter()
            .map(AlgorithmName::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  dates: {}/{}", document.dates.len(), config.dates.len());
    if !missing.is_empty() {
        let missing: Vec<&str> = missing.iter().map(TraceDate::as_str).collect();
        println!("  missing: {}", missing.join(", "));
    }
    println!("  complete: {}", if complete { "yes" } else { "no" });

    Ok(complete)
}
