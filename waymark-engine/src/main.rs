//! waymark - offline location trace collector
//!
//! Command-line front end for the collection engine: `waymark run`
//! executes every enabled collector plugin against a target and merges
//! the results; `waymark plugins` shows what the registry discovered.
//!
//! Logs go to stderr so exported data and reports can be piped from
//! stdout. A run where plugins fail still exits 0 with a best-effort
//! dataset; only caller errors (bad arguments, unreadable configuration,
//! unwritable export paths) are fatal.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waymark_common::LocationPoint;
use waymark_engine::collectors;
use waymark_engine::config::EngineConfig;
use waymark_engine::engine::{Engine, RunOutcome, RunParams};
use waymark_engine::export::{self, exporter_for, Exporter, SUPPORTED_FORMATS};
use waymark_engine::registry::{PluginRegistry, RegistryError};
use waymark_engine::types::{ConfigStatus, Registration};

/// Rows shown on stdout when no export target is given
const PREVIEW_ROWS: usize = 10;

/// Command-line arguments for waymark
#[derive(Parser, Debug)]
#[command(name = "waymark")]
#[command(about = "Collect location traces from offline personal-data exports")]
#[command(version)]
struct Cli {
    /// Configuration file (default: $WAYMARK_CONFIG, then the platform
    /// config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    verbosity: u8,

    /// Only log warnings and errors
    #[arg(short = 'q', global = true, conflicts_with = "verbosity")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a collection run against a target
    Run(RunArgs),
    /// List discovered plugins and their status
    Plugins(PluginsArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Investigation subject passed to every plugin
    #[arg(long)]
    target: String,

    /// Earliest timestamp of interest (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_name = "WHEN")]
    from: Option<String>,

    /// Latest timestamp of interest, inclusive (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_name = "WHEN")]
    to: Option<String>,

    /// Center of the geographic filter
    #[arg(long, value_name = "LAT,LON", requires = "radius")]
    center: Option<String>,

    /// Maximum distance from --center in kilometers
    #[arg(long, value_name = "KM", requires = "center")]
    radius: Option<f64>,

    /// Write the dataset to a file, e.g. --export csv=run.csv (repeatable)
    #[arg(long = "export", value_name = "FORMAT=PATH")]
    exports: Vec<String>,
}

#[derive(Args, Debug)]
struct PluginsArgs {
    /// Show dependencies, resolved configuration, and skip reasons
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity, cli.quiet);

    match cli.command {
        Command::Run(args) => cmd_run(cli.config.as_deref(), args).await,
        Command::Plugins(args) => cmd_plugins(cli.config.as_deref(), args),
    }
}

fn init_tracing(verbosity: u8, quiet: bool) {
    let level = if quiet {
        "warn"
    } else {
        match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = format!("waymark={level},waymark_engine={level},waymark_common={level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn cmd_run(config_arg: Option<&str>, args: RunArgs) -> Result<()> {
    let config = EngineConfig::load_or_default(config_arg)?;

    // Validate caller input before any plugin runs.
    let exports = args
        .exports
        .iter()
        .map(|spec| parse_export_spec(spec))
        .collect::<Result<Vec<_>>>()?;
    let params = RunParams {
        target: args.target.clone(),
        date_from: args.from.as_deref().map(|v| parse_when(v, false)).transpose()?,
        date_to: args.to.as_deref().map(|v| parse_when(v, true)).transpose()?,
        center: args.center.as_deref().map(parse_center).transpose()?,
        radius_km: args.radius,
    };

    let engine = Engine::new(&config);

    // Ctrl-C cancels the run; plugins that already finished still count.
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let outcome = engine.run(&params, &cancel).await;

    for line in run_report(&outcome, &args.target, engine.registry().config_errors()) {
        println!("{}", line);
    }

    for (exporter, path) in &exports {
        export::export_to_path(exporter.as_ref(), &outcome.locations, path).with_context(
            || format!("failed to export {} to {}", exporter.format(), path.display()),
        )?;
        println!("  wrote {} ({})", path.display(), exporter.format());
    }

    if exports.is_empty() {
        preview(&outcome.locations);
    }
    Ok(())
}

fn cmd_plugins(config_arg: Option<&str>, args: PluginsArgs) -> Result<()> {
    let config = EngineConfig::load_or_default(config_arg)?;
    let mut registry = PluginRegistry::new();
    registry.load(collectors::builtin_collectors(), &config);

    println!(
        "{:<18} {:<9} {:<8} {:>8}  READY",
        "NAME", "VERSION", "ENABLED", "PRIORITY"
    );
    for plugin in registry.plugins() {
        let descriptor = &plugin.descriptor;
        let ready = match plugin.collector.ready() {
            ConfigStatus::Ready => "yes".to_string(),
            ConfigStatus::NotConfigured { reason } if args.verbose => format!("no ({})", reason),
            ConfigStatus::NotConfigured { .. } => "no".to_string(),
        };
        println!(
            "{:<18} {:<9} {:<8} {:>8}  {}",
            descriptor.name, descriptor.version, descriptor.enabled, descriptor.priority, ready
        );
        if args.verbose {
            if !descriptor.dependencies.is_empty() {
                println!("{:<18} requires: {}", "", descriptor.dependencies.join(", "));
            }
            for (key, value) in &descriptor.config {
                println!("{:<18} {} = {}", "", key, value);
            }
        }
    }

    for registration in registry.registrations() {
        if let Registration::Invalid { name, reason } = registration {
            println!("rejected: {} ({})", name, reason);
        }
    }
    for error in registry.config_errors() {
        println!("config error: {}", error);
    }
    Ok(())
}

/// Stdout report for one run: summary line, then one `!` line per
/// configuration error and per plugin that did not succeed. Config
/// errors repeat here because logs go to stderr; a caller piping stdout
/// should still learn why a collector sat the run out.
fn run_report(outcome: &RunOutcome, target: &str, config_errors: &[RegistryError]) -> Vec<String> {
    let mut lines = vec![
        format!("Run {} against '{}':", outcome.run_id, target),
        format!(
            "  {} location(s) from {} plugin(s) ({} failed, {} skipped)",
            outcome.locations.len(),
            outcome.results.len(),
            outcome.failed(),
            outcome.skipped()
        ),
    ];
    for error in config_errors {
        lines.push(format!("  ! {}", error));
    }
    for line in outcome.failure_report() {
        lines.push(format!("  ! {}", line));
    }
    lines
}

fn preview(locations: &[LocationPoint]) {
    for point in locations.iter().take(PREVIEW_ROWS) {
        let marker = if point.timestamp_is_estimated { "~" } else { " " };
        println!(
            " {}{}  {:.5},{:.5}  {}  {}",
            marker,
            point.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            point.latitude,
            point.longitude,
            point.source,
            point.context
        );
    }
    if locations.len() > PREVIEW_ROWS {
        println!(
            "  ... and {} more (use --export to write the full dataset)",
            locations.len() - PREVIEW_ROWS
        );
    }
}

/// Parse a date bound: full RFC 3339, or a bare date that expands to the
/// start (for --from) or end (for --to) of that UTC day.
fn parse_when(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(timestamp) = value.parse::<DateTime<Utc>>() {
        return Ok(timestamp);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| anyhow!("'{}' is neither RFC 3339 nor YYYY-MM-DD", value))?;
    let midnight = date.and_time(NaiveTime::MIN).and_utc();
    if end_of_day {
        Ok(midnight + Duration::days(1) - Duration::seconds(1))
    } else {
        Ok(midnight)
    }
}

fn parse_center(value: &str) -> Result<(f64, f64)> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| anyhow!("--center must be LAT,LON"))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .with_context(|| format!("latitude '{}' is not a number", lat.trim()))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .with_context(|| format!("longitude '{}' is not a number", lon.trim()))?;
    anyhow::ensure!((-90.0..=90.0).contains(&lat), "latitude {} out of range", lat);
    anyhow::ensure!(
        (-180.0..=180.0).contains(&lon),
        "longitude {} out of range",
        lon
    );
    Ok((lat, lon))
}

fn parse_export_spec(value: &str) -> Result<(Box<dyn Exporter>, PathBuf)> {
    let (format, path) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("--export must be FORMAT=PATH, e.g. csv=run.csv"))?;
    let exporter = exporter_for(format).ok_or_else(|| {
        anyhow!(
            "unknown export format '{}' (supported: {})",
            format,
            SUPPORTED_FORMATS.join(", ")
        )
    })?;
    anyhow::ensure!(!path.is_empty(), "--export is missing a path after '='");
    Ok((exporter, PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_when_accepts_rfc3339_and_bare_dates() {
        let exact = parse_when("2024-03-05T08:30:00Z", false).unwrap();
        assert_eq!(exact, "2024-03-05T08:30:00Z".parse::<DateTime<Utc>>().unwrap());

        let from = parse_when("2024-03-05", false).unwrap();
        assert_eq!(from, "2024-03-05T00:00:00Z".parse::<DateTime<Utc>>().unwrap());

        let to = parse_when("2024-03-05", true).unwrap();
        assert_eq!(to, "2024-03-05T23:59:59Z".parse::<DateTime<Utc>>().unwrap());

        assert!(parse_when("yesterday", false).is_err());
    }

    #[test]
    fn parse_center_validates_ranges() {
        assert_eq!(parse_center("48.8566, 2.3522").unwrap(), (48.8566, 2.3522));
        assert!(parse_center("48.8566").is_err());
        assert!(parse_center("91.0,0.0").is_err());
        assert!(parse_center("0.0,181.0").is_err());
        assert!(parse_center("here,there").is_err());
    }

    #[test]
    fn parse_export_spec_rejects_bad_input() {
        let (exporter, path) = parse_export_spec("kml=out/run.kml").unwrap();
        assert_eq!(exporter.format(), "kml");
        assert_eq!(path, PathBuf::from("out/run.kml"));

        assert!(parse_export_spec("csv").is_err());
        assert!(parse_export_spec("gpx=run.gpx").is_err());
        assert!(parse_export_spec("csv=").is_err());
    }

    #[test]
    fn cli_parses_run_and_plugins_commands() {
        use clap::Parser;

        let cli = Cli::parse_from([
            "waymark", "run", "--target", "subject", "--from", "2024-01-01", "--to",
            "2024-01-31", "--center", "48.85,2.35", "--radius", "5", "--export",
            "csv=out.csv", "--export", "json=out.json",
        ]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.target, "subject");
                assert_eq!(args.exports.len(), 2);
                assert_eq!(args.radius, Some(5.0));
            }
            other => panic!("expected run, got {:?}", other),
        }

        let cli = Cli::parse_from(["waymark", "plugins", "--verbose", "-q"]);
        assert!(cli.quiet);
        match cli.command {
            Command::Plugins(args) => assert!(args.verbose),
            other => panic!("expected plugins, got {:?}", other),
        }
    }

    #[test]
    fn run_report_includes_config_errors_and_failures() {
        use uuid::Uuid;
        use waymark_engine::types::{ExecutionErrorKind, ExecutionResult};

        let outcome = RunOutcome {
            run_id: Uuid::nil(),
            generation: 1,
            locations: Vec::new(),
            results: vec![ExecutionResult {
                plugin_name: "ip_trace".into(),
                locations: Vec::new(),
                error: Some(ExecutionErrorKind::RuntimeFailure {
                    message: "lookup table unreadable".into(),
                }),
                duration: std::time::Duration::from_millis(3),
                error_count: 1,
            }],
        };
        let config_errors = vec![RegistryError::Configuration {
            plugin: "social_archive".into(),
            detail: "archive_dir does not exist".into(),
        }];

        let lines = run_report(&outcome, "subject", &config_errors);
        assert!(lines[0].contains("against 'subject'"));
        assert!(lines[1].contains("0 location(s) from 1 plugin(s) (1 failed, 0 skipped)"));
        assert!(lines
            .iter()
            .any(|l| l.contains("configuration error for plugin 'social_archive'")));
        assert!(lines.iter().any(|l| l.contains("ip_trace: runtime failure")));
    }

    #[test]
    fn radius_requires_center_and_vice_versa() {
        use clap::Parser;

        assert!(Cli::try_parse_from(["waymark", "run", "--target", "t", "--radius", "5"]).is_err());
        assert!(
            Cli::try_parse_from(["waymark", "run", "--target", "t", "--center", "1,2"]).is_err()
        );
    }
}
