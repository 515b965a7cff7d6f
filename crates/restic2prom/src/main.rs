//! restic2prom - wraps a restic invocation and exports its JSON summary as a
//! Prometheus textfile.
//!
//! Usage: `restic2prom -t /var/lib/node_exporter/restic.prom -- restic --json backup /home`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use restic2prom_core::config::REPOSITORY_ENV;
use restic2prom_core::supervisor::{self, SupervisorError};
use restic2prom_core::{Aggregator, ExpositionError, ExpositionKind, RunConfig, TextfileWriter};

/// Runs restic and writes its backup metrics for the node_exporter textfile collector.
#[derive(Parser, Debug)]
#[command(name = "restic2prom", version = restic2prom_core::VERSION)]
struct Args {
    /// Destination textfile (must end in `.prom`).
    #[arg(short, long, value_name = "FILE")]
    textfile: PathBuf,

    /// Prometheus type used for summary and error metrics.
    #[arg(long, value_enum, default_value_t = Exposition::Gauge)]
    exposition: Exposition,

    /// Value of the `repo` label. Defaults to the repository restic uses.
    #[arg(long, value_name = "NAME")]
    repo_label: Option<String>,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    /// Command to run, usually `restic --json backup ...`.
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Exposition {
    Gauge,
    Histogram,
}

impl From<Exposition> for ExpositionKind {
    fn from(e: Exposition) -> Self {
        match e {
            Exposition::Gauge => ExpositionKind::Gauge,
            Exposition::Histogram => ExpositionKind::Histogram,
        }
    }
}

/// Initializes the tracing subscriber on stderr; stdout carries restic's own output.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["restic2prom", "restic2prom_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match RunConfig::new(
        args.textfile,
        args.exposition.into(),
        args.command,
        args.repo_label,
        std::env::var(REPOSITORY_ENV).ok(),
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "restic2prom {} starting: textfile={}, exposition={:?}, labels={}",
        restic2prom_core::VERSION,
        config.textfile.display(),
        config.exposition,
        config.identity
    );

    let aggregator = match Aggregator::new(config.identity.clone(), config.exposition) {
        Ok(aggregator) => Arc::new(aggregator),
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let writer = TextfileWriter::new(&config.textfile);

    // SIGINT reaches the whole process group; restic handles it and exits.
    // Staying alive lets us drain its final output and still write metrics.
    if let Err(e) = ctrlc::set_handler(|| {
        info!("Received interrupt, waiting for child to exit");
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let started = Utc::now();
    let outcome = match supervisor::run(&config.command, aggregator, &writer) {
        Ok(outcome) => outcome,
        Err(SupervisorError::Spawn { source, .. }) => {
            eprintln!("exec '{}' failed", config.command.join(" "));
            debug!("spawn error: {}", source);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match &outcome.exposition {
        Ok(()) => {}
        Err(ExpositionError::NoSummary) => eprintln!("{}", ExpositionError::NoSummary),
        Err(e) => error!("Failed to write {}: {}", writer.path().display(), e),
    }

    let code = outcome.exit_code();
    info!(
        "Child exited with {} after {}s (stdout: {} lines, stderr: {} lines, {} errors)",
        code,
        (Utc::now() - started).num_milliseconds() as f64 / 1000.0,
        outcome.stdout.lines,
        outcome.stderr.lines,
        outcome.stderr.errors
    );

    ExitCode::from(exit_byte(code))
}

/// Truncates an exit code to the byte a process can report.
fn exit_byte(code: i32) -> u8 {
    (code & 0xff) as u8
}
