//! Binary entry point for the counts store diagnostics CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use sombra_counts::admin::{dump, verify, CountsConfig, VerifyReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sombra-counts",
    version,
    about = "Inspect and verify counts and degrees store files",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "SOMBRA_COUNTS_CONFIG",
        help = "TOML file with store settings"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header and every entry of a store file.
    Dump {
        #[arg(value_name = "STORE")]
        path: PathBuf,
    },
    /// Check the structure and values of a store file without modifying it.
    Verify {
        #[arg(value_name = "STORE")]
        path: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    init_tracing();
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

/// Returns whether the command found the store healthy.
fn run() -> Result<bool, Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CountsConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Dump { path } => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            dump(&path, &mut out)?;
            Ok(true)
        }
        Command::Verify { path } => {
            let report = verify(&path, &config)?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print_verify_text(&report),
            }
            Ok(report.success)
        }
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify => success={} needs_rebuild={} entries={} counts={} generation={}",
        report.success,
        report.needs_rebuild,
        report.counts.entries,
        report.counts.counts_checked,
        report.counts.generation,
    );
    println!(
        "  highest_gap_free_tx_id={} stray_tx_ids={:?}",
        report.counts.highest_gap_free_tx_id, report.counts.stray_tx_ids
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}
