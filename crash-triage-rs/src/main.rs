//! crash-triage command line: locate frames, fingerprint reports and file
//! crash reports from files or stdin.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use crash_triage::{init_logging, load_settings, CrashHandler, Failure, Fingerprinter, StackInput, StackLocator};

#[derive(Debug, Parser)]
#[command(name = "crash-triage")]
#[command(about = "Fingerprint crash reports and file them against an issue tracker")]
#[command(version)]
struct Cli {
    /// Settings file (environment variables still apply on top)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the first user-code frame of a stack trace
    Locate {
        /// Trace or JSON failure file, `-` for stdin
        input: String,
    },

    /// Print the fingerprint of a JSON report
    Fingerprint {
        /// JSON report file, `-` for stdin
        input: String,
    },

    /// File a failure against the configured tracker
    Report {
        /// Trace or JSON failure file, `-` for stdin
        input: String,
    },
}

impl Commands {
    fn input(&self) -> &str {
        match self {
            Commands::Locate { input } | Commands::Fingerprint { input } | Commands::Report { input } => input,
        }
    }
}

fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading {}", source))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    init_logging(Some(settings.logging.clone()))?;

    let text = read_input(cli.command.input())?;
    // JSON documents are treated as structured failures, anything else as a raw trace.
    let parsed = serde_json::from_str::<Value>(&text).ok();

    match cli.command {
        Commands::Locate { .. } => {
            let locator = StackLocator::new().with_noise_markers(settings.tracker.extra_noise_markers.iter().cloned());
            let input = match &parsed {
                Some(value) => StackInput::Value(value),
                None => StackInput::Text(&text),
            };
            match locator.locate(Some(input)) {
                Some(location) => println!("{}", serde_json::to_string_pretty(&location)?),
                None => println!("null"),
            }
        }
        Commands::Fingerprint { .. } => {
            let value = parsed.context("fingerprint expects a JSON document")?;
            println!("{}", Fingerprinter::default().fingerprint_value(&value));
        }
        Commands::Report { .. } => {
            let failure = match parsed {
                Some(value) => Failure::Value(value),
                None => Failure::Text(text),
            };
            let handler = CrashHandler::from_config(&settings.tracker)?;
            let (_, fingerprint) = handler.prepare(&failure);
            let outcome = handler.handle(&failure).await?;
            println!(
                "{}",
                json!({ "fingerprint": fingerprint, "outcome": outcome.to_string(), "item": outcome.id() })
            );
        }
    }

    Ok(())
}
