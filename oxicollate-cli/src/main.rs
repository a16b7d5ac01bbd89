mod commands;
mod display;

use std::io::BufRead;

use clap::{Parser, Subcommand};
use oxicollate::CollationValidator;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oxicollate", about = "Collation-aware value comparison and sort keys")]
struct Cli {
    /// Collation document, e.g. '{"locale": "en_US", "strength": 2}' (default: simple)
    #[arg(long, global = true)]
    collation: Option<String>,

    /// Output raw JSON (no pretty-printing)
    #[arg(long, global = true)]
    json: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a collation document and print every resolved attribute
    Validate { spec: String },
    /// Compare two values (JSON, or bare strings)
    Compare { a: String, b: String },
    /// Print the hex sort key of a value
    Key { value: String },
    /// Sort values; reads one value per line from stdin when none are given
    Sort {
        values: Vec<String>,
        /// Sort in descending order
        #[arg(long)]
        desc: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("oxicollate=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let validator = CollationValidator::builtin();
    let response = match run(&cli, &validator) {
        Ok(data) => commands::ok(data),
        Err(e) => commands::failed(e),
    };

    let failed = response.get("ok").and_then(|v| v.as_bool()) != Some(true);
    println!("{}", display::format_response(&response, cli.json));
    if failed {
        std::process::exit(1);
    }
}

fn run(cli: &Cli, validator: &CollationValidator) -> oxicollate::Result<Value> {
    let collation = || {
        let spec = commands::resolve_collation(validator, cli.collation.as_deref())?;
        tracing::debug!(collation = %spec, "resolved collation");
        Ok::<_, oxicollate::Error>(spec)
    };
    Ok(match &cli.command {
        Command::Validate { spec } => commands::validate(validator, spec)?,
        Command::Compare { a, b } => commands::compare(a, b, &collation()?),
        Command::Key { value } => commands::key(value, &collation()?),
        Command::Sort { values, desc } => {
            let values = if values.is_empty() { read_stdin() } else { values.clone() };
            commands::sort(&values, &collation()?, *desc)
        }
    })
}

fn read_stdin() -> Vec<String> {
    std::io::stdin()
        .lock()
        .lines()
        .map_while(|line| line.ok())
        .filter(|line| !line.trim().is_empty())
        .collect()
}
