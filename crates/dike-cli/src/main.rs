//! Dike CLI - evaluate Rego policy queries from the command line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dike_engine::Interpreter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Dike - a Rego policy interpreter
#[derive(Parser)]
#[command(name = "dike")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Policy module files (.rego)
    #[arg(value_name = "MODULE")]
    modules: Vec<PathBuf>,

    /// Query expression to evaluate
    #[arg(short, long)]
    query: String,

    /// Base data documents (JSON), merged in order
    #[arg(short, long, value_name = "FILE")]
    data: Vec<PathBuf>,

    /// Input document (JSON)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Write per-pass tree dumps into this directory
    #[arg(long, value_name = "DIR")]
    debug_dir: Option<PathBuf>,

    /// Skip well-formedness checks between passes
    #[arg(long)]
    no_checks: bool,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "dike=info",
        1 => "dike=debug",
        _ => "dike=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut interpreter = Interpreter::new();
    for module in &cli.modules {
        interpreter
            .add_module_file(module)
            .with_context(|| format!("loading module {}", module.display()))?;
    }
    for data in &cli.data {
        interpreter
            .add_data_json_file(data)
            .with_context(|| format!("loading data {}", data.display()))?;
    }
    if let Some(input) = &cli.input {
        interpreter
            .add_input_json_file(input)
            .with_context(|| format!("loading input {}", input.display()))?;
    }
    if let Some(dir) = &cli.debug_dir {
        interpreter.debug_path(dir).debug_enabled(true);
        if let Ok(exe) = std::env::current_exe() {
            interpreter.executable(exe);
        }
    }
    if cli.no_checks {
        interpreter.well_formed_checks_enabled(false);
    }

    let results = interpreter
        .query(&cli.query)
        .with_context(|| format!("evaluating {}", cli.query))?;
    print!("{results}");
    Ok(())
}
