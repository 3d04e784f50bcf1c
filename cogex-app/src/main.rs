mod app;
mod participant;
mod summary;

use app::{App, Options};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a reaction-time session against a simulated participant", long_about = None)]
struct Cli {
    /// Session configuration (JSON). Defaults apply to anything omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Seed for trial randomization and the simulated participant.
    #[arg(short, long, default_value_t = 1)]
    seed: u64,
    /// Number of experiment trials; caps practice trials too.
    #[arg(short, long)]
    trials: Option<usize>,
    /// Pace frames on the monotonic clock instead of simulated time.
    #[arg(long)]
    realtime: bool,
    /// Print the full report as JSON.
    #[arg(long)]
    json: bool,
    /// Run without the simulated eyetracker.
    #[arg(long)]
    no_tracker: bool,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let app = App::new(Options {
        config: cli.config,
        seed: cli.seed,
        trials: cli.trials,
        realtime: cli.realtime,
        json: cli.json,
        tracker: !cli.no_tracker,
    })?;
    let json = app.json();
    let report = app.run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        app::print_report(&report);
    }
    Ok(())
}
