//! Print the uniforms a simulation trial draws, one per line, for checking
//! recorded seed trees or comparing runs.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use csep::config::{EvaluationConfig, SeedMode};
use csep::random::{self, SeedKey};
use csep::types::{SimulationIndex, SubIteration};

#[derive(Parser)]
#[command(name = "seed_numbers", about = "Print the uniforms addressed by one seed key")]
struct Cli {
    /// Test name, e.g. LTest
    #[arg(long)]
    test: String,

    /// Models of the run joined with '_'; defaults to the subject
    #[arg(long)]
    models: Option<String>,

    /// Forecast being simulated
    #[arg(long)]
    subject: String,

    /// 1-based simulation index
    #[arg(long, default_value_t = 1)]
    index: u32,

    #[arg(long, default_value_t = 1)]
    iteration: u32,

    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Location draws of a CL, M or S trial
    #[arg(long)]
    fixed_count: bool,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    seed_mode: Option<SeedMode>,

    #[arg(long)]
    seed_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = EvaluationConfig::canonical();
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(mode) = cli.seed_mode {
        config.seed_mode = mode;
    }
    config.seed_dir = cli.seed_dir;

    let models = cli.models.unwrap_or_else(|| cli.subject.clone());
    let key = SeedKey::new(&cli.test, &models, &cli.subject, SimulationIndex(cli.index), SubIteration(cli.iteration));
    let key = if cli.fixed_count { key.for_fixed_count() } else { key };
    let uniforms = random::from_config(&config).and_then(|stream| stream.uniforms(&key, cli.count));
    match uniforms {
        Ok(values) => {
            for u in values {
                println!("{u}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{key}: {e}");
            ExitCode::FAILURE
        }
    }
}
