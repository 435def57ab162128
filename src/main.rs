use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use csep::catalog::Catalog;
use csep::config::{EvaluationConfig, SeedMode};
use csep::error::{EvalError, Result};
use csep::evaluation::{self, RunContext, TestKind, TestResult};
use csep::forecast::RateModel;
use csep::logging::{LogConfig, LogFormat, LogLevel, init_logging};
use csep::random;
use csep::rate_cache::{ForecastPeriod, ForecastSource, RateCacheService};
use csep::ratio_test;
use csep::statistical_test;
use csep::summary::SummaryStore;
use csep::types::GroupId;

#[derive(Parser)]
#[command(name = "csep")]
#[command(version, about = "Evaluate gridded earthquake forecasts against observed catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// TOML evaluation config; omitted keys keep their defaults
    #[arg(long, global = true, env = "CSEP_CONFIG")]
    config: Option<PathBuf>,

    /// trace, debug, info, warn, error or off
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// human or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Results directory
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one N, L, CL, M, S or R test for a date and fold it into the cumulative summary
    Evaluate(EvaluateArgs),
    /// T and W comparison of every forecast in a group
    Compare(CompareArgs),
    /// Rebuild a cumulative summary from its raw records
    Recompute {
        /// Summary JSON file
        summary: PathBuf,
    },
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// N, L, CL, M, S or R
    #[arg(long)]
    test: TestKind,

    /// Forecast files; the R-test pairs every forecast with every later one
    #[arg(long = "forecast", required = true)]
    forecasts: Vec<PathBuf>,

    /// ZMAP catalog of observed events
    #[arg(long)]
    catalog: PathBuf,

    /// Modified catalogs (location or magnitude uncertainty applied)
    #[arg(long = "modification")]
    modifications: Vec<PathBuf>,

    #[arg(long)]
    date: NaiveDate,

    #[arg(long)]
    simulations: Option<u32>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    seed_mode: Option<SeedMode>,

    #[arg(long)]
    seed_dir: Option<PathBuf>,

    /// Score every bin, ignoring forecast masks
    #[arg(long)]
    no_mask: bool,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Forecast group identifier
    #[arg(long)]
    group: String,

    #[arg(long = "forecast", required = true)]
    forecasts: Vec<PathBuf>,

    /// Catalog covering the cumulative window
    #[arg(long)]
    catalog: PathBuf,

    /// First day of the forecast period the files cover
    #[arg(long)]
    period_start: NaiveDate,

    /// Day after the last day of the forecast period
    #[arg(long)]
    period_end: NaiveDate,

    /// First day of the cumulative test window
    #[arg(long)]
    cumulative_start: NaiveDate,

    #[arg(long)]
    date: NaiveDate,
}

fn load_config(global: &GlobalOpts) -> Result<EvaluationConfig> {
    let mut config = match &global.config {
        Some(path) => EvaluationConfig::load(path)?,
        None => EvaluationConfig::canonical(),
    };
    if let Some(dir) = &global.output_dir {
        config.output_dir = dir.clone();
    }
    Ok(config)
}

fn model_name(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "forecast".into())
}

fn read_forecast(path: &Path) -> Result<RateModel> {
    RateModel::parse(model_name(path), &fs::read_to_string(path)?)
}

fn read_catalog(path: &Path) -> Result<Catalog> {
    if !path.exists() {
        return Err(EvalError::MissingCatalog(path.display().to_string()));
    }
    Catalog::parse(&fs::read_to_string(path)?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn record(result: &TestResult, date: NaiveDate, config: &EvaluationConfig) -> Result<()> {
    let label = result.models_label();
    let dir = config.output_dir.join(date.to_string());
    write_json(&dir.join(format!("{}_{label}-result.json", result.kind.name())), result)?;

    let store = SummaryStore::for_test(&config.output_dir, result.kind, &result.models);
    let mut summary = store.load_or_new(result.kind, &result.models)?;
    summary.update(result, date)?;
    store.save(&summary)?;
    for (s, v) in &result.statistics {
        println!("{date} {} {label} {s} {v}", result.kind);
    }
    Ok(())
}

fn run_evaluate(args: EvaluateArgs, mut config: EvaluationConfig) -> Result<()> {
    if let Some(n) = args.simulations {
        config.number_simulations = n;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(mode) = args.seed_mode {
        config.seed_mode = mode;
    }
    if args.seed_dir.is_some() {
        config.seed_dir = args.seed_dir;
    }
    if args.no_mask {
        config.use_mask = false;
    }
    config.validate()?;

    let forecasts = args.forecasts.iter().map(|p| read_forecast(p)).collect::<Result<Vec<_>>>()?;
    let catalog = read_catalog(&args.catalog)?;
    let modifications = args.modifications.iter().map(|p| read_catalog(p)).collect::<Result<Vec<_>>>()?;
    let stream = random::from_config(&config)?;
    let ctx = RunContext { config: &config, stream: stream.as_ref() };
    info!(test = %args.test, forecasts = forecasts.len(), events = catalog.len(), date = %args.date, "evaluating");

    let results = if args.test == TestKind::Ratio {
        ratio_test::evaluate_group(&forecasts, &catalog, &modifications, &ctx)?
    } else {
        forecasts
            .iter()
            .map(|f| evaluation::evaluate(args.test, &[f], &catalog, &modifications, &ctx))
            .collect::<Result<Vec<_>>>()?
    };
    for result in &results {
        record(result, args.date, &config)?;
    }
    Ok(())
}

fn run_compare(args: CompareArgs, config: EvaluationConfig) -> Result<()> {
    let models = args.forecasts.iter().map(|p| read_forecast(p)).collect::<Result<Vec<_>>>()?;
    let catalog = read_catalog(&args.catalog)?;
    let period = ForecastPeriod { start: args.period_start, end: args.period_end, models };
    let source = ForecastSource::for_window(args.cumulative_start, vec![period])?;
    let group = GroupId(args.group);
    let mut service = RateCacheService::new();
    let comparison = statistical_test::compare(
        &mut service,
        &group,
        &source,
        &catalog,
        args.cumulative_start,
        args.date,
        config.min_statistical_events,
    )?;
    let path = config.output_dir.join(args.date.to_string()).join(format!("{group}-TW.json"));
    write_json(&path, &comparison)?;
    println!("{}", path.display());
    Ok(())
}

fn run_recompute(path: PathBuf) -> Result<()> {
    let store = SummaryStore::new(path);
    let Some(mut summary) = store.load()? else {
        return Err(EvalError::Config(format!("no summary at {}", store.path().display())));
    };
    let report = summary.recompute();
    store.save(&summary)?;
    println!("dates={} max_drift={:e} consistent={}", summary.len(), report.max_drift, report.consistent);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_env(cli.global.log_level, cli.global.log_format));

    let outcome = load_config(&cli.global).and_then(|config| match cli.command {
        Commands::Evaluate(args) => run_evaluate(args, config),
        Commands::Compare(args) => run_compare(args, config),
        Commands::Recompute { summary } => run_recompute(summary),
    });
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_skip() => {
            info!(reason = %e, "test skipped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "evaluation failed");
            ExitCode::FAILURE
        }
    }
}
