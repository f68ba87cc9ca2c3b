use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use itertools::Itertools;
use mimalloc::MiMalloc;
use tilecost_boost::BoostParams;
use tilecost_collect::{
    CollectConfig, Collector, MEASURE_FILE, ProcessLauncher, load_workloads,
};
use tilecost_label::{ClusterStrategy, CostScale, Grouping, LabelConfig};
use tilecost_model::{Evaluation, Predictor, TrainConfig, TrainTarget};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Preprocessed file written by `label` and read by `train`.
const PREPROCESSED_FILE: &str = "preprocessed";

/// Learn a cost model for tiling decisions from measured tile timings.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Time tile plans by running the compiler driver once per workload part
    ///
    /// Crashed parts are retried; measurements are appended to the raw log
    /// in the training directory.
    Collect(CollectArgs),

    /// Normalize raw timings and cluster them into performance classes
    Label(LabelArgs),

    /// Fit one regressor per structural key and save the model store
    Train(TrainArgs),

    /// Score feature lines with a saved model store
    ///
    /// Prints one prediction per non-blank input line.
    Predict(PredictArgs),
}

#[derive(Args)]
struct CollectArgs {
    /// Training directory shared with the compiler driver
    #[arg(long, env = "CM_TRAIN_DIR")]
    train_dir: PathBuf,

    /// JSON file listing the workloads to collect
    #[arg(short, long)]
    workloads: PathBuf,

    /// Compiler driver to launch for each part
    #[arg(short, long)]
    program: PathBuf,

    /// Timing iterations per tile plan
    #[arg(long, default_value_t = 1)]
    iterations: u32,

    /// Consecutive unsuccessful launches before a case is abandoned
    #[arg(long, default_value_t = 8)]
    max_attempts: u32,

    /// Kill a part that runs longer than this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Delete regular files in the training directory first
    #[arg(long)]
    fresh: bool,

    /// Extra arguments for the compiler driver
    #[arg(last = true)]
    driver_args: Vec<String>,
}

#[derive(Args)]
struct LabelArgs {
    /// Training directory holding the raw log
    #[arg(long, env = "CM_TRAIN_DIR")]
    train_dir: PathBuf,

    /// Raw log (defaults to `<train-dir>/measure`)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Preprocessed output (defaults to `<train-dir>/preprocessed`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of performance classes
    #[arg(short = 'k', long, default_value_t = 4)]
    classes: usize,

    /// Partition samples by `case` tag or structural `key`
    #[arg(long, default_value_t = Grouping::Case)]
    grouping: Grouping,

    /// Clustering algorithm: `kmeans` or `gmm`
    #[arg(long, default_value_t = ClusterStrategy::KMeans)]
    strategy: ClusterStrategy,

    /// Scale to cluster on: `log10` or `raw`
    #[arg(long, default_value_t = CostScale::Log10)]
    scale: CostScale,

    /// Iteration cap for the clustering algorithm
    #[arg(long, default_value_t = 300)]
    max_iterations: usize,
}

#[derive(Args)]
struct TrainArgs {
    /// Training directory holding the preprocessed file
    #[arg(long, env = "CM_TRAIN_DIR")]
    train_dir: PathBuf,

    /// Preprocessed input (defaults to `<train-dir>/preprocessed`)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Where to save models (defaults to the training directory)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Regression target: `log-cost` or `class`
    #[arg(long, default_value_t = TrainTarget::LogCost)]
    target: TrainTarget,

    /// Hold out this fraction of each key's rows for evaluation
    #[arg(long)]
    holdout: Option<f64>,

    /// Seed for the holdout split and row sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Boosting rounds
    #[arg(long, default_value_t = BoostParams::default().num_rounds)]
    rounds: usize,

    /// Maximum tree depth
    #[arg(long, default_value_t = BoostParams::default().max_depth)]
    max_depth: usize,

    /// Learning rate
    #[arg(long, default_value_t = BoostParams::default().eta)]
    eta: f64,

    /// Fraction of rows sampled per round
    #[arg(long, default_value_t = BoostParams::default().subsample)]
    subsample: f64,

    /// L1 regularization on leaf weights
    #[arg(long, default_value_t = BoostParams::default().alpha)]
    alpha: f64,

    /// L2 regularization on leaf weights
    #[arg(long, default_value_t = BoostParams::default().lambda)]
    lambda: f64,
}

#[derive(Args)]
struct PredictArgs {
    /// Directory holding the saved model store
    #[arg(long, env = "CM_TRAIN_DIR")]
    train_dir: PathBuf,

    /// Feature lines to score, one per line
    #[arg(long, env = "TEST_DATA")]
    test_data: PathBuf,

    /// Output file (writes to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so predictions on stdout stay pipeable. Default to
    // warn, allowlist our crates.
    const CRATES: &[&str] = &[
        "tilecost",
        "tilecost_boost",
        "tilecost_collect",
        "tilecost_label",
        "tilecost_model",
        "tilecost_schemas",
    ];
    let level = cli.verbose.tracing_level_filter();
    let allowlist = CRATES.iter().map(|c| format!("{c}={level}")).join(",");
    let filter = EnvFilter::new(format!("warn,{allowlist}"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
        .init();

    match cli.command {
        Commands::Collect(args) => collect(args, &level.to_string()),
        Commands::Label(args) => label(args),
        Commands::Train(args) => train(args),
        Commands::Predict(args) => predict(args),
    }
}

fn collect(args: CollectArgs, verbosity: &str) -> Result<()> {
    let workloads = load_workloads(BufReader::new(open(&args.workloads)?))?;

    let config = CollectConfig {
        train_dir: args.train_dir,
        iterations: args.iterations,
        max_attempts: args.max_attempts,
        fresh: args.fresh,
    };
    let launcher = ProcessLauncher::new(args.program)
        .args(args.driver_args)
        .verbosity(verbosity)
        .timeout(args.timeout_secs.map(Duration::from_secs));

    let mut collector = Collector::new(config, launcher)?;
    let summary = collector.run(&workloads)?;
    info!(
        log = %collector.progress().path(MEASURE_FILE).display(),
        "collection finished"
    );
    summary.write_report(std::io::stderr().lock())?;
    Ok(())
}

fn label(args: LabelArgs) -> Result<()> {
    let config = LabelConfig {
        num_classes: args.classes,
        grouping: args.grouping,
        strategy: args.strategy,
        scale: args.scale,
        max_iterations: args.max_iterations,
    };
    config.validate()?;

    let input = args
        .input
        .unwrap_or_else(|| args.train_dir.join(MEASURE_FILE));
    let output = args
        .output
        .unwrap_or_else(|| args.train_dir.join(PREPROCESSED_FILE));

    // Label fully before touching the output, so a bad raw log leaves the
    // previous preprocessed file in place.
    let reader = BufReader::new(open(&input)?);
    let mut preprocessed = Vec::new();
    let labeling = tilecost_label::run(reader, &mut preprocessed, &config)?;
    let mut writer = BufWriter::new(create(&output)?);
    writer.write_all(&preprocessed)?;
    writer.flush()?;
    info!(output = %output.display(), "wrote preprocessed samples");
    labeling.write_report(std::io::stderr().lock())?;
    Ok(())
}

fn train(args: TrainArgs) -> Result<()> {
    let mut params = BoostParams {
        num_rounds: args.rounds,
        max_depth: args.max_depth,
        eta: args.eta,
        subsample: args.subsample,
        alpha: args.alpha,
        lambda: args.lambda,
        ..BoostParams::default()
    };
    if let Some(seed) = args.seed {
        params.seed = seed;
    }
    let evaluation = match args.holdout {
        Some(fraction) => Evaluation::Holdout {
            fraction,
            seed: params.seed,
        },
        None => Evaluation::TrainingSet,
    };
    let config = TrainConfig {
        params,
        target: args.target,
        evaluation,
    };
    config.validate()?;

    let input = args
        .input
        .unwrap_or_else(|| args.train_dir.join(PREPROCESSED_FILE));
    let model_dir = args.model_dir.unwrap_or(args.train_dir);

    let reader = BufReader::new(open(&input)?);
    let training = tilecost_model::run(reader, &model_dir, &config)?;
    info!(dir = %model_dir.display(), "saved models");
    training.write_report(std::io::stderr().lock())?;
    Ok(())
}

fn predict(args: PredictArgs) -> Result<()> {
    let predictor = Predictor::load(&args.train_dir).with_context(|| {
        format!("failed to load models from {}", args.train_dir.display())
    })?;
    let reader = BufReader::new(open(&args.test_data)?);
    let predictions = predictor.predict_reader(reader)?;

    // Stdout must outlive the lock, so bind it first.
    let stdout = std::io::stdout();
    let mut writer: Box<dyn Write> = match args.output {
        Some(path) => Box::new(BufWriter::new(create(&path)?)),
        None => Box::new(stdout.lock()),
    };
    for p in &predictions {
        writeln!(writer, "{}", p.value)?;
    }
    writer.flush()?;
    Ok(())
}

fn open(path: &Path) -> Result<File> {
    File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn create(path: &Path) -> Result<File> {
    File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))
}
