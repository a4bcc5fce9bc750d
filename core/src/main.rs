//! MCL: Monte Carlo localization of a planar vehicle against a known landmark map.
//!
//! The program can:
//! - `run`: localize a vehicle from recorded controls and landmark observations and compare against ground truth
//! - `generate`: synthesize ground truth and observations for a map and a control sequence
//! - `config`: write a template configuration file (TOML/JSON/YAML)

use clap::{Args, Parser, Subcommand};
use log::info;
use mcl::map::Map;
use mcl::particle::{ParticleAveragingStrategy, ParticleResamplingStrategy};
use mcl::sim::{LocalizationResult, Scenario, SimulationConfig, read_controls, run_simulation, summarize};
use mcl::Pose;
use nalgebra::Vector2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::error::Error;
use std::path::{Path, PathBuf};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Monte Carlo localization against a known landmark map.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Debug)]
enum Command {
    #[command(
        name = "run",
        about = "Run the particle filter over a recorded dataset",
        long_about = "Run the particle filter over a dataset made of a landmark map, per-step controls, per-step landmark observations and ground truth poses. The filter estimate at every step is written to a CSV file together with its error against ground truth."
    )]
    Run(RunArgs),
    #[command(
        name = "generate",
        about = "Generate a synthetic dataset",
        long_about = "Drive a vehicle through a landmark map with the given controls and record the ground truth poses and the landmark observations a range-limited sensor would report."
    )]
    Generate(GenerateArgs),
    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Dataset inputs shared by the subcommands
#[derive(Args, Clone, Debug)]
struct DatasetArgs {
    /// Landmark map CSV (id,x,y)
    #[arg(long, value_parser)]
    map: PathBuf,

    /// Controls CSV (velocity,yaw_rate), one row per step
    #[arg(long, value_parser)]
    controls: PathBuf,
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Observations CSV (step,x,y) in the vehicle frame
    #[arg(long, value_parser)]
    observations: PathBuf,

    /// Ground truth CSV (x,y,theta), one row per step
    #[arg(long, value_parser)]
    truth: PathBuf,

    /// Output CSV file path for the per-step results
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Simulation configuration file (TOML/JSON/YAML); defaults are used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of particles
    #[arg(long)]
    particles: Option<usize>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the resampling strategy
    #[arg(long, value_enum)]
    resampling: Option<ParticleResamplingStrategy>,

    /// Override the strategy used to reduce the particles to a single estimate
    #[arg(long, value_enum)]
    averaging: Option<ParticleAveragingStrategy>,
}

#[derive(Args, Clone, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Initial x position in meters
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    start_x: f64,

    /// Initial y position in meters
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    start_y: f64,

    /// Initial heading in radians
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    start_theta: f64,

    /// Time step in seconds
    #[arg(long, default_value_t = 0.1)]
    dt: f64,

    /// Sensor range in meters
    #[arg(long, default_value_t = 50.0)]
    sensor_range: f64,

    /// Observation noise standard deviation along the vehicle x axis (m)
    #[arg(long, default_value_t = 0.3)]
    noise_x: f64,

    /// Observation noise standard deviation along the vehicle y axis (m)
    #[arg(long, default_value_t = 0.3)]
    noise_y: f64,

    /// Random seed for the observation noise
    #[arg(long)]
    seed: Option<u64>,

    /// Directory that receives map.csv, controls.csv, observations.csv and truth.csv
    #[arg(short, long, value_parser)]
    output_dir: PathBuf,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file path for the config file
    /// File extension determines format: .json, .yaml/.yml, or .toml (recommended)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// Initialize the logger with the specified level and optional file output.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file. If None, logs to stderr
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        ensure_parent_dir(log_path)?;
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Resolve the run configuration: file (or defaults) first, then command line overrides.
fn resolve_config(args: &RunArgs) -> Result<SimulationConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            SimulationConfig::from_file(path)?
        }
        None => SimulationConfig::default(),
    };
    if let Some(particles) = args.particles {
        config.filter.num_particles = particles;
    }
    if args.seed.is_some() {
        config.filter.seed = args.seed;
    }
    if let Some(strategy) = args.resampling {
        config.filter.resampling_strategy = strategy;
    }
    if let Some(strategy) = args.averaging {
        config.filter.averaging_strategy = strategy;
    }
    Ok(config)
}

fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = resolve_config(args)?;
    let scenario = Scenario::from_csv(
        &args.dataset.map,
        &args.dataset.controls,
        &args.observations,
        &args.truth,
    )?;
    let results = run_simulation(&config, &scenario)?;
    ensure_parent_dir(&args.output)?;
    LocalizationResult::to_csv(&results, &args.output)?;
    info!(
        "Wrote {} results to {}",
        results.len(),
        args.output.display()
    );
    println!("{}", summarize(&results));
    Ok(())
}

fn generate(args: &GenerateArgs) -> Result<(), Box<dyn Error>> {
    let map = Map::from_csv(&args.dataset.map)?;
    let controls = read_controls(&args.dataset.controls)?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let scenario = Scenario::generate(
        map,
        Pose::new(args.start_x, args.start_y, args.start_theta),
        controls,
        args.dt,
        args.sensor_range,
        Vector2::new(args.noise_x, args.noise_y),
        &mut rng,
    )?;
    std::fs::create_dir_all(&args.output_dir)?;
    let dir = &args.output_dir;
    scenario.to_csv(
        dir.join("map.csv"),
        dir.join("controls.csv"),
        dir.join("observations.csv"),
        dir.join("truth.csv"),
    )?;
    info!(
        "Generated {} steps with {} observations into {}",
        scenario.steps(),
        scenario.observations.iter().map(Vec::len).sum::<usize>(),
        dir.display()
    );
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    ensure_parent_dir(&args.output)?;
    SimulationConfig::default().to_file(&args.output)?;
    println!("Configuration file written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match &cli.command {
        Command::Run(args) => run(args),
        Command::Generate(args) => generate(args),
        Command::CreateConfig(args) => create_config_file(args),
    }
}
