use anyhow::{Context, Result};
use cadence_cli::{SimulateOptions, run_simulation};
use cadence_core::{RenderPriority, RuntimeConfig, ms_to_expiration_time};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence scheduler CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic workload and print what the scheduler did
    Simulate {
        /// Number of normal-priority jobs
        #[arg(long, default_value_t = 8)]
        jobs: u32,
        /// Work units per job
        #[arg(long, default_value_t = 50)]
        units: u32,
        /// Cost of one unit in milliseconds
        #[arg(long, default_value_t = 2.0)]
        unit_cost_ms: f64,
        /// Number of user-blocking interruptions
        #[arg(long, default_value_t = 5)]
        interruptions: u32,
        /// Time between interruptions in milliseconds
        #[arg(long, default_value_t = 40.0)]
        interrupt_every_ms: f64,
        /// Sync callbacks queued by each interruption
        #[arg(long, default_value_t = 2)]
        sync_per_interruption: u32,
        /// Refresh interval of the simulated display
        #[arg(long, default_value_t = 16.0)]
        frame_interval_ms: f64,
        /// Simulate a host without animation frames
        #[arg(long)]
        no_frames: bool,
        /// Use the system clock instead of virtual time
        #[arg(long)]
        real_time: bool,
        /// JSON runtime configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the expiration time for a request made at a given time
    Expiration {
        /// Request time in milliseconds
        #[arg(long)]
        at_ms: f64,
        #[arg(long, value_enum, default_value = "normal")]
        priority: PriorityArg,
        /// JSON runtime configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Immediate,
    UserBlocking,
    Normal,
    Low,
    Idle,
}

impl From<PriorityArg> for RenderPriority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Immediate => RenderPriority::Immediate,
            PriorityArg::UserBlocking => RenderPriority::UserBlocking,
            PriorityArg::Normal => RenderPriority::Normal,
            PriorityArg::Low => RenderPriority::Low,
            PriorityArg::Idle => RenderPriority::Idle,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    RuntimeConfig::from_json_str(&json).with_context(|| format!("in {}", path.display()))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            jobs,
            units,
            unit_cost_ms,
            interruptions,
            interrupt_every_ms,
            sync_per_interruption,
            frame_interval_ms,
            no_frames,
            real_time,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let options = SimulateOptions {
                jobs,
                units_per_job: units,
                unit_cost_ms,
                interruptions,
                interrupt_every_ms,
                sync_per_interruption,
                frame_interval_ms: (!no_frames).then_some(frame_interval_ms),
                real_time,
            };
            let report = run_simulation(options, &config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Expiration {
            at_ms,
            priority,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let priority = RenderPriority::from(priority);
            let current_time = ms_to_expiration_time(at_ms);
            let expiration =
                config
                    .expiration
                    .compute_expiration_for_mode(config.mode, current_time, priority);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "current_time": current_time,
                    "priority": priority,
                    "expiration_time": expiration,
                    "label": expiration.to_string(),
                }))?
            );
        }
    }

    Ok(())
}

