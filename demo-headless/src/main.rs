use clap::{Parser, ValueEnum};
use nebula_sim_core::solver::projection::mean_abs_divergence;
use nebula_sim_core::{
    BackendPreference, FieldId, NebulaSimulation, QualityPreset, SimError, SimulationConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Headless nebula simulation runner
#[derive(Parser, Debug)]
#[command(name = "nebula-sim-demo")]
#[command(about = "Runs the nebula gas simulation without a renderer and reports field statistics", long_about = None)]
struct Args {
    /// Number of ticks to run
    #[arg(short, long, default_value_t = 100)]
    ticks: u32,

    /// Timestep per tick in seconds
    #[arg(long, default_value_t = 1.0 / 60.0)]
    dt: f32,

    /// Grid resolution preset (`auto` picks one for this machine)
    #[arg(short, long, value_enum, default_value_t = Quality::Low)]
    quality: Quality,

    /// Seed for the procedural backbone (overrides the config file)
    #[arg(short, long, conflicts_with = "random_seed")]
    seed: Option<u64>,

    /// Start from a fresh random backbone instead of the configured seed
    #[arg(long)]
    random_seed: bool,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Force the CPU backend
    #[arg(long)]
    cpu: bool,

    /// Print statistics every N ticks
    #[arg(short, long, default_value_t = 10)]
    report_interval: u32,

    /// Show debug output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Quality {
    Auto,
    Low,
    Medium,
    High,
}

impl Quality {
    fn preset(self, gpu: bool) -> QualityPreset {
        match self {
            Quality::Auto => QualityPreset::recommended(gpu),
            Quality::Low => QualityPreset::Low,
            Quality::Medium => QualityPreset::Medium,
            Quality::High => QualityPreset::High,
        }
    }
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> Result<SimulationConfig, String> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path).map_err(|e| e.to_string())?,
        None => SimulationConfig {
            quality: args.quality.preset(cfg!(feature = "gpu") && !args.cpu),
            ..SimulationConfig::default()
        },
    };

    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.cpu {
        config.backend = BackendPreference::Cpu;
    }
    Ok(config)
}

/// Density and divergence summary of the simulated fields
struct TickReport {
    total_density: f64,
    peak_density: f32,
    mean_divergence: f64,
    peak_backbone: f32,
}

fn report(sim: &NebulaSimulation) -> Result<TickReport, SimError> {
    let grid = sim.layout().grid;
    let density = sim.read_field(FieldId::Density)?;
    let total_density = density.iter().map(|v| f64::from(*v)).sum();
    let peak_density = density.iter().copied().fold(0.0_f32, f32::max);

    let vx = sim.read_field(FieldId::VelocityX)?;
    let vy = sim.read_field(FieldId::VelocityY)?;
    let vz = sim.read_field(FieldId::VelocityZ)?;
    let mean_divergence = mean_abs_divergence(grid, &vx, &vy, &vz, 1);

    let field = sim.renderable_field()?;
    let peak_backbone = field.data.iter().copied().fold(0.0_f32, f32::max);

    Ok(TickReport {
        total_density,
        peak_density,
        mean_divergence,
        peak_backbone,
    })
}

fn run(args: &Args) -> Result<(), String> {
    let config = build_config(args)?;
    let mut sim = NebulaSimulation::initialize_field(config).map_err(|e| e.to_string())?;
    if args.random_seed {
        sim.regenerate_random().map_err(|e| e.to_string())?;
    }

    println!("=== Nebula Simulation Demo ===\n");
    println!("Backend: {}", sim.backend_name());
    let offset = sim.seed().offset;
    println!(
        "Grid: {}  Backbone: {}  Seed offset: ({:.2}, {:.2}, {:.2})",
        sim.layout().grid,
        sim.layout().backbone,
        offset.x,
        offset.y,
        offset.z
    );
    println!("Emitters: {}  dt: {:.4}s\n", sim.emitters().len(), args.dt);

    println!(" Tick | Time(s) | Total Density | Peak Density | Mean |div| | Peak Render | Frame(ms)");
    println!("------|---------|---------------|--------------|------------|-------------|----------");

    for tick in 1..=args.ticks {
        sim.step(args.dt).map_err(|e| e.to_string())?;

        if tick % args.report_interval.max(1) == 0 || tick == args.ticks {
            let stats = report(&sim).map_err(|e| e.to_string())?;
            println!(
                "{:5} | {:7.2} | {:13.3} | {:12.4} | {:10.6} | {:11.4} | {:8.2}",
                tick,
                sim.elapsed(),
                stats.total_density,
                stats.peak_density,
                stats.mean_divergence,
                stats.peak_backbone,
                sim.last_frame_time_ms()
            );
        }
    }

    println!("\n=== Simulation Complete ===");
    println!("Ticks: {}", sim.tick_count());
    println!("Simulated time: {:.2}s", sim.elapsed());
    println!("Average frame time: {:.2} ms", sim.average_frame_time_ms());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_quality_uses_recommended_preset() {
        let args = Args::parse_from(["demo-headless", "--quality", "auto", "--cpu"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.quality, QualityPreset::recommended(false));
        assert_eq!(config.backend, BackendPreference::Cpu);
        assert_eq!(Quality::Auto.preset(true), QualityPreset::High);
    }

    #[test]
    fn test_seed_and_random_seed_conflict() {
        assert!(Args::try_parse_from(["demo-headless", "--seed", "5", "--random-seed"]).is_err());
        let args = Args::parse_from(["demo-headless", "--random-seed"]);
        assert!(args.random_seed);
        assert_eq!(build_config(&args).unwrap().seed, SimulationConfig::default().seed);
    }
}
