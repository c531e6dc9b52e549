//! # CNC Motion
//!
//! Runs a job file through the planner, the segment runtime and the probing
//! cycle against simulated I/O.
//!
//! Without `--realtime` the job runs unpaced on simulated time. With it, RT
//! setup is performed and cycles are paced at the segment times.

use clap::Parser;
use cnc_common::axis::Axis;
use cnc_motion::config::{LoadedConfig, load_config};
use cnc_motion::cycle::{CycleRunner, rt_setup};
use cnc_motion::hal::{ContactSurface, SimIo};
use cnc_motion::kinematics::CartesianKinematics;
use cnc_motion::machine::Machine;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Upper bound on unpaced cycles before a job is considered stuck.
const MAX_UNPACED_CYCLES: u64 = 50_000_000;

/// CNC Motion: planner, segment runtime and probing cycle
#[derive(Parser, Debug)]
#[command(name = "cnc_motion")]
#[command(version)]
#[command(about = "Jerk-limited look-ahead motion planner with probing")]
struct Args {
    /// Machine configuration TOML.
    #[arg(long, default_value = "config/machine.toml")]
    config: PathBuf,

    /// Job TOML to run.
    #[arg(long, value_name = "FILE")]
    job: Option<PathBuf>,

    /// Perform RT setup and pace cycles at the segment times.
    #[arg(long)]
    realtime: bool,

    /// CPU core to pin the RT thread to (default: 1).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (default: 80).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Axis normal to the simulated probe surface.
    #[arg(long, default_value = "Z", value_parser = parse_axis)]
    probe_axis: Axis,

    /// Position of the simulated probe surface. No contact without it.
    #[arg(long, allow_negative_numbers = true)]
    probe_surface: Option<f64>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn parse_axis(s: &str) -> Result<Axis, String> {
    Axis::ALL
        .into_iter()
        .find(|a| s.eq_ignore_ascii_case(&a.as_char().to_string()))
        .ok_or_else(|| format!("unknown axis '{s}' (expected one of X Y Z A B C)"))
}

fn main() {
    let args = Args::parse();
    let loaded = load_config(&args.config, args.job.as_deref());
    let level = match &loaded {
        _ if args.verbose => "debug",
        Ok(loaded) => loaded.motion.shared.log_level.as_directive(),
        Err(_) => "info",
    };
    setup_tracing(&args, level);

    info!("CNC Motion v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = match loaded {
        Ok(loaded) => run(&args, loaded),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("CNC Motion shutdown complete");
}

fn run(args: &Args, loaded: LoadedConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Config OK: service={}, nom_segment={}µs, job steps={}",
        loaded.motion.shared.service_name,
        loaded.motion.planner.nom_segment_usec,
        loaded.job.steps.len(),
    );

    let kinematics = CartesianKinematics::from_config(&loaded.motion);
    let mut io = SimIo::new(loaded.motion.probe.input);
    if let Some(surface) = args.probe_surface {
        io.set_contact(Some(ContactSurface {
            axis: args.probe_axis,
            surface,
        }));
        info!("Simulated probe surface at {}={surface}", args.probe_axis);
    }
    let machine = Machine::new(&loaded.motion, kinematics, io);
    let mut runner = CycleRunner::new(machine, loaded.job);

    let summary = if args.realtime {
        rt_setup(args.cpu_core, args.rt_priority)?;
        info!(
            "RT setup complete (cpu_core={}, priority={})",
            args.cpu_core, args.rt_priority
        );

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            r.store(false, Ordering::SeqCst);
        })?;

        let summary = runner.run(&running)?;
        info!(
            "Cycle stats: avg={}ns max={}ns overruns={} max_latency={}ns",
            runner.stats.avg_cycle_ns(),
            runner.stats.max_cycle_ns,
            runner.stats.overruns,
            runner.stats.max_latency_ns,
        );
        summary
    } else {
        runner.run_to_completion(MAX_UNPACED_CYCLES)?
    };

    info!(
        cycles = summary.cycles,
        segments = summary.segments,
        commands = summary.commands,
        probes = summary.probes,
        machine_time_s = summary.machine_time_us / 1_000_000.0,
        position = ?summary.final_position,
        "job complete"
    );
    if let Some(report) = runner.machine().last_probe_report() {
        info!("last probe report: {report}");
    }
    Ok(())
}

/// Setup tracing subscriber from CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
