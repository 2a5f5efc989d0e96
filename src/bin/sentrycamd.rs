//! sentrycamd: the motion-capture daemon.
//!
//! `run` starts the supervised pipeline and blocks until every worker has
//! exited. `check` validates the configuration and probes each enabled
//! backend without capturing anything.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use sentrycam::exit_code;
use sentrycam::storage::{make_backend, BackendKind};
use sentrycam::{pipeline, SentrycamConfig};

#[derive(Parser)]
#[command(name = "sentrycamd", version, about = "Supervised motion-capture pipeline")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SENTRYCAM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the capture and dispatch fleet until interrupted.
    Run,
    /// Validate the configuration and probe enabled backends.
    Check,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let cfg = match SentrycamConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("configuration error: {:#}", e);
            return ExitCode::from(exit_code::CONFIG_INVALID as u8);
        }
    };

    let code = match cli.command {
        Command::Run => run(&cfg),
        Command::Check => check(&cfg),
    };
    ExitCode::from(code as u8)
}

fn run(cfg: &SentrycamConfig) -> i32 {
    // Pre-flight: prove the camera opens before spinning up the fleet, so a
    // dead device fails the whole process instead of a restart loop.
    if let Err(e) = pipeline::camera_probe(cfg) {
        error!("cannot open camera {}: {:#}", cfg.camera.camera.device, e);
        return exit_code::CAMERA_OPEN_FAILED;
    }

    let mut supervisor = match pipeline::build(cfg) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("cannot assemble the pipeline: {:#}", e);
            return exit_code::CONFIG_INVALID;
        }
    };

    let desired = supervisor.desired_flags();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("interrupt received, stopping workers");
        for flag in &desired {
            flag.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }) {
        error!("cannot install the interrupt handler: {:#}", e);
        return exit_code::STARTUP_FAILED;
    }

    info!("starting {} worker(s)", supervisor.specs().len());
    supervisor.run();
    info!("all workers stopped");
    exit_code::OK
}

fn check(cfg: &SentrycamConfig) -> i32 {
    let mut failed = false;
    if cfg.camera.enabled {
        match pipeline::camera_probe(cfg) {
            Ok(()) => info!("camera {}: ok", cfg.camera.camera.device),
            Err(e) => {
                error!("camera {}: {:#}", cfg.camera.camera.device, e);
                failed = true;
            }
        }
    }
    for kind in BackendKind::ALL {
        if !kind.enabled_in(cfg) {
            continue;
        }
        match make_backend(kind, cfg) {
            Ok(backend) if backend.check() => info!("{}: ok", kind),
            Ok(_) => {
                error!("{}: unreachable", kind);
                failed = true;
            }
            Err(e) => {
                error!("{}: {:#}", kind, e);
                failed = true;
            }
        }
    }
    if !cfg.any_backend_enabled() {
        error!("no storage backend is enabled");
        failed = true;
    }
    if failed {
        exit_code::CONFIG_INVALID
    } else {
        info!("configuration ok");
        exit_code::OK
    }
}
