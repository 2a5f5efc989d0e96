//! Pipeline assembly.
//!
//! Turns a validated configuration into a worker fleet: one capture worker
//! feeding the shared frame slot, plus `num_workers` dispatch workers per
//! enabled backend, all wrapped in `WorkerSpec`s for the supervisor. Each
//! dispatch worker constructs and configures its backend inside its own
//! thread, so a backend that cannot come up takes down only that worker
//! and the supervisor restarts it.

use anyhow::{bail, Result};
use log::{error, info};

use crate::capture::{capture_worker, CameraSource, CaptureContext};
use crate::config::SentrycamConfig;
use crate::dispatch::{dispatch_worker, DispatchContext};
use crate::frame::{notify_queue, FrameSlot, NotifyRx};
use crate::storage::{make_backend, BackendKind};
use crate::supervisor::{worker_thread, StopToken, Supervisor, WorkerSpec};

/// Prove the configured camera opens and closes. Used by `run` before the
/// fleet starts and by `check` alongside the backend probes.
pub fn camera_probe(cfg: &SentrycamConfig) -> Result<()> {
    let mut probe = CameraSource::new(&cfg.camera.camera)?;
    probe.open_with_retry(&cfg.camera.camera, &StopToken::new())?;
    probe.close();
    Ok(())
}

/// Build the supervisor for `cfg`. Fails when the configuration describes
/// an empty fleet.
pub fn build(cfg: &SentrycamConfig) -> Result<Supervisor> {
    if !cfg.camera.enabled {
        bail!("the camera is disabled; nothing to supervise");
    }
    if !cfg.any_backend_enabled() {
        bail!("no storage backend is enabled; captured frames would go nowhere");
    }

    let slot = FrameSlot::new();
    let mut specs = Vec::new();
    let mut queues = Vec::new();

    for kind in BackendKind::ALL {
        if !kind.enabled_in(cfg) {
            continue;
        }
        let (tx, rx) = notify_queue();
        queues.push(tx);
        let workers = kind.num_workers(cfg);
        info!("{} backend enabled with {} worker(s)", kind, workers);
        for n in 0..workers {
            specs.push(dispatch_spec(cfg, kind, n, slot.clone(), rx.clone()));
        }
    }

    let capture_ctx = CaptureContext {
        camera: cfg.camera.camera.clone(),
        slot,
        queues,
    };
    specs.push(WorkerSpec::new(
        "capture",
        true,
        Box::new(move |stop| {
            let ctx = capture_ctx.clone();
            worker_thread("capture", stop, move |stop| capture_worker(&ctx, stop))
        }),
    ));

    Ok(Supervisor::new(specs))
}

fn dispatch_spec(
    cfg: &SentrycamConfig,
    kind: BackendKind,
    index: u32,
    slot: FrameSlot,
    rx: NotifyRx,
) -> WorkerSpec {
    let name = format!("{}-{}", kind, index);
    let worker_name = name.clone();
    let cfg = cfg.clone();
    WorkerSpec::new(
        name,
        true,
        Box::new(move |stop| {
            let ctx = DispatchContext {
                camera_id: cfg.camera_id.clone(),
                slot: slot.clone(),
                rx: rx.clone(),
                filter: cfg.motion.clone(),
            };
            let cfg = cfg.clone();
            worker_thread(&worker_name, stop, move |stop| {
                let mut backend = match make_backend(kind, &cfg) {
                    Ok(backend) => backend,
                    Err(e) => {
                        error!("cannot build the {} backend: {:#}", kind, e);
                        return Err(e);
                    }
                };
                dispatch_worker(&ctx, backend.as_mut(), stop)
            })
        }),
    )
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
