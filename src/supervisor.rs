//! Worker supervision.
//!
//! The supervisor owns lifecycle for the whole fleet (capture worker plus the
//! backend dispatch workers) and stays out of the frame-processing path. Each
//! `WorkerSpec` pairs a desired-state flag with a spawn factory; the
//! reconciliation loop starts desired-but-not-running workers, stops
//! running-but-undesired ones, and exits once nothing is desired and nothing
//! is running.
//!
//! Workers are cancelled cooperatively through a `StopToken`; liveness and
//! exit are observed through the thread join handle, never through unwinding
//! across workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Cooperative cancellation flag handed to every worker.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep up to `dur`, waking early when the token is triggered.
    pub fn sleep(&self, dur: Duration) {
        let deadline = Instant::now() + dur;
        while !self.is_triggered() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            std::thread::sleep(remaining.min(POLL_INTERVAL));
        }
    }
}

/// A live worker: its join handle and the stop token it polls.
pub struct WorkerHandle {
    pub join: JoinHandle<()>,
    pub stop: StopToken,
}

impl WorkerHandle {
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }
}

/// Factory producing a fresh worker thread for each (re)start.
pub type SpawnFn = Box<dyn FnMut(StopToken) -> JoinHandle<()> + Send>;

/// One logical worker: name, desired state, how to start it, and the handle
/// of the current incarnation if any. The handle is owned exclusively by the
/// supervisor.
pub struct WorkerSpec {
    name: String,
    desired: Arc<AtomicBool>,
    spawn: SpawnFn,
    handle: Option<WorkerHandle>,
}

impl WorkerSpec {
    pub fn new(name: impl Into<String>, desired: bool, spawn: SpawnFn) -> Self {
        Self {
            name: name.into(),
            desired: Arc::new(AtomicBool::new(desired)),
            spawn,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared desired-state flag; flipping it takes effect on the next
    /// reconciliation pass.
    pub fn desired_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.desired)
    }

    fn is_desired(&self) -> bool {
        self.desired.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(WorkerHandle::is_running)
    }

    fn start(&mut self) {
        let stop = StopToken::new();
        let join = (self.spawn)(stop.clone());
        self.handle = Some(WorkerHandle { join, stop });
    }

    /// Join a finished incarnation so its handle is not mistaken for a live
    /// worker on the next pass.
    fn reap(&mut self) {
        let finished = self
            .handle
            .as_ref()
            .is_some_and(|h| h.join.is_finished());
        if finished {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join.join();
                log::warn!("the {} worker is not running", self.name);
            }
        }
    }
}

/// Spawn a named worker thread around a fallible loop body. The body's error
/// is logged here; it never crosses into other workers.
pub fn worker_thread<F>(name: &str, stop: StopToken, body: F) -> JoinHandle<()>
where
    F: FnOnce(&StopToken) -> Result<()> + Send + 'static,
{
    let name = name.to_string();
    std::thread::spawn(move || match body(&stop) {
        Ok(()) => log::info!("worker {} exited", name),
        Err(e) => log::error!("worker {} failed: {:#}", name, e),
    })
}

/// The reconciliation loop.
pub struct Supervisor {
    specs: Vec<WorkerSpec>,
    /// Reconciliation cadence; also bounds the wait-for-exit step so a hung
    /// worker cannot stall the rest of the fleet.
    tick: Duration,
    /// Pause after each start. Staggered startup avoids a thundering herd
    /// against shared resources.
    stagger: Duration,
}

impl Supervisor {
    pub fn new(specs: Vec<WorkerSpec>) -> Self {
        Self::with_timing(specs, Duration::from_secs(1), Duration::from_millis(500))
    }

    pub fn with_timing(specs: Vec<WorkerSpec>, tick: Duration, stagger: Duration) -> Self {
        Self {
            specs,
            tick,
            stagger,
        }
    }

    /// Desired-state flags for all specs, in order. Used by signal handlers
    /// to request a fleet-wide shutdown.
    pub fn desired_flags(&self) -> Vec<Arc<AtomicBool>> {
        self.specs.iter().map(WorkerSpec::desired_flag).collect()
    }

    pub fn specs(&self) -> &[WorkerSpec] {
        &self.specs
    }

    /// One reconciliation pass over every spec. Exposed for tests; `run`
    /// calls this on the tick cadence.
    pub fn reconcile(&mut self) {
        for spec in &mut self.specs {
            spec.reap();
            let desired = spec.is_desired();
            let running = spec.is_running();

            match (desired, running) {
                (true, false) => {
                    log::warn!("starting {} worker", spec.name);
                    spec.start();
                    std::thread::sleep(self.stagger);
                }
                (false, true) => {
                    log::warn!("worker {} is running and should not be, stopping", spec.name);
                    if let Some(handle) = &spec.handle {
                        handle.stop.trigger();
                    }
                }
                _ => {}
            }
        }
    }

    /// Run reconciliation until zero workers are desired and zero are
    /// running, then return control to the caller.
    pub fn run(&mut self) {
        log::info!("starting worker supervisor ({} specs)", self.specs.len());
        loop {
            self.reconcile();

            let desired = self.specs.iter().filter(|s| s.is_desired()).count();
            let running = self.specs.iter().filter(|s| s.is_running()).count();

            if desired > 0 && running == 0 {
                log::warn!("no desired workers are running; did everything crash?");
            }
            if desired == 0 && running > 0 {
                log::warn!(
                    "shutdown requested, {} worker(s) still draining",
                    running
                );
            }
            if desired == 0 && running == 0 {
                log::info!("all workers stopped, supervisor exiting");
                return;
            }

            self.wait_for_exit();
        }
    }

    /// Bounded wait for any running, still-desired worker to exit, so a
    /// crash is noticed before the next timer tick. Re-entered next cycle.
    fn wait_for_exit(&self) {
        let deadline = Instant::now() + self.tick;
        while Instant::now() < deadline {
            let any_exited = self.specs.iter().any(|s| {
                s.handle.as_ref().is_some_and(|h| h.join.is_finished())
            });
            if any_exited {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
