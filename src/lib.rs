//! sentrycam: supervised motion-capture pipeline.
//!
//! A capture worker reads frames from a camera into a shared single-slot
//! latest-frame record and fans out pixel-free notifications to per-backend
//! queues. Dispatch workers pick up fresh notifications, run motion
//! detection, and upload hits to their storage backend. A reconciliation
//! loop keeps the whole fleet running and restarts whatever dies.
//!
//! Modules:
//! - [`frame`]: the shared frame slot and notification queues.
//! - [`capture`]: camera sources and the capture worker.
//! - [`motion`]: the frame comparator and region filtering.
//! - [`dispatch`]: dispatch workers with the staleness check.
//! - [`storage`]: local, object store, and MQTT backends.
//! - [`supervisor`]: the worker fleet reconciliation loop.
//! - [`config`]: TOML file plus environment configuration.
//! - [`pipeline`]: turns a configuration into a supervised fleet.

pub mod capture;
pub mod config;
pub mod dispatch;
pub mod frame;
pub mod motion;
pub mod pipeline;
pub mod storage;
pub mod supervisor;

pub use config::SentrycamConfig;
pub use supervisor::{StopToken, Supervisor};

/// Process exit codes for `sentrycamd`.
pub mod exit_code {
    /// Clean shutdown.
    pub const OK: i32 = 0;
    /// The camera device could not be opened after all retries.
    pub const CAMERA_OPEN_FAILED: i32 = 10;
    /// The configuration is missing, invalid, or describes an empty fleet.
    pub const CONFIG_INVALID: i32 = 11;
    /// Any other unhandled startup error.
    pub const STARTUP_FAILED: i32 = 12;
}
