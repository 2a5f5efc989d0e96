//! Storage backends.
//!
//! A backend receives a finished upload (the JPEG, a boxed copy with the
//! motion rectangles drawn in, and the detected regions) and delivers it
//! somewhere durable. Each dispatch worker owns its backend instance, so the
//! trait takes `&mut self` and needs no internal locking.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::config::SentrycamConfig;
use crate::frame::CaptureStamp;
use crate::motion::MotionRegion;

pub mod local;
pub mod mqtt;
pub mod object_store;

pub use local::LocalFolderBackend;
pub use mqtt::MqttBackend;
pub use object_store::ObjectStoreBackend;

// ---------------------------------------------------------------------------
// Backend contract
// ---------------------------------------------------------------------------

/// Destination for captured motion events.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Cheap reachability probe. Must not mutate remote state.
    fn check(&self) -> bool;

    /// One-time setup (create directories, buckets, connections). Called
    /// once before the first upload; must be idempotent.
    fn configure(&mut self) -> Result<()>;

    fn upload(&mut self, shot: &UploadShot) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    ObjectStore,
    Mqtt,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] =
        [BackendKind::Local, BackendKind::ObjectStore, BackendKind::Mqtt];

    pub fn enabled_in(self, cfg: &SentrycamConfig) -> bool {
        match self {
            BackendKind::Local => cfg.local.enabled,
            BackendKind::ObjectStore => cfg.object_store.enabled,
            BackendKind::Mqtt => cfg.mqtt.enabled,
        }
    }

    pub fn num_workers(self, cfg: &SentrycamConfig) -> u32 {
        match self {
            BackendKind::Local => cfg.local.num_workers,
            BackendKind::ObjectStore => cfg.object_store.num_workers,
            BackendKind::Mqtt => cfg.mqtt.num_workers,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Local => "local",
            BackendKind::ObjectStore => "object_store",
            BackendKind::Mqtt => "mqtt",
        };
        f.write_str(s)
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(BackendKind::Local),
            "object_store" => Ok(BackendKind::ObjectStore),
            "mqtt" => Ok(BackendKind::Mqtt),
            other => bail!("unknown storage backend '{}'", other),
        }
    }
}

/// Construct a backend for `kind`. The instance is not yet configured;
/// callers run `configure()` before the first upload.
pub fn make_backend(kind: BackendKind, cfg: &SentrycamConfig) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::Local => Ok(Box::new(LocalFolderBackend::new(&cfg.local))),
        BackendKind::ObjectStore => Ok(Box::new(ObjectStoreBackend::new(&cfg.object_store)?)),
        BackendKind::Mqtt => Ok(Box::new(MqttBackend::new(&cfg.mqtt, &cfg.camera_id))),
    }
}

// ---------------------------------------------------------------------------
// Upload payload
// ---------------------------------------------------------------------------

/// Everything a backend needs to persist one motion event.
#[derive(Clone, Debug)]
pub struct UploadShot {
    pub camera_id: String,
    pub captured_at: DateTime<Utc>,
    pub stamp: CaptureStamp,
    /// Frame encoded as JPEG, untouched.
    pub jpeg: Vec<u8>,
    /// Same frame with motion rectangles drawn in.
    pub boxed_jpeg: Vec<u8>,
    pub regions: Vec<MotionRegion>,
}

impl UploadShot {
    /// Object key: `camera_id/YYYYMMDD/HHMMSS.mmm.jpg`.
    pub fn object_key(&self) -> String {
        format!(
            "{}/{}.jpg",
            self.camera_id,
            self.captured_at.format("%Y%m%d/%H%M%S%.3f")
        )
    }

    /// Short per-day directory name, `yymmdd`.
    pub fn day_dir(&self) -> String {
        self.captured_at.format("%y%m%d").to_string()
    }

    /// File stem used for local filenames, `HHMMSS.mmm`.
    pub fn file_stem(&self) -> String {
        self.captured_at.format("%H%M%S%.3f").to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
