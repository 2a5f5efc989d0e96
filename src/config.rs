//! Daemon configuration.
//!
//! Values come from a TOML file (path from `--config` or `SENTRYCAM_CONFIG`),
//! merged over defaults, with a handful of environment overrides applied on
//! top. The file layer is loose (`Option` everywhere); the typed
//! `SentrycamConfig` is what the rest of the crate consumes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::capture::{CameraConfig, Resolution};
use crate::motion::{IgnoreRegion, MotionFilter, Rect};

const DEFAULT_CAMERA_ID: &str = "unknown/unknown";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_TOPIC: &str = "sentrycam";

// ---------------------------------------------------------------------------
// File layer
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    camera_id: Option<String>,
    camera: Option<CameraFileSection>,
    motion: Option<MotionFileSection>,
    local: Option<LocalFileSection>,
    object_store: Option<ObjectStoreFileSection>,
    mqtt: Option<MqttFileSection>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraFileSection {
    enabled: Option<bool>,
    device: Option<String>,
    resolution: Option<String>,
    /// Seconds between capture attempts.
    time_delay: Option<f64>,
    open_attempts: Option<u32>,
    /// Seconds between device-open attempts.
    open_retry_delay: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionFileSection {
    minsize: Option<u32>,
    min_width: Option<u32>,
    min_height: Option<u32>,
    /// Named rectangles, each `[x, y, w, h]`.
    ignore: Option<BTreeMap<String, [u32; 4]>>,
}

#[derive(Debug, Deserialize, Default)]
struct LocalFileSection {
    enabled: Option<bool>,
    num_workers: Option<u32>,
    savedir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ObjectStoreFileSection {
    enabled: Option<bool>,
    num_workers: Option<u32>,
    endpoint: Option<String>,
    bucket: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttFileSection {
    enabled: Option<bool>,
    num_workers: Option<u32>,
    host: Option<String>,
    port: Option<u16>,
    topic: Option<String>,
}

// ---------------------------------------------------------------------------
// Typed configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SentrycamConfig {
    /// Camera identifier used in object keys, e.g. "site/cam0".
    pub camera_id: String,
    pub camera: CameraSettings,
    pub motion: MotionFilter,
    pub local: LocalSettings,
    pub object_store: ObjectStoreSettings,
    pub mqtt: MqttSettings,
}

#[derive(Clone, Debug)]
pub struct CameraSettings {
    pub enabled: bool,
    pub camera: CameraConfig,
}

#[derive(Clone, Debug)]
pub struct LocalSettings {
    pub enabled: bool,
    pub num_workers: u32,
    pub savedir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ObjectStoreSettings {
    pub enabled: bool,
    pub num_workers: u32,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub enabled: bool,
    pub num_workers: u32,
    pub host: String,
    pub port: u16,
    pub topic: String,
}

impl SentrycamConfig {
    /// Load configuration: explicit path, else `SENTRYCAM_CONFIG`, else
    /// defaults; then environment overrides; then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("SENTRYCAM_CONFIG").ok().map(PathBuf::from);
        let path = path.map(Path::to_path_buf).or(env_path);
        let file = match path {
            Some(path) => read_config_file(&path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let camera_section = file.camera.unwrap_or_default();
        let resolution = match camera_section.resolution.as_deref() {
            Some(s) => s.parse::<Resolution>()?,
            None => Resolution::P720,
        };
        let defaults = CameraConfig::default();
        let camera = CameraSettings {
            enabled: camera_section.enabled.unwrap_or(true),
            camera: CameraConfig {
                device: camera_section.device.unwrap_or(defaults.device),
                resolution,
                time_delay: seconds(camera_section.time_delay, defaults.time_delay)?,
                open_attempts: camera_section.open_attempts.unwrap_or(defaults.open_attempts),
                open_retry_delay: seconds(
                    camera_section.open_retry_delay,
                    defaults.open_retry_delay,
                )?,
            },
        };

        let motion_section = file.motion.unwrap_or_default();
        let ignore = motion_section
            .ignore
            .unwrap_or_default()
            .into_values()
            .map(|[x, y, w, h]| IgnoreRegion {
                rect: Rect::new(x, y, w, h),
            })
            .collect();
        let motion = MotionFilter {
            minsize: motion_section.minsize.unwrap_or(0),
            min_width: motion_section.min_width.unwrap_or(0),
            min_height: motion_section.min_height.unwrap_or(0),
            ignore,
        };

        let local_section = file.local.unwrap_or_default();
        let local = LocalSettings {
            enabled: local_section.enabled.unwrap_or(false),
            num_workers: local_section.num_workers.unwrap_or(1),
            savedir: PathBuf::from(local_section.savedir.unwrap_or_default()),
        };

        let object_section = file.object_store.unwrap_or_default();
        let object_store = ObjectStoreSettings {
            enabled: object_section.enabled.unwrap_or(false),
            num_workers: object_section.num_workers.unwrap_or(1),
            endpoint: object_section.endpoint.unwrap_or_default(),
            bucket: object_section.bucket.unwrap_or_default(),
            access_key: object_section.access_key,
            secret_key: object_section.secret_key,
        };

        let mqtt_section = file.mqtt.unwrap_or_default();
        let mqtt = MqttSettings {
            enabled: mqtt_section.enabled.unwrap_or(false),
            num_workers: mqtt_section.num_workers.unwrap_or(1),
            host: mqtt_section.host.unwrap_or_default(),
            port: mqtt_section.port.unwrap_or(DEFAULT_MQTT_PORT),
            topic: mqtt_section.topic.unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
        };

        Ok(Self {
            camera_id: file.camera_id.unwrap_or_else(|| DEFAULT_CAMERA_ID.to_string()),
            camera,
            motion,
            local,
            object_store,
            mqtt,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(id) = non_empty_env("SENTRYCAM_CAMERA_ID") {
            self.camera_id = id;
        }
        if let Some(device) = non_empty_env("SENTRYCAM_CAMERA_DEVICE") {
            self.camera.camera.device = device;
        }
        if let Some(savedir) = non_empty_env("SENTRYCAM_SAVEDIR") {
            self.local.savedir = PathBuf::from(savedir);
        }
        if let Some(endpoint) = non_empty_env("SENTRYCAM_OBJECT_STORE_ENDPOINT") {
            self.object_store.endpoint = endpoint;
        }
        if let Some(key) = non_empty_env("SENTRYCAM_OBJECT_ACCESS_KEY") {
            self.object_store.access_key = Some(key);
        }
        if let Some(key) = non_empty_env("SENTRYCAM_OBJECT_SECRET_KEY") {
            self.object_store.secret_key = Some(key);
        }
        if let Some(host) = non_empty_env("SENTRYCAM_MQTT_HOST") {
            self.mqtt.host = host;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.enabled && self.camera.camera.device.trim().is_empty() {
            return Err(anyhow!("camera.device is required"));
        }
        if self.local.enabled {
            if self.local.savedir.as_os_str().is_empty() {
                return Err(anyhow!("local.savedir is required when [local] is enabled"));
            }
            if self.local.num_workers == 0 {
                return Err(anyhow!("local.num_workers must be >= 1"));
            }
        }
        if self.object_store.enabled {
            if self.object_store.endpoint.trim().is_empty() {
                return Err(anyhow!(
                    "object_store.endpoint is required when [object_store] is enabled"
                ));
            }
            if self.object_store.bucket.trim().is_empty() {
                return Err(anyhow!(
                    "object_store.bucket is required when [object_store] is enabled"
                ));
            }
            if self.object_store.num_workers == 0 {
                return Err(anyhow!("object_store.num_workers must be >= 1"));
            }
        }
        if self.mqtt.enabled {
            if self.mqtt.host.trim().is_empty() {
                return Err(anyhow!("mqtt.host is required when [mqtt] is enabled"));
            }
            if self.mqtt.num_workers == 0 {
                return Err(anyhow!("mqtt.num_workers must be >= 1"));
            }
        }
        Ok(())
    }

    /// True when at least one storage backend is enabled.
    pub fn any_backend_enabled(&self) -> bool {
        self.local.enabled || self.object_store.enabled || self.mqtt.enabled
    }
}

impl Default for SentrycamConfig {
    fn default() -> Self {
        Self {
            camera_id: DEFAULT_CAMERA_ID.to_string(),
            camera: CameraSettings {
                enabled: true,
                camera: CameraConfig::default(),
            },
            motion: MotionFilter::default(),
            local: LocalSettings {
                enabled: false,
                num_workers: 1,
                savedir: PathBuf::new(),
            },
            object_store: ObjectStoreSettings {
                enabled: false,
                num_workers: 1,
                endpoint: String::new(),
                bucket: String::new(),
                access_key: None,
                secret_key: None,
            },
            mqtt: MqttSettings {
                enabled: false,
                num_workers: 1,
                host: String::new(),
                port: DEFAULT_MQTT_PORT,
                topic: DEFAULT_MQTT_TOPIC.to_string(),
            },
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn seconds(value: Option<f64>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(secs) if secs >= 0.0 && secs.is_finite() => Ok(Duration::from_secs_f64(secs)),
        Some(secs) => Err(anyhow!("delay must be a non-negative number, got {}", secs)),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SentrycamConfig::default();
        assert!(cfg.camera.enabled);
        assert_eq!(cfg.camera.camera.resolution, Resolution::P720);
        assert_eq!(cfg.camera_id, DEFAULT_CAMERA_ID);
        assert!(!cfg.any_backend_enabled());
    }

    #[test]
    fn file_sections_parse_into_typed_config() {
        let raw = r#"
            camera_id = "yard/cam1"

            [camera]
            device = "stub://yard"
            resolution = "1080p"
            time_delay = 1.5

            [motion]
            minsize = 250
            min_width = 4
            min_height = 4

            [motion.ignore]
            driveway = [0, 0, 120, 90]
            tree = [300, 10, 40, 200]

            [local]
            enabled = true
            num_workers = 2
            savedir = "/var/lib/sentrycam"
        "#;
        let file: ConfigFile = toml::from_str(raw).expect("parse");
        let cfg = SentrycamConfig::from_file(file).expect("typed config");

        assert_eq!(cfg.camera_id, "yard/cam1");
        assert_eq!(cfg.camera.camera.resolution, Resolution::P1080);
        assert_eq!(cfg.camera.camera.time_delay, Duration::from_millis(1500));
        assert_eq!(cfg.motion.minsize, 250);
        assert_eq!(cfg.motion.ignore.len(), 2);
        assert_eq!(cfg.motion.ignore[0].rect, Rect::new(0, 0, 120, 90));
        assert!(cfg.local.enabled);
        assert_eq!(cfg.local.num_workers, 2);
    }

    #[test]
    fn enabled_local_requires_savedir() {
        let raw = r#"
            [local]
            enabled = true
        "#;
        let file: ConfigFile = toml::from_str(raw).expect("parse");
        let cfg = SentrycamConfig::from_file(file).expect("typed config");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn enabled_object_store_requires_endpoint_and_bucket() {
        let raw = r#"
            [object_store]
            enabled = true
            bucket = "frames"
        "#;
        let file: ConfigFile = toml::from_str(raw).expect("parse");
        let cfg = SentrycamConfig::from_file(file).expect("typed config");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_time_delay_is_rejected() {
        let raw = r#"
            [camera]
            time_delay = -1.0
        "#;
        let file: ConfigFile = toml::from_str(raw).expect("parse");
        assert!(SentrycamConfig::from_file(file).is_err());
    }

    #[test]
    fn unknown_resolution_is_rejected() {
        let raw = r#"
            [camera]
            resolution = "8k"
        "#;
        let file: ConfigFile = toml::from_str(raw).expect("parse");
        assert!(SentrycamConfig::from_file(file).is_err());
    }
}
