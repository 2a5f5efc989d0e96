//! Camera capture.
//!
//! `CameraSource` wraps the imaging device behind a backend enum: a synthetic
//! source for `stub://` devices (tests and bring-up) and a V4L2 device source
//! behind the `capture-v4l2` feature.
//!
//! `capture_worker` is the capture loop run under the supervisor: open the
//! device with bounded retry, then read frames, publish each into the shared
//! `FrameSlot`, and fan a pixel-free notification out to every enabled
//! backend queue. A full queue sheds the notification for that backend only.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::Rng;

use crate::frame::{Frame, FrameReadyMessage, FrameSlot, NotifyTx};
use crate::supervisor::StopToken;

/// Capture geometry presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Small,
    P720,
    P1080,
}

impl Resolution {
    pub fn dims(self) -> (u32, u32) {
        match self {
            Resolution::Small => (640, 480),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
        }
    }

    /// Frame rate hint passed to real devices.
    pub fn fps_hint(self) -> u32 {
        26
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "small" => Ok(Resolution::Small),
            "720p" => Ok(Resolution::P720),
            "1080p" => Ok(Resolution::P1080),
            other => Err(anyhow!(
                "invalid resolution {:?} (expected small, 720p or 1080p)",
                other
            )),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Resolution::Small => "small",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
        };
        f.write_str(s)
    }
}

/// Configuration for the capture worker.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path ("/dev/video0") or "stub://name" for the synthetic source.
    pub device: String,
    pub resolution: Resolution,
    /// Pause between capture attempts. Zero means free-running.
    pub time_delay: Duration,
    /// Device-open attempts before giving up.
    pub open_attempts: u32,
    /// Pause between open attempts.
    pub open_retry_delay: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://cam".to_string(),
            resolution: Resolution::P720,
            time_delay: Duration::ZERO,
            open_attempts: 3,
            open_retry_delay: Duration::from_secs(5),
        }
    }
}

/// The imaging device.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "capture-v4l2")]
    V4l2(v4l2::V4l2Camera),
}

impl CameraSource {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config.clone())),
            })
        } else {
            #[cfg(feature = "capture-v4l2")]
            {
                Ok(Self {
                    backend: CameraBackend::V4l2(v4l2::V4l2Camera::new(config.clone())),
                })
            }
            #[cfg(not(feature = "capture-v4l2"))]
            {
                anyhow::bail!(
                    "device {} requires the capture-v4l2 feature",
                    config.device
                )
            }
        }
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(cam) => cam.open(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(cam) => cam.open(),
        }
    }

    /// Open the device with bounded retry. Exhausting the attempts is a fatal
    /// startup condition reported upward.
    pub fn open_with_retry(&mut self, config: &CameraConfig, stop: &StopToken) -> Result<()> {
        let attempts = config.open_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.open() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!(
                        "failed to open camera {} (attempt {}/{}): {}",
                        config.device,
                        attempt,
                        attempts,
                        e
                    );
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                stop.sleep(config.open_retry_delay);
                if stop.is_triggered() {
                    break;
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| anyhow!("camera open failed"))
            .context(format!(
                "camera {} failed to open after {} attempts",
                config.device, attempts
            )))
    }

    /// Read one frame off the device.
    pub fn read_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(cam) => cam.read_frame(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(cam) => cam.read_frame(),
        }
    }

    /// Release the device handle.
    pub fn close(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(cam) => cam.close(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(cam) => cam.close(),
        }
    }
}

/// Everything the capture worker needs, bundled for the spawn factory.
#[derive(Clone)]
pub struct CaptureContext {
    pub camera: CameraConfig,
    pub slot: FrameSlot,
    pub queues: Vec<NotifyTx>,
}

/// Capture loop body. Returns `Err` only for fatal startup conditions; a
/// failed read is logged and the loop continues.
pub fn capture_worker(ctx: &CaptureContext, stop: &StopToken) -> Result<()> {
    let mut source = CameraSource::new(&ctx.camera)?;
    source.open_with_retry(&ctx.camera, stop)?;
    log::info!("camera {} open ({})", ctx.camera.device, ctx.camera.resolution);

    while !stop.is_triggered() {
        match source.read_frame() {
            Ok(frame) => {
                let stamp = ctx.slot.publish(frame);
                let msg = FrameReadyMessage { stamp };
                for queue in &ctx.queues {
                    // Full queue: drop for that backend, it catches up on the
                    // next notification via the staleness check.
                    queue.notify(msg);
                }
                log::debug!("captured frame {:?}", stamp);
            }
            Err(e) => log::error!("failed to get image: {}", e),
        }

        if !ctx.camera.time_delay.is_zero() {
            stop.sleep(ctx.camera.time_delay);
        }
    }

    source.close();
    log::info!("camera {} released", ctx.camera.device);
    Ok(())
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    opened: bool,
    frame_count: u64,
    /// Simulated scene; changes occasionally so motion detection has work.
    scene_state: u8,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            opened: false,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn open(&mut self) -> Result<()> {
        self.opened = true;
        log::info!("camera {} opened (synthetic)", self.config.device);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if !self.opened {
            return Err(anyhow!("camera not initialized"));
        }
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let (width, height) = self.config.resolution.dims();
        let mut pixels = vec![0u8; width as usize * height as usize * 3];
        let mut rng = rand::thread_rng();
        for (i, px) in pixels.iter_mut().enumerate() {
            let base = ((i as u64 / 3 + self.scene_state as u64 * 64) % 256) as i16;
            // Low-amplitude sensor noise; the comparator's blur swallows it.
            let noise: i16 = rng.gen_range(-2..=2);
            *px = (base + noise).clamp(0, 255) as u8;
        }

        Ok(Frame::new(pixels, width, height))
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

// ----------------------------------------------------------------------------
// V4L2 camera (feature: capture-v4l2)
// ----------------------------------------------------------------------------

#[cfg(feature = "capture-v4l2")]
mod v4l2 {
    use super::*;
    use ouroboros::self_referencing;

    pub(super) struct V4l2Camera {
        config: CameraConfig,
        state: Option<V4l2State>,
        active_width: u32,
        active_height: u32,
    }

    #[self_referencing]
    struct V4l2State {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl V4l2Camera {
        pub(super) fn new(config: CameraConfig) -> Self {
            let (w, h) = config.resolution.dims();
            Self {
                config,
                state: None,
                active_width: w,
                active_height: h,
            }
        }

        pub(super) fn open(&mut self) -> Result<()> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let mut device = v4l::Device::with_path(&self.config.device)
                .with_context(|| format!("open v4l2 device {}", self.config.device))?;

            let (want_w, want_h) = self.config.resolution.dims();
            let mut format = device.format().context("read v4l2 format")?;
            format.width = want_w;
            format.height = want_h;
            format.fourcc = v4l::FourCC::new(b"RGB3");
            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!("failed to set format on {}: {}", self.config.device, err);
                    device
                        .format()
                        .context("read v4l2 format after set failure")?
                }
            };

            let params =
                v4l::video::capture::Parameters::with_fps(self.config.resolution.fps_hint());
            if let Err(err) = device.set_params(&params) {
                log::warn!("failed to set fps on {}: {}", self.config.device, err);
            }

            self.active_width = format.width;
            self.active_height = format.height;

            let state = V4l2StateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })
                },
            }
            .try_build()?;
            self.state = Some(state);

            log::info!(
                "camera {} opened ({}x{})",
                self.config.device,
                self.active_width,
                self.active_height
            );
            Ok(())
        }

        pub(super) fn read_frame(&mut self) -> Result<Frame> {
            use v4l::io::traits::CaptureStream;

            let state = self.state.as_mut().context("camera not initialized")?;
            let pixels = state
                .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
                .context("capture v4l2 frame")?;
            Ok(Frame::new(pixels, self.active_width, self.active_height))
        }

        pub(super) fn close(&mut self) {
            if self.state.take().is_some() {
                log::warn!("shutting down video capture {}", self.config.device);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
