//! Shared frame state.
//!
//! The capture worker and the backend dispatch workers communicate through two
//! small primitives defined here:
//!
//! - `FrameSlot`: a single mutex-guarded cell that always holds the latest
//!   captured frame. One writer (the capture worker), many readers.
//! - `NotifyQueue`: a bounded depth-1 channel per backend carrying pixel-free
//!   `FrameReadyMessage` notifications. Producers never block; a full queue
//!   sheds the message and the consumer catches up via the staleness check.
//!
//! Readers copy out of the slot and release the lock before doing any slow
//! work (encoding, network I/O). The lock is never held across I/O.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use image::codecs::jpeg::JpegEncoder;

/// JPEG quality for uploaded snapshots.
const JPEG_QUALITY: u8 = 85;

/// Monotonically increasing capture sequence stamp.
///
/// Assigned by the `FrameSlot` on publish; a notification whose stamp no
/// longer matches the slot refers to a superseded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaptureStamp(pub u64);

/// A single captured frame: tightly packed RGB24 pixels plus capture time.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty() || self.width == 0 || self.height == 0
    }

    /// Encode the frame as JPEG. Always done against a copied-out frame,
    /// never against the live slot.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        if self.is_empty() {
            return Err(anyhow!("cannot encode empty frame"));
        }
        let expected = self.width as usize * self.height as usize * 3;
        if self.pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer size mismatch: {} bytes for {}x{} RGB",
                self.pixels.len(),
                self.width,
                self.height
            ));
        }
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder.encode(
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }
}

/// Lightweight "frame ready" notification. Carries no pixel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReadyMessage {
    pub stamp: CaptureStamp,
}

/// A copied-out view of the slot: the frame plus the stamp it was published
/// under. Cheap to clone (the frame is behind an `Arc`).
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub frame: Arc<Frame>,
    pub stamp: CaptureStamp,
}

struct SlotState {
    seq: u64,
    snap: Option<Snapshot>,
}

/// The single shared "latest captured frame" record.
///
/// Created once at startup with an empty state and overwritten on every
/// successful capture. `publish` and `snapshot` each hold the lock only for a
/// field replace/clone, so concurrent readers never observe a half-written
/// frame and the capture path is never blocked by a slow uploader.
#[derive(Clone)]
pub struct FrameSlot {
    state: Arc<Mutex<SlotState>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState { seq: 0, snap: None })),
        }
    }

    /// Replace the slot contents, advancing the capture stamp. Frame and
    /// stamp are updated together under the same critical section.
    pub fn publish(&self, frame: Frame) -> CaptureStamp {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.seq += 1;
        let stamp = CaptureStamp(state.seq);
        state.snap = Some(Snapshot {
            frame: Arc::new(frame),
            stamp,
        });
        stamp
    }

    /// Copy out the current frame and stamp. `None` until the first publish.
    pub fn snapshot(&self) -> Option<Snapshot> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.snap.clone()
    }

    /// Cheap staleness probe: the stamp of the current slot contents.
    pub fn stamp(&self) -> Option<CaptureStamp> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.snap.as_ref().map(|s| s.stamp)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side of a per-backend notification queue.
#[derive(Clone)]
pub struct NotifyTx {
    tx: Sender<FrameReadyMessage>,
}

impl NotifyTx {
    /// Non-blocking enqueue. Returns false when the queue is full and the
    /// message was shed; that is expected under load, not an error.
    pub fn notify(&self, msg: FrameReadyMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}

/// Consumer side of a per-backend notification queue. Cloneable so several
/// instances of the same backend can share one queue.
#[derive(Clone)]
pub struct NotifyRx {
    rx: Receiver<FrameReadyMessage>,
}

impl NotifyRx {
    /// Blocking dequeue with a timeout so workers can poll their stop token.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FrameReadyMessage> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Create a bounded depth-1 notification queue.
pub fn notify_queue() -> (NotifyTx, NotifyRx) {
    let (tx, rx) = bounded(1);
    (NotifyTx { tx }, NotifyRx { rx })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
