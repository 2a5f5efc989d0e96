//! Dispatch workers.
//!
//! Each dispatch worker drains one notify queue, pulls the current frame
//! out of the shared slot, runs motion detection against its own private
//! baseline, and hands hits to its backend. Notifications that no longer
//! match the slot are stale and dropped without processing.

use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info};

use crate::frame::{FrameSlot, NotifyRx};
use crate::motion::{draw_motion_boxes, draw_timestamp, MotionDetector, MotionFilter};
use crate::storage::{Backend, UploadShot};
use crate::supervisor::StopToken;

const RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// Everything one dispatch worker needs; built once per spawn.
pub struct DispatchContext {
    pub camera_id: String,
    pub slot: FrameSlot,
    pub rx: NotifyRx,
    pub filter: MotionFilter,
}

/// Worker body. Returns only on stop or an unrecoverable backend failure;
/// per-upload errors are logged and the loop continues.
pub fn dispatch_worker(
    ctx: &DispatchContext,
    backend: &mut dyn Backend,
    stop: &StopToken,
) -> Result<()> {
    backend.configure()?;
    info!("dispatching to the {} backend", backend.name());

    let mut detector = MotionDetector::new(ctx.filter.clone());
    while !stop.is_triggered() {
        let msg = match ctx.rx.recv_timeout(RECV_TIMEOUT) {
            Some(msg) => msg,
            None => continue,
        };
        let snap = match ctx.slot.snapshot() {
            Some(snap) => snap,
            None => continue,
        };
        if snap.stamp != msg.stamp {
            // The capture worker lapped us; the frame this notification
            // described is gone.
            debug!(
                "dropping stale notification {:?}, slot is at {:?}",
                msg.stamp, snap.stamp
            );
            continue;
        }

        let scan = match detector.scan(&snap.frame) {
            Ok(scan) => scan,
            Err(e) => {
                error!("motion scan failed: {:#}", e);
                continue;
            }
        };
        if !scan.motion {
            continue;
        }

        let shot = match build_shot(ctx, &snap, scan.regions) {
            Ok(shot) => shot,
            Err(e) => {
                error!("failed to encode frame {:?}: {:#}", snap.stamp, e);
                continue;
            }
        };
        if let Err(e) = backend.upload(&shot) {
            error!("{} upload of {:?} failed: {:#}", backend.name(), shot.stamp, e);
        }
    }
    Ok(())
}

fn build_shot(
    ctx: &DispatchContext,
    snap: &crate::frame::Snapshot,
    regions: Vec<crate::motion::MotionRegion>,
) -> Result<UploadShot> {
    let jpeg = snap.frame.to_jpeg()?;
    let mut boxed = draw_motion_boxes(&snap.frame, &regions);
    draw_timestamp(&mut boxed);
    let boxed_jpeg = boxed.to_jpeg()?;
    Ok(UploadShot {
        camera_id: ctx.camera_id.clone(),
        captured_at: snap.frame.captured_at,
        stamp: snap.stamp,
        jpeg,
        boxed_jpeg,
        regions,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{notify_queue, Frame, FrameReadyMessage, FrameSlot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBackend {
        uploads: Arc<AtomicUsize>,
    }

    impl Backend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn check(&self) -> bool {
            true
        }
        fn configure(&mut self) -> Result<()> {
            Ok(())
        }
        fn upload(&mut self, _shot: &UploadShot) -> Result<()> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn moving_frames() -> (Frame, Frame) {
        let w = 64;
        let h = 48;
        let base = Frame::new(vec![10u8; (w * h * 3) as usize], w, h);
        let mut pixels = vec![10u8; (w * h * 3) as usize];
        for y in 10..30 {
            for x in 10..30 {
                let i = ((y * w + x) * 3) as usize;
                pixels[i] = 240;
                pixels[i + 1] = 240;
                pixels[i + 2] = 240;
            }
        }
        (base, Frame::new(pixels, w, h))
    }

    fn run_worker(ctx: DispatchContext, uploads: Arc<AtomicUsize>, stop: StopToken) {
        let mut backend = CountingBackend { uploads };
        dispatch_worker(&ctx, &mut backend, &stop).expect("worker");
    }

    #[test]
    fn fresh_notifications_with_motion_upload() {
        let slot = FrameSlot::new();
        let (tx, rx) = notify_queue();
        let (base, moved) = moving_frames();

        let ctx = DispatchContext {
            camera_id: "t/cam".to_string(),
            slot: slot.clone(),
            rx,
            filter: MotionFilter::default(),
        };
        let uploads = Arc::new(AtomicUsize::new(0));
        let stop = StopToken::new();
        let worker = {
            let uploads = uploads.clone();
            let stop = stop.clone();
            std::thread::spawn(move || run_worker(ctx, uploads, stop))
        };

        // Baseline frame, then a frame with a bright block.
        let stamp = slot.publish(base);
        tx.notify(FrameReadyMessage { stamp });
        std::thread::sleep(Duration::from_millis(100));
        let stamp = slot.publish(moved);
        tx.notify(FrameReadyMessage { stamp });
        std::thread::sleep(Duration::from_millis(200));

        stop.trigger();
        worker.join().expect("join");
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_notifications_are_dropped() {
        let slot = FrameSlot::new();
        let (tx, rx) = notify_queue();
        let (base, moved) = moving_frames();

        // Publish twice before notifying with the first stamp.
        let old_stamp = slot.publish(base);
        let _new_stamp = slot.publish(moved);
        tx.notify(FrameReadyMessage { stamp: old_stamp });

        let ctx = DispatchContext {
            camera_id: "t/cam".to_string(),
            slot: slot.clone(),
            rx,
            filter: MotionFilter::default(),
        };
        let uploads = Arc::new(AtomicUsize::new(0));
        let stop = StopToken::new();
        let worker = {
            let uploads = uploads.clone();
            let stop = stop.clone();
            std::thread::spawn(move || run_worker(ctx, uploads, stop))
        };
        std::thread::sleep(Duration::from_millis(150));
        stop.trigger();
        worker.join().expect("join");
        assert_eq!(uploads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_motion_means_no_upload() {
        let slot = FrameSlot::new();
        let (tx, rx) = notify_queue();
        let (base, _) = moving_frames();

        let ctx = DispatchContext {
            camera_id: "t/cam".to_string(),
            slot: slot.clone(),
            rx,
            filter: MotionFilter::default(),
        };
        let uploads = Arc::new(AtomicUsize::new(0));
        let stop = StopToken::new();
        let worker = {
            let uploads = uploads.clone();
            let stop = stop.clone();
            std::thread::spawn(move || run_worker(ctx, uploads, stop))
        };

        // Two identical frames: the first is warm-up, the second differs
        // nowhere from the baseline.
        let stamp = slot.publish(base.clone());
        tx.notify(FrameReadyMessage { stamp });
        std::thread::sleep(Duration::from_millis(100));
        let stamp = slot.publish(base);
        tx.notify(FrameReadyMessage { stamp });
        std::thread::sleep(Duration::from_millis(150));

        stop.trigger();
        worker.join().expect("join");
        assert_eq!(uploads.load(Ordering::SeqCst), 0);
    }
}
