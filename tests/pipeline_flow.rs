//! End-to-end flow: capture into the shared slot, dispatch on fresh
//! notifications, and land files in a local save directory.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use sentrycam::capture::Resolution;
use sentrycam::dispatch::{dispatch_worker, DispatchContext};
use sentrycam::frame::{notify_queue, Frame, FrameReadyMessage, FrameSlot};
use sentrycam::motion::MotionFilter;
use sentrycam::storage::{Backend, LocalFolderBackend};
use sentrycam::{pipeline, SentrycamConfig, StopToken};

fn frame_with_block(w: u32, h: u32, bright: bool) -> Frame {
    let mut pixels = vec![20u8; (w * h * 3) as usize];
    if bright {
        for y in 20..60 {
            for x in 20..60 {
                let i = ((y * w + x) * 3) as usize;
                pixels[i] = 230;
                pixels[i + 1] = 230;
                pixels[i + 2] = 230;
            }
        }
    }
    Frame::new(pixels, w, h)
}

#[test]
fn motion_event_lands_in_the_save_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let slot = FrameSlot::new();
    let (tx, rx) = notify_queue();

    let cfg = {
        let mut cfg = SentrycamConfig::default();
        cfg.local.enabled = true;
        cfg.local.savedir = dir.path().to_path_buf();
        cfg
    };
    let ctx = DispatchContext {
        camera_id: cfg.camera_id.clone(),
        slot: slot.clone(),
        rx,
        filter: MotionFilter::default(),
    };
    let stop = StopToken::new();
    let worker = {
        let stop = stop.clone();
        let settings = cfg.local.clone();
        std::thread::spawn(move || {
            let mut backend = LocalFolderBackend::new(&settings);
            dispatch_worker(&ctx, &mut backend, &stop).expect("worker");
        })
    };

    // Warm-up frame, then one with a bright block.
    let stamp = slot.publish(frame_with_block(160, 120, false));
    tx.notify(FrameReadyMessage { stamp });
    std::thread::sleep(Duration::from_millis(150));
    let stamp = slot.publish(frame_with_block(160, 120, true));
    tx.notify(FrameReadyMessage { stamp });

    // Wait for both the boxed and clean copies to appear.
    let deadline = Instant::now() + Duration::from_secs(5);
    let saved = loop {
        let count = walk_jpegs(dir.path());
        if count >= 2 {
            break count;
        }
        if Instant::now() > deadline {
            break count;
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    stop.trigger();
    worker.join().expect("join");
    assert_eq!(saved, 2, "expected a boxed and a clean jpeg");
}

#[test]
fn supervised_fleet_starts_and_shuts_down_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = SentrycamConfig::default();
    cfg.camera.camera.resolution = Resolution::Small;
    cfg.camera.camera.time_delay = Duration::from_millis(20);
    cfg.local.enabled = true;
    cfg.local.savedir = dir.path().to_path_buf();

    let mut supervisor = pipeline::build(&cfg).expect("build");
    let desired = supervisor.desired_flags();
    let runner = std::thread::spawn(move || {
        supervisor.run();
    });

    // Let the fleet come up and capture for a moment.
    std::thread::sleep(Duration::from_secs(2));
    for flag in &desired {
        flag.store(false, Ordering::SeqCst);
    }
    runner.join().expect("supervisor run");
}

#[test]
fn local_backend_check_needs_configure_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = SentrycamConfig::default();
    cfg.local.savedir = dir.path().join("frames");
    let mut backend = LocalFolderBackend::new(&cfg.local);
    assert!(!backend.check());
    backend.configure().expect("configure");
    assert!(backend.check());
}

fn walk_jpegs(root: &std::path::Path) -> usize {
    let mut count = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "jpg") {
                count += 1;
            }
        }
    }
    count
}
