//! Motion comparator.
//!
//! Detects change between consecutive frames by differencing intensity
//! images: grayscale -> blur -> absolute diff against the retained baseline ->
//! binary threshold -> dilate -> connected-component extraction. Each
//! surviving component becomes a `MotionRegion` with a bounding rectangle and
//! an area, after filtering against minimum sizes and configured ignore
//! rectangles.
//!
//! The comparator is stateful: every call replaces the baseline with the
//! current frame (sliding-window comparison), so the first call after startup
//! or after a geometry change always reports no motion.

use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// Pixel intensity delta required for a pixel to count as changed.
const DIFF_THRESHOLD: u8 = 25;

/// Dilation passes applied to the thresholded diff to merge adjacent blobs.
const DILATE_ITERATIONS: usize = 2;

/// Box-blur radius used to suppress sensor noise before differencing.
const BLUR_RADIUS: usize = 2;

/// An axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// True when `other` lies entirely inside this rectangle.
    pub fn contains(&self, other: &Rect) -> bool {
        self.x <= other.x
            && self.x + self.w >= other.x + other.w
            && self.y <= other.y
            && self.y + self.h >= other.y + other.h
    }
}

/// One detected change blob. Ephemeral, produced and consumed within a single
/// comparator invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionRegion {
    pub rect: Rect,
    /// Blob area in changed pixels.
    pub size: u32,
}

/// A statically configured rectangle excluded from triggering motion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IgnoreRegion {
    pub rect: Rect,
}

/// Minimum-size thresholds and ignore rectangles applied to raw regions.
#[derive(Clone, Debug, Default)]
pub struct MotionFilter {
    /// Minimum blob area; 0 disables the check.
    pub minsize: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub ignore: Vec<IgnoreRegion>,
}

impl MotionFilter {
    /// True when the region should not be reported: too small, too narrow,
    /// too short, or fully enclosed by an ignore rectangle. Partial overlap
    /// with an ignore rectangle does not suppress.
    pub fn suppresses(&self, region: &MotionRegion) -> bool {
        if self.minsize != 0 && region.size < self.minsize {
            return true;
        }
        if region.rect.w <= self.min_width {
            return true;
        }
        if region.rect.h <= self.min_height {
            return true;
        }
        self.ignore.iter().any(|ig| ig.rect.contains(&region.rect))
    }
}

/// Result of one comparator invocation.
#[derive(Clone, Debug, Default)]
pub struct MotionScan {
    pub motion: bool,
    pub regions: Vec<MotionRegion>,
}

struct GrayFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

/// Stateful frame comparator. Retains the previous (blurred, grayscale) frame
/// as the comparison baseline.
pub struct MotionDetector {
    filter: MotionFilter,
    baseline: Option<GrayFrame>,
}

impl MotionDetector {
    pub fn new(filter: MotionFilter) -> Self {
        Self {
            filter,
            baseline: None,
        }
    }

    /// Compare `frame` against the stored baseline.
    ///
    /// The warm-up call (no baseline, or frame geometry changed since the
    /// last call) stores the frame and reports no motion. An empty frame is
    /// an error and leaves the baseline untouched.
    pub fn scan(&mut self, frame: &Frame) -> Result<MotionScan> {
        if frame.is_empty() {
            return Err(anyhow!("invalid input: empty frame"));
        }
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.pixels.len() != expected {
            return Err(anyhow!(
                "invalid input: {} bytes for {}x{} RGB frame",
                frame.pixels.len(),
                frame.width,
                frame.height
            ));
        }

        let gray = box_blur(&to_gray(frame), BLUR_RADIUS);

        // A resolution change invalidates the baseline.
        if let Some(prev) = &self.baseline {
            if prev.width != gray.width || prev.height != gray.height {
                self.baseline = None;
            }
        }

        let scan = match &self.baseline {
            None => MotionScan::default(),
            Some(prev) => {
                let mut diff = abs_diff(prev, &gray);
                threshold(&mut diff.data, DIFF_THRESHOLD);
                for _ in 0..DILATE_ITERATIONS {
                    dilate(&mut diff);
                }
                let regions: Vec<MotionRegion> = components(&diff)
                    .into_iter()
                    .filter(|r| !self.filter.suppresses(r))
                    .collect();
                MotionScan {
                    motion: !regions.is_empty(),
                    regions,
                }
            }
        };

        self.baseline = Some(gray);
        Ok(scan)
    }
}

/// Draw light-gray outlines around the given regions on a copy of the frame.
pub fn draw_motion_boxes(frame: &Frame, regions: &[MotionRegion]) -> Frame {
    const BOX_GRAY: [u8; 3] = [192, 192, 192];
    let mut out = frame.clone();
    let (w, h) = (frame.width, frame.height);
    let put = |x: u32, y: u32, pixels: &mut Vec<u8>| {
        if x < w && y < h {
            let i = (y as usize * w as usize + x as usize) * 3;
            pixels[i..i + 3].copy_from_slice(&BOX_GRAY);
        }
    };
    for region in regions {
        let r = region.rect;
        for x in r.x..r.x.saturating_add(r.w) {
            put(x, r.y, &mut out.pixels);
            put(x, r.y + r.h.saturating_sub(1), &mut out.pixels);
        }
        for y in r.y..r.y.saturating_add(r.h) {
            put(r.x, y, &mut out.pixels);
            put(r.x + r.w.saturating_sub(1), y, &mut out.pixels);
        }
    }
    out
}

/// Stamp `HH:MM:SS` (UTC) into the top-left corner of `frame`, white glyphs
/// on a dark backing strip.
pub fn draw_timestamp(frame: &mut Frame) {
    const SCALE: u32 = 2;
    const GLYPH_W: u32 = 3;
    const GLYPH_H: u32 = 5;
    const PAD: u32 = 4;

    let text = frame.captured_at.format("%H:%M:%S").to_string();
    let strip_w = text.len() as u32 * (GLYPH_W + 1) * SCALE + 2 * PAD;
    let strip_h = GLYPH_H * SCALE + 2 * PAD;
    let (w, h) = (frame.width, frame.height);
    if strip_w > w || strip_h > h {
        return;
    }

    for y in 0..strip_h {
        for x in 0..strip_w {
            let i = (y as usize * w as usize + x as usize) * 3;
            frame.pixels[i..i + 3].copy_from_slice(&[32, 32, 32]);
        }
    }

    for (n, ch) in text.chars().enumerate() {
        let rows = glyph_rows(ch);
        let ox = PAD + n as u32 * (GLYPH_W + 1) * SCALE;
        for (gy, row) in rows.iter().enumerate() {
            for gx in 0..GLYPH_W {
                if row & (0b100 >> gx) == 0 {
                    continue;
                }
                for sy in 0..SCALE {
                    for sx in 0..SCALE {
                        let px = ox + gx * SCALE + sx;
                        let py = PAD + gy as u32 * SCALE + sy;
                        let i = (py as usize * w as usize + px as usize) * 3;
                        frame.pixels[i..i + 3].copy_from_slice(&[255, 255, 255]);
                    }
                }
            }
        }
    }
}

/// 3x5 glyph bitmaps for the timestamp characters, one row per byte, the low
/// three bits left to right.
fn glyph_rows(ch: char) -> [u8; 5] {
    match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        _ => [0b000; 5],
    }
}

fn to_gray(frame: &Frame) -> GrayFrame {
    let mut data = Vec::with_capacity(frame.width as usize * frame.height as usize);
    for px in frame.pixels.chunks_exact(3) {
        let luma =
            (299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32) / 1000;
        data.push(luma as u8);
    }
    GrayFrame {
        data,
        width: frame.width,
        height: frame.height,
    }
}

/// Separable box blur with clamped edges.
fn box_blur(src: &GrayFrame, radius: usize) -> GrayFrame {
    let (w, h) = (src.width as usize, src.height as usize);
    let r = radius as isize;
    let window = (2 * radius + 1) as u32;

    let mut horiz = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0u32;
            for dx in -r..=r {
                let cx = (x as isize + dx).clamp(0, w as isize - 1) as usize;
                sum += src.data[y * w + cx] as u32;
            }
            horiz[y * w + x] = (sum / window) as u8;
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0u32;
            for dy in -r..=r {
                let cy = (y as isize + dy).clamp(0, h as isize - 1) as usize;
                sum += horiz[cy * w + x] as u32;
            }
            out[y * w + x] = (sum / window) as u8;
        }
    }

    GrayFrame {
        data: out,
        width: src.width,
        height: src.height,
    }
}

fn abs_diff(a: &GrayFrame, b: &GrayFrame) -> GrayFrame {
    let data = a
        .data
        .iter()
        .zip(&b.data)
        .map(|(&x, &y)| x.abs_diff(y))
        .collect();
    GrayFrame {
        data,
        width: a.width,
        height: a.height,
    }
}

fn threshold(data: &mut [u8], cutoff: u8) {
    for v in data.iter_mut() {
        *v = if *v > cutoff { 255 } else { 0 };
    }
}

/// One 3x3 max-filter pass over a binary image.
fn dilate(img: &mut GrayFrame) {
    let (w, h) = (img.width as usize, img.height as usize);
    let src = img.data.clone();
    for y in 0..h {
        for x in 0..w {
            if src[y * w + x] == 255 {
                continue;
            }
            let mut set = false;
            'scan: for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let cy = y as isize + dy;
                    let cx = x as isize + dx;
                    if cy < 0 || cy >= h as isize || cx < 0 || cx >= w as isize {
                        continue;
                    }
                    if src[cy as usize * w + cx as usize] == 255 {
                        set = true;
                        break 'scan;
                    }
                }
            }
            if set {
                img.data[y * w + x] = 255;
            }
        }
    }
}

/// Extract 8-connected components from a binary image as bounding rectangles
/// with pixel-count areas.
fn components(img: &GrayFrame) -> Vec<MotionRegion> {
    let (w, h) = (img.width as usize, img.height as usize);
    let mut visited = vec![false; w * h];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start in 0..w * h {
        if img.data[start] != 255 || visited[start] {
            continue;
        }

        let (mut min_x, mut min_y) = (w, h);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let mut count = 0u32;

        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            count += 1;

            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let cy = y as isize + dy;
                    let cx = x as isize + dx;
                    if cy < 0 || cy >= h as isize || cx < 0 || cx >= w as isize {
                        continue;
                    }
                    let nidx = cy as usize * w + cx as usize;
                    if img.data[nidx] == 255 && !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
            }
        }

        regions.push(MotionRegion {
            rect: Rect::new(
                min_x as u32,
                min_y as u32,
                (max_x - min_x + 1) as u32,
                (max_y - min_y + 1) as u32,
            ),
            size: count,
        });
    }

    regions
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
