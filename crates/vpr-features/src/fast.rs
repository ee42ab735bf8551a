use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vpr_core::Keypoint;

/// Radius of the Bresenham circle.
const RADIUS: u32 = 3;

/// Bresenham circle of radius 3, clockwise from the top.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// FAST detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastParams {
    /// Intensity difference a circle pixel needs to count as brighter or darker.
    pub threshold: u8,
    /// Number of contiguous circle pixels that must all be brighter or all darker.
    pub arc_length: u8,
    /// Whether to suppress non-maximal responses in a 3x3 neighbourhood.
    pub nms: bool,
    /// Keep at most this many strongest corners.
    pub max_features: Option<usize>,
}

impl Default for FastParams {
    fn default() -> Self {
        Self {
            threshold: 20,
            arc_length: 9,
            nms: true,
            max_features: Some(1000),
        }
    }
}

// Corner candidate ordered by score, then by position so that equal scores pop deterministically.
#[derive(Copy, Clone, Eq, PartialEq)]
struct Corner {
    score: i32,
    x: u32,
    y: u32,
}

impl Ord for Corner {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.y.cmp(&self.y))
            .then_with(|| other.x.cmp(&self.x))
    }
}

impl PartialOrd for Corner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Detect FAST corners, strongest first.
///
/// The score is the sum of absolute differences over the winning arc, minus
/// the threshold, as in Rosten & Drummond. Pixels closer than 3 pixels to the
/// border are never tested.
pub fn fast_corners(image: &GrayImage, params: &FastParams) -> Vec<Keypoint> {
    let (cols, rows) = image.dimensions();
    if cols <= 2 * RADIUS || rows <= 2 * RADIUS || params.arc_length == 0 || params.arc_length > 16
    {
        return Vec::new();
    }
    let src = image.as_raw();

    // process rows in parallel
    let candidates: Vec<Corner> = (RADIUS..rows - RADIUS)
        .into_par_iter()
        .flat_map_iter(|y| {
            (RADIUS..cols - RADIUS).filter_map(move |x| {
                corner_score(src, cols, x, y, params.threshold, params.arc_length)
                    .map(|score| Corner { score, x, y })
            })
        })
        .collect();

    let mut heap: BinaryHeap<Corner> = candidates.into_iter().collect();
    let mut suppressed = vec![false; (rows * cols) as usize];
    let limit = params.max_features.unwrap_or(usize::MAX);
    let mut kept = Vec::new();

    while let Some(c) = heap.pop() {
        if kept.len() >= limit {
            break;
        }
        let idx = (c.y * cols + c.x) as usize;
        if suppressed[idx] {
            continue;
        }
        kept.push(Keypoint {
            x: c.x as f32,
            y: c.y as f32,
            size: (2 * RADIUS + 1) as f32,
            angle: -1.0,
            response: c.score as f32,
        });

        if params.nms {
            for ny in c.y - 1..=c.y + 1 {
                for nx in c.x - 1..=c.x + 1 {
                    suppressed[(ny * cols + nx) as usize] = true;
                }
            }
        }
    }

    kept
}

/// FAST score of the pixel at `(x, y)`, `None` when it is not a corner.
fn corner_score(src: &[u8], cols: u32, x: u32, y: u32, threshold: u8, arc_length: u8) -> Option<i32> {
    let at = |dx: i32, dy: i32| {
        let idx = (y as i32 + dy) as usize * cols as usize + (x as i32 + dx) as usize;
        src[idx]
    };
    let center = at(0, 0);
    let lower = center.saturating_sub(threshold);
    let upper = center.saturating_add(threshold);

    // high-speed test on the four compass points; arcs of 9 or more cover at least two of them
    if arc_length >= 9 {
        let compass = [at(0, -3), at(3, 0), at(0, 3), at(-3, 0)];
        let bright = compass.iter().filter(|&&p| p > upper).count();
        let dark = compass.iter().filter(|&&p| p < lower).count();
        if bright < 2 && dark < 2 {
            return None;
        }
    }

    let mut pixels = [0u8; 16];
    let mut bright = 0u16;
    let mut dark = 0u16;
    for (i, &(dx, dy)) in CIRCLE.iter().enumerate() {
        let p = at(dx, dy);
        pixels[i] = p;
        if p > upper {
            bright |= 1 << i;
        }
        if p < lower {
            dark |= 1 << i;
        }
    }

    let window = if arc_length == 16 {
        u16::MAX
    } else {
        (1u16 << arc_length) - 1
    };
    let start = (0..16u32).find(|&shift| {
        let w = window.rotate_left(shift);
        bright & w == w || dark & w == w
    })?;

    let score = (start..start + arc_length as u32)
        .map(|i| {
            let p = pixels[(i % 16) as usize];
            center.abs_diff(p) as i32 - threshold as i32
        })
        .sum();
    Some(score)
}
