use nalgebra::{Matrix3, Vector3};
use rand::seq::index;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ops::{intrinsics_as_vectors, pose_to_rt, project_sq_error, reprojection_rmse};
use crate::types::{ensure_paired, PnPError, PnPResult};
use crate::{solve_pnp, PnPMethod};

/// Hypothesize-and-verify settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RansacParams {
    /// Hypothesis cap.
    pub max_iterations: usize,
    /// A correspondence is an inlier when it reprojects within this many pixels.
    pub reproj_threshold_px: f64,
    /// Probability of drawing at least one all-inlier sample, used to stop early.
    pub confidence: f64,
    /// Sampling seed, `None` to seed from the OS.
    pub random_seed: Option<u64>,
    /// Refit the best hypothesis on its inliers.
    pub refine: bool,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            reproj_threshold_px: 8.0,
            confidence: 0.99,
            random_seed: None,
            refine: true,
        }
    }
}

/// Outcome of [`solve_pnp_ransac`].
#[derive(Debug, Clone)]
pub struct PnPRansacResult {
    /// Pose of the best hypothesis, with its RMSE over `inliers`.
    pub pose: PnPResult,
    /// Inlier indices in ascending order.
    pub inliers: Vec<usize>,
    /// Hypotheses drawn.
    pub iterations: usize,
}

/// Robust world to camera pose from correspondences that include outliers.
///
/// Draws minimal samples of five (four when that is all there is), solves
/// each with `base` and keeps the hypothesis with the most inliers. Samples
/// landing behind the camera are skipped, and the draw budget shrinks as the
/// inlier ratio grows. How many inliers make a pose acceptable is left to the
/// caller; this only fails when no hypothesis survives.
pub fn solve_pnp_ransac(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    base: PnPMethod,
    params: &RansacParams,
) -> Result<PnPRansacResult, PnPError> {
    ensure_paired(world, image)?;
    let n = world.len();
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }
    let sample_size = n.min(5);

    let mut rng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut sample_world = Vec::with_capacity(sample_size);
    let mut sample_image = Vec::with_capacity(sample_size);
    let mut best: Option<(PnPResult, Vec<usize>)> = None;
    let mut drawn = 0;
    let mut budget = params.max_iterations;

    while drawn < budget {
        drawn += 1;

        sample_world.clear();
        sample_image.clear();
        for idx in index::sample(&mut rng, n, sample_size) {
            sample_world.push(world[idx]);
            sample_image.push(image[idx]);
        }

        let hypothesis = match solve_pnp(&sample_world, &sample_image, k, base.clone()) {
            Ok(pose) => pose,
            Err(e) => {
                log::trace!("sample {drawn} unsolvable: {e}");
                continue;
            }
        };
        let (r, t) = pose_to_rt(&hypothesis.rotation, &hypothesis.translation);
        if !in_front(&r, &t, &sample_world) {
            continue;
        }

        let support = inliers_of(world, image, &r, &t, k, params.reproj_threshold_px);
        let best_len = best.as_ref().map_or(0, |(_, inl)| inl.len());
        if support.len() <= best_len {
            continue;
        }

        let ratio = support.len() as f64 / n as f64;
        best = Some((hypothesis, support));
        if ratio >= 1.0 {
            budget = drawn;
        } else if let Some(needed) =
            adaptive_iterations(ratio, sample_size, params.confidence, params.max_iterations)
        {
            budget = budget.min(needed.max(drawn));
        }
    }

    let (mut pose, mut inliers) = best.ok_or(PnPError::NoModel { iterations: drawn })?;

    if params.refine && inliers.len() >= 4 {
        let w: Vec<[f64; 3]> = inliers.iter().map(|&i| world[i]).collect();
        let im: Vec<[f64; 2]> = inliers.iter().map(|&i| image[i]).collect();
        match solve_pnp(&w, &im, k, base) {
            Ok(refit) => {
                let (r, t) = pose_to_rt(&refit.rotation, &refit.translation);
                let support = inliers_of(world, image, &r, &t, k, params.reproj_threshold_px);
                // keep the refit only if it holds on to its support
                if support.len() >= inliers.len() {
                    inliers = support;
                    pose = refit;
                }
            }
            Err(e) => log::trace!("refit on {} inliers failed: {e}", inliers.len()),
        }
    }

    let (r, t) = pose_to_rt(&pose.rotation, &pose.translation);
    pose.reproj_rmse = Some(reprojection_rmse(world, image, inliers.iter().copied(), &r, &t, k));

    Ok(PnPRansacResult {
        pose,
        inliers,
        iterations: drawn,
    })
}

/// Draws needed to hit an all-inlier sample with `confidence`, capped at
/// `max_iterations`. `None` when the ratio gives no usable estimate.
fn adaptive_iterations(
    inlier_ratio: f64,
    sample_size: usize,
    confidence: f64,
    max_iterations: usize,
) -> Option<usize> {
    let clean = inlier_ratio.powi(sample_size as i32);
    if clean <= 1e-12 || clean >= 1.0 - 1e-12 {
        return None;
    }
    let draws = ((1.0 - confidence).max(1e-12).ln() / (1.0 - clean).ln()).ceil();
    (draws.is_finite() && draws > 0.0).then(|| draws.min(max_iterations as f64) as usize)
}

fn in_front(r: &Matrix3<f64>, t: &Vector3<f64>, world: &[[f64; 3]]) -> bool {
    world.iter().all(|pw| (r * Vector3::from(*pw) + t).z > 0.0)
}

fn inliers_of(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    k: &[[f64; 3]; 3],
    threshold_px: f64,
) -> Vec<usize> {
    let (row_x, row_y) = intrinsics_as_vectors(k);
    let limit = threshold_px * threshold_px;
    (0..world.len())
        .filter(|&i| {
            project_sq_error(&world[i], &image[i], r, t, &row_x, &row_y, true)
                .is_some_and(|err_sq| err_sq <= limit)
        })
        .collect()
}
