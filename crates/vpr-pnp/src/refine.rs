use nalgebra::{Matrix6, Rotation3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::ops::intrinsics_as_vectors;
use crate::types::{ensure_paired, PnPError};

/// Damped least-squares polish of a pose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LMParams {
    /// Iteration cap.
    pub max_iters: usize,
    /// Stop once an accepted step lowers the squared error by less than this.
    pub eps: f64,
    /// Starting damping.
    pub lambda_init: f64,
    /// Damping is multiplied by this after a rejected step and divided after
    /// an accepted one.
    pub lambda_mul: f64,
}

impl Default for LMParams {
    fn default() -> Self {
        Self {
            max_iters: 20,
            eps: 1e-10,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

const ROT_STEP: f64 = 1e-6;

/// Pixel residuals of the pose `x = [rvec, t]`, written into `out` as
/// `[du0, dv0, du1, dv1, ..]`. Returns the squared error.
fn residuals_of(
    x: &Vector6<f64>,
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    rows: &(Vector3<f64>, Vector3<f64>),
    out: &mut [f64],
) -> f64 {
    let r = Rotation3::from_scaled_axis(Vector3::new(x[0], x[1], x[2]));
    let t = Vector3::new(x[3], x[4], x[5]);

    let mut err_sq = 0.0;
    for ((pw, uv), res) in world.iter().zip(image).zip(out.chunks_exact_mut(2)) {
        let pc = r * Vector3::from(*pw) + t;
        let du = rows.0.dot(&pc) / pc.z - uv[0];
        let dv = rows.1.dot(&pc) / pc.z - uv[1];
        res[0] = du;
        res[1] = dv;
        err_sq += du * du + dv * dv;
    }
    err_sq
}

/// Minimize the reprojection error of `(rvec, t)` over the given
/// correspondences, updating both in place.
///
/// Returns the final RMSE in pixels, the iterations run and whether the
/// error settled before the iteration cap.
pub fn refine_pose_lm(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    rvec: &mut [f64; 3],
    t: &mut [f64; 3],
    params: &LMParams,
) -> Result<(f64, usize, bool), PnPError> {
    ensure_paired(world, image)?;
    let n = world.len();
    if n < 3 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 3,
            actual: n,
        });
    }

    let rows = intrinsics_as_vectors(k);
    let mut x = Vector6::new(rvec[0], rvec[1], rvec[2], t[0], t[1], t[2]);
    let mut current = vec![0.0; 2 * n];
    let mut trial = vec![0.0; 2 * n];
    let mut backward = vec![0.0; 2 * n];
    let mut jacobian = vec![Vector6::<f64>::zeros(); 2 * n];

    let mut err_sq = residuals_of(&x, world, image, &rows, &mut current);
    let mut lambda = params.lambda_init;
    let mut iters = 0;
    let mut converged = false;

    while iters < params.max_iters {
        iters += 1;

        let trans_step = ROT_STEP * x.fixed_rows::<3>(3).amax().max(1.0);
        for col in 0..6 {
            let h = if col < 3 { ROT_STEP } else { trans_step };
            let mut fwd = x;
            let mut bwd = x;
            fwd[col] += h;
            bwd[col] -= h;
            residuals_of(&fwd, world, image, &rows, &mut trial);
            residuals_of(&bwd, world, image, &rows, &mut backward);
            for (j, (f, b)) in jacobian.iter_mut().zip(trial.iter().zip(&backward)) {
                j[col] = (f - b) / (2.0 * h);
            }
        }

        let mut normal = Matrix6::<f64>::zeros();
        let mut gradient = Vector6::<f64>::zeros();
        for (j, r) in jacobian.iter().zip(&current) {
            normal += j * j.transpose();
            gradient += j * *r;
        }
        for d in 0..6 {
            normal[(d, d)] += lambda;
        }

        let Some(delta) = normal.lu().solve(&(-gradient)) else {
            lambda *= params.lambda_mul;
            continue;
        };
        let candidate = x + delta;
        let candidate_err = residuals_of(&candidate, world, image, &rows, &mut trial);
        if candidate_err >= err_sq {
            lambda *= params.lambda_mul;
            continue;
        }

        let gain = err_sq - candidate_err;
        x = candidate;
        err_sq = candidate_err;
        current.copy_from_slice(&trial);
        if gain < params.eps {
            converged = true;
            break;
        }
        lambda = (lambda / params.lambda_mul).max(1e-12);
    }

    *rvec = [x[0], x[1], x[2]];
    *t = [x[3], x[4], x[5]];
    Ok(((err_sq / n as f64).sqrt(), iters, converged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    type Scene = (Vec<[f64; 3]>, Vec<[f64; 2]>, [[f64; 3]; 3]);

    fn scene() -> Scene {
        let k = [[525.0, 0.0, 320.0], [0.0, 525.0, 240.0], [0.0, 0.0, 1.0]];
        let r = Rotation3::from_scaled_axis(Vector3::new(-0.03, 0.12, 0.02));
        let t = Vector3::new(-0.2, 0.1, 0.4);
        let world: Vec<[f64; 3]> = (0..16)
            .map(|i| {
                let f = i as f64;
                [(f * 0.9).cos() * 1.5, (f * 0.45).sin(), 3.0 + (f * 0.3).cos()]
            })
            .collect();
        let image = world
            .iter()
            .map(|p| {
                let pc = r * Vector3::from(*p) + t;
                [525.0 * pc.x / pc.z + 320.0, 525.0 * pc.y / pc.z + 240.0]
            })
            .collect();
        (world, image, k)
    }

    #[test]
    fn test_refine_recovers_perturbed_pose() -> Result<(), PnPError> {
        let (world, image, k) = scene();
        let mut rvec = [-0.01, 0.1, 0.0];
        let mut t = [-0.15, 0.05, 0.5];
        let (rmse, iters, _) =
            refine_pose_lm(&world, &image, &k, &mut rvec, &mut t, &LMParams::default())?;
        assert!(iters >= 1);
        assert!(rmse < 1e-3, "rmse {rmse}");
        assert_relative_eq!(rvec[1], 0.12, epsilon = 1e-4);
        assert_relative_eq!(t[2], 0.4, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn test_refine_needs_three_points() {
        let (world, image, k) = scene();
        let res = refine_pose_lm(
            &world[..2],
            &image[..2],
            &k,
            &mut [0.0; 3],
            &mut [0.0; 3],
            &LMParams::default(),
        );
        assert_eq!(
            res,
            Err(PnPError::InsufficientCorrespondences {
                required: 3,
                actual: 2
            })
        );
    }
}
