//! Efficient Perspective-n-Point (EPnP) solver.
//!
//! Every world point is written as a barycentric combination of four control
//! points. The camera-frame control points lie in the null space of a linear
//! system built from the image observations; their scale is recovered from the
//! known inter-control-point distances, and the pose is the rigid alignment of
//! the reconstructed camera-frame points onto the world points.

use crate::ops::{compute_centroid, gauss_newton, matrix_to_array, reprojection_rmse, PAIRS};
use crate::refine::{refine_pose_lm, LMParams};
use crate::types::{ensure_paired, NumericTol, PnPError, PnPResult, PnPSolver};
use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, SMatrix, SVector, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};

/// Marker type representing the EPnP algorithm.
pub struct EPnP;

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EPnPParams {
    /// Numeric tolerances.
    pub tol: NumericTol,
    /// Optional Levenberg-Marquardt polish on all correspondences.
    pub refine_lm: Option<LMParams>,
}

impl PnPSolver for EPnP {
    type Param = EPnPParams;

    fn solve(
        world: &[[f64; 3]],
        image: &[[f64; 2]],
        k: &[[f64; 3]; 3],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_epnp(world, image, k, params)
    }
}

type NullSpace = [SVector<f64, 12>; 4];

fn solve_epnp(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    params: &EPnPParams,
) -> Result<PnPResult, PnPError> {
    ensure_paired(world, image)?;
    let n = world.len();
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let cw = select_control_points(world);
    let alphas = compute_barycentric(world, &cw, &params.tol)?;
    let null4 = null_space(image, &alphas, k);
    let l = compute_l_6x10(&null4);
    let rho = compute_rho(&cw);

    let candidates = [
        betas_approx_1(&l, &rho, &params.tol)?,
        betas_approx_2(&l, &rho, &params.tol)?,
        betas_approx_3(&l, &rho, &params.tol)?,
    ];

    let mut best: Option<(f64, Matrix3<f64>, Vector3<f64>)> = None;
    for betas in candidates {
        let betas = gauss_newton(betas, &l, &rho);
        let Some((r, t)) = compute_r_and_t(&null4, &betas, &alphas, world) else {
            continue;
        };
        let err = reprojection_rmse(world, image, 0..n, &r, &t, k);
        if best.as_ref().map_or(true, |(e, _, _)| err < *e) {
            best = Some((err, r, t));
        }
    }

    let (rmse, r, t) =
        best.ok_or_else(|| PnPError::SvdFailed("no beta approximation produced a pose".into()))?;

    let rvec = Rotation3::from_matrix_unchecked(r).scaled_axis();
    let mut result = PnPResult {
        rotation: matrix_to_array(&r),
        translation: [t.x, t.y, t.z],
        rvec: [rvec.x, rvec.y, rvec.z],
        reproj_rmse: Some(rmse),
        num_iterations: None,
        converged: None,
    };

    if let Some(lm) = &params.refine_lm {
        let mut rvec = result.rvec;
        let mut t = result.translation;
        let (rmse, iters, converged) = refine_pose_lm(world, image, k, &mut rvec, &mut t, lm)?;
        let r = Rotation3::from_scaled_axis(Vector3::from(rvec));
        result = PnPResult {
            rotation: matrix_to_array(r.matrix()),
            translation: t,
            rvec,
            reproj_rmse: Some(rmse),
            num_iterations: Some(iters),
            converged: Some(converged),
        };
    }

    Ok(result)
}

/// Centroid plus the three principal directions scaled by their spread.
fn select_control_points(world: &[[f64; 3]]) -> [Vector3<f64>; 4] {
    let c = compute_centroid(world);
    let cov = world.iter().fold(Matrix3::zeros(), |acc, p| {
        let d = Vector3::from(*p) - c;
        acc + d * d.transpose()
    });
    let eig = SymmetricEigen::new(cov);
    let n = world.len() as f64;
    let mut cw = [c; 4];
    for i in 0..3 {
        let scale = (eig.eigenvalues[i].max(0.0) / n).sqrt();
        cw[i + 1] = c + eig.eigenvectors.column(i) * scale;
    }
    cw
}

fn compute_barycentric(
    world: &[[f64; 3]],
    cw: &[Vector3<f64>; 4],
    tol: &NumericTol,
) -> Result<Vec<[f64; 4]>, PnPError> {
    let cc = Matrix3::from_columns(&[cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]]);
    let cc_inv = if cc.determinant().abs() > tol.eps {
        cc.try_inverse()
    } else {
        None
    };
    let cc_inv = match cc_inv {
        Some(inv) => inv,
        None => cc
            .pseudo_inverse(tol.svd)
            .map_err(|e| PnPError::SvdFailed(e.to_string()))?,
    };

    Ok(world
        .iter()
        .map(|p| {
            let a = cc_inv * (Vector3::from(*p) - cw[0]);
            [1.0 - a.x - a.y - a.z, a.x, a.y, a.z]
        })
        .collect())
}

/// Four eigenvectors of `MᵀM` with the smallest eigenvalues, smallest first.
fn null_space(image: &[[f64; 2]], alphas: &[[f64; 4]], k: &[[f64; 3]; 3]) -> NullSpace {
    let (fx, fy, cx, cy) = (k[0][0], k[1][1], k[0][2], k[1][2]);
    let mut mtm = SMatrix::<f64, 12, 12>::zeros();
    for (uv, a) in image.iter().zip(alphas.iter()) {
        let mut row_u = SVector::<f64, 12>::zeros();
        let mut row_v = SVector::<f64, 12>::zeros();
        for j in 0..4 {
            row_u[3 * j] = a[j] * fx;
            row_u[3 * j + 2] = a[j] * (cx - uv[0]);
            row_v[3 * j + 1] = a[j] * fy;
            row_v[3 * j + 2] = a[j] * (cy - uv[1]);
        }
        mtm += row_u * row_u.transpose() + row_v * row_v.transpose();
    }

    let eig = SymmetricEigen::new(mtm);
    let mut order: Vec<usize> = (0..12).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    std::array::from_fn(|i| eig.eigenvectors.column(order[i]).into_owned())
}

fn compute_l_6x10(null4: &NullSpace) -> SMatrix<f64, 6, 10> {
    let mut l = SMatrix::<f64, 6, 10>::zeros();
    for (r, &(a, b)) in PAIRS.iter().enumerate() {
        let d: [Vector3<f64>; 4] =
            std::array::from_fn(|c| null4[c].fixed_rows::<3>(3 * a) - null4[c].fixed_rows::<3>(3 * b));
        l[(r, 0)] = d[0].dot(&d[0]);
        l[(r, 1)] = 2.0 * d[0].dot(&d[1]);
        l[(r, 2)] = d[1].dot(&d[1]);
        l[(r, 3)] = 2.0 * d[0].dot(&d[2]);
        l[(r, 4)] = 2.0 * d[1].dot(&d[2]);
        l[(r, 5)] = d[2].dot(&d[2]);
        l[(r, 6)] = 2.0 * d[0].dot(&d[3]);
        l[(r, 7)] = 2.0 * d[1].dot(&d[3]);
        l[(r, 8)] = 2.0 * d[2].dot(&d[3]);
        l[(r, 9)] = d[3].dot(&d[3]);
    }
    l
}

fn compute_rho(cw: &[Vector3<f64>; 4]) -> [f64; 6] {
    std::array::from_fn(|r| {
        let (a, b) = PAIRS[r];
        (cw[a] - cw[b]).norm_squared()
    })
}

/// Least-squares solve of `L[:, cols] * x = rho`.
fn solve_columns(
    l: &SMatrix<f64, 6, 10>,
    rho: &[f64; 6],
    cols: &[usize],
    tol: &NumericTol,
) -> Result<DVector<f64>, PnPError> {
    let sub = DMatrix::from_fn(6, cols.len(), |i, j| l[(i, cols[j])]);
    let rhs = DVector::from_column_slice(rho);
    sub.svd(true, true)
        .solve(&rhs, tol.svd)
        .map_err(|e| PnPError::SvdFailed(e.to_string()))
}

/// Assumes all four betas are active: solves for `[b00, b01, b02, b03]`.
fn betas_approx_1(
    l: &SMatrix<f64, 6, 10>,
    rho: &[f64; 6],
    tol: &NumericTol,
) -> Result<[f64; 4], PnPError> {
    let b4 = solve_columns(l, rho, &[0, 1, 3, 6], tol)?;
    let s = b4[0].abs().sqrt();
    if s <= tol.eps {
        return Ok([0.0; 4]);
    }
    let sign = if b4[0] < 0.0 { -1.0 } else { 1.0 };
    Ok([s, sign * b4[1] / s, sign * b4[2] / s, sign * b4[3] / s])
}

/// Two active betas: solves for `[b00, b01, b11]`.
fn betas_approx_2(
    l: &SMatrix<f64, 6, 10>,
    rho: &[f64; 6],
    tol: &NumericTol,
) -> Result<[f64; 4], PnPError> {
    let b3 = solve_columns(l, rho, &[0, 1, 2], tol)?;
    let (b0, b1) = leading_pair(b3[0], b3[1], b3[2]);
    Ok([b0, b1, 0.0, 0.0])
}

/// Three active betas: solves for `[b00, b01, b11, b02, b12]`.
fn betas_approx_3(
    l: &SMatrix<f64, 6, 10>,
    rho: &[f64; 6],
    tol: &NumericTol,
) -> Result<[f64; 4], PnPError> {
    let b5 = solve_columns(l, rho, &[0, 1, 2, 3, 4], tol)?;
    let (b0, b1) = leading_pair(b5[0], b5[1], b5[2]);
    let b2 = if b0.abs() > tol.eps { b5[3] / b0 } else { 0.0 };
    Ok([b0, b1, b2, 0.0])
}

fn leading_pair(b00: f64, b01: f64, b11: f64) -> (f64, f64) {
    let (mut b0, b1) = if b00 < 0.0 {
        ((-b00).sqrt(), if b11 < 0.0 { (-b11).sqrt() } else { 0.0 })
    } else {
        (b00.sqrt(), if b11 > 0.0 { b11.sqrt() } else { 0.0 })
    };
    if b01 < 0.0 {
        b0 = -b0;
    }
    (b0, b1)
}

/// Rebuild the camera-frame points from the betas and align them with the world points.
fn compute_r_and_t(
    null4: &NullSpace,
    betas: &[f64; 4],
    alphas: &[[f64; 4]],
    world: &[[f64; 3]],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let ccs: [Vector3<f64>; 4] = std::array::from_fn(|j| {
        (0..4).fold(Vector3::zeros(), |acc, c| {
            acc + null4[c].fixed_rows::<3>(3 * j) * betas[c]
        })
    });

    let mut pcs: Vec<Vector3<f64>> = alphas
        .iter()
        .map(|a| ccs[0] * a[0] + ccs[1] * a[1] + ccs[2] * a[2] + ccs[3] * a[3])
        .collect();

    // the reconstruction is defined up to sign; keep the solution in front of the camera
    if pcs[0].z < 0.0 {
        for p in pcs.iter_mut() {
            *p = -*p;
        }
    }

    let n = pcs.len() as f64;
    let pc0 = pcs.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let pw0 = compute_centroid(world);

    let abt = pcs
        .iter()
        .zip(world.iter())
        .fold(Matrix3::zeros(), |acc, (pc, pw)| {
            acc + (pc - pc0) * (Vector3::from(*pw) - pw0).transpose()
        });

    let svd = abt.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let d = (u * v_t).determinant().signum();
    let r = u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d)) * v_t;
    let t = pc0 - r * pw0;

    if !(r.iter().all(|v| v.is_finite()) && t.iter().all(|v| v.is_finite())) {
        return None;
    }
    Some((r, t))
}
