use nalgebra::{Matrix3, Matrix4, SMatrix, SVector, Vector3, Vector4};

const EPSILON: f64 = 1e-14;
const MAX_ITERATIONS: usize = 10;

/// Control point pairs whose distances constrain the EPnP betas.
pub(crate) const PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[[f64; 3]]) -> Vector3<f64> {
    let sum = pts
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + Vector3::from(*p));
    sum / pts.len() as f64
}

/// Construct compact intrinsics vectors used for fast projection.
pub(crate) fn intrinsics_as_vectors(k: &[[f64; 3]; 3]) -> (Vector3<f64>, Vector3<f64>) {
    (
        Vector3::new(k[0][0], k[0][1], k[0][2]),
        Vector3::new(0.0, k[1][1], k[1][2]),
    )
}

/// Convert array-form pose to nalgebra matrices/vectors.
pub(crate) fn pose_to_rt(r: &[[f64; 3]; 3], t: &[f64; 3]) -> (Matrix3<f64>, Vector3<f64>) {
    (Matrix3::from_fn(|i, j| r[i][j]), Vector3::from(*t))
}

/// Convert a nalgebra rotation to row-major array form.
pub(crate) fn matrix_to_array(r: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
        [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
        [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
    ]
}

/// Compute squared reprojection error for a single correspondence.
/// If `skip_if_behind` is true, returns `None` for points with non-positive depth.
pub(crate) fn project_sq_error(
    world_point: &[f64; 3],
    image_point: &[f64; 2],
    r_mat: &Matrix3<f64>,
    t_vec: &Vector3<f64>,
    intr_x: &Vector3<f64>,
    intr_y: &Vector3<f64>,
    skip_if_behind: bool,
) -> Option<f64> {
    let pc = r_mat * Vector3::from(*world_point) + t_vec;
    if skip_if_behind && pc.z <= 0.0 {
        return None;
    }
    let inv_z = 1.0 / pc.z;
    let du = intr_x.dot(&pc) * inv_z - image_point[0];
    let dv = intr_y.dot(&pc) * inv_z - image_point[1];
    Some(du.mul_add(du, dv * dv))
}

/// Root-mean-square reprojection error over a subset of correspondences.
///
/// Points behind the camera count with an infinite error.
pub(crate) fn reprojection_rmse(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    indices: impl Iterator<Item = usize>,
    r_mat: &Matrix3<f64>,
    t_vec: &Vector3<f64>,
    k: &[[f64; 3]; 3],
) -> f64 {
    let (intr_x, intr_y) = intrinsics_as_vectors(k);
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for idx in indices {
        count += 1;
        match project_sq_error(
            &world[idx],
            &image[idx],
            r_mat,
            t_vec,
            &intr_x,
            &intr_y,
            true,
        ) {
            Some(err2) => sum_sq += err2,
            None => return f64::INFINITY,
        }
    }
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}

/// Quadratic monomials of the betas, in the column order of the `L` matrix:
/// `[b00, b01, b11, b02, b12, b22, b03, b13, b23, b33]`.
pub(crate) fn beta_products(b: &[f64; 4]) -> SVector<f64, 10> {
    SVector::<f64, 10>::from_column_slice(&[
        b[0] * b[0],
        b[0] * b[1],
        b[1] * b[1],
        b[0] * b[2],
        b[1] * b[2],
        b[2] * b[2],
        b[0] * b[3],
        b[1] * b[3],
        b[2] * b[3],
        b[3] * b[3],
    ])
}

/// Solve `a * x = b` for a symmetric positive-definite `a` with an unrolled
/// Cholesky factorization. `None` when `a` is not positive-definite.
#[inline(always)]
pub(crate) fn solve_4x4_cholesky(a: &Matrix4<f64>, b: &Vector4<f64>) -> Option<Vector4<f64>> {
    // L * L^T = A
    if a.m11 < EPSILON {
        return None;
    }
    let l_11 = a.m11.sqrt();
    let l_21 = a.m21 / l_11;
    let l_31 = a.m31 / l_11;
    let l_41 = a.m41 / l_11;

    let l_22_sq = a.m22 - l_21 * l_21;
    if l_22_sq < EPSILON {
        return None;
    }
    let l_22 = l_22_sq.sqrt();
    let l_32 = (a.m32 - l_31 * l_21) / l_22;
    let l_42 = (a.m42 - l_41 * l_21) / l_22;

    let l_33_sq = a.m33 - l_31 * l_31 - l_32 * l_32;
    if l_33_sq < EPSILON {
        return None;
    }
    let l_33 = l_33_sq.sqrt();
    let l_43 = (a.m43 - l_41 * l_31 - l_42 * l_32) / l_33;

    let l_44_sq = a.m44 - l_41 * l_41 - l_42 * l_42 - l_43 * l_43;
    if l_44_sq < EPSILON {
        return None;
    }
    let l_44 = l_44_sq.sqrt();

    // L * y = b
    let y1 = b[0] / l_11;
    let y2 = (b[1] - l_21 * y1) / l_22;
    let y3 = (b[2] - (l_31 * y1 + l_32 * y2)) / l_33;
    let y4 = (b[3] - (l_41 * y1 + l_42 * y2 + l_43 * y3)) / l_44;

    // L^T * x = y
    let x4 = y4 / l_44;
    let x3 = (y3 - l_43 * x4) / l_33;
    let x2 = (y2 - (l_32 * x3 + l_42 * x4)) / l_22;
    let x1 = (y1 - (l_21 * x2 + l_31 * x3 + l_41 * x4)) / l_11;
    Some(Vector4::new(x1, x2, x3, x4))
}

/// Refines the betas with Gauss-Newton so that the distances between the
/// recovered control points match `rho`.
pub(crate) fn gauss_newton(beta_init: [f64; 4], l: &SMatrix<f64, 6, 10>, rho: &[f64; 6]) -> [f64; 4] {
    const DAMPING: f64 = 1e-12;
    const STOP_EPS: f64 = 1e-12;

    let rho_vec = SVector::<f64, 6>::from_column_slice(rho);
    let mut b = beta_init;

    for _ in 0..MAX_ITERATIONS {
        let mut jac = SMatrix::<f64, 6, 4>::zeros();
        for i in 0..6 {
            let row = l.row(i);
            jac[(i, 0)] = 2.0 * row[0] * b[0] + row[1] * b[1] + row[3] * b[2] + row[6] * b[3];
            jac[(i, 1)] = row[1] * b[0] + 2.0 * row[2] * b[1] + row[4] * b[2] + row[7] * b[3];
            jac[(i, 2)] = row[3] * b[0] + row[4] * b[1] + 2.0 * row[5] * b[2] + row[8] * b[3];
            jac[(i, 3)] = row[6] * b[0] + row[7] * b[1] + row[8] * b[2] + 2.0 * row[9] * b[3];
        }
        let residual = rho_vec - l * beta_products(&b);

        let mut a: Matrix4<f64> = jac.transpose() * jac;
        let rhs: Vector4<f64> = jac.transpose() * residual;
        for d in 0..4 {
            a[(d, d)] += DAMPING;
        }

        match solve_4x4_cholesky(&a, &rhs) {
            Some(delta) => {
                for (bi, di) in b.iter_mut().zip(delta.iter()) {
                    *bi += di;
                }
                if delta.norm() < STOP_EPS {
                    break;
                }
            }
            None => break,
        }
    }

    b
}
