use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the pose solvers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PnPError {
    /// Fewer correspondences than the solver's minimal set.
    #[error("Need {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimal set size.
        required: usize,
        /// Correspondences given.
        actual: usize,
    },

    /// The point slices differ in length.
    #[error("{left_name} has {left_len} entries but {right_name} has {right_len}")]
    MismatchedArrayLengths {
        /// Name of the first slice.
        left_name: &'static str,
        /// Length of the first slice.
        left_len: usize,
        /// Name of the second slice.
        right_name: &'static str,
        /// Length of the second slice.
        right_len: usize,
    },

    /// A decomposition did not produce a usable result.
    #[error("Decomposition failed: {0}")]
    SvdFailed(String),

    /// No hypothesis put the sampled points in front of the camera.
    #[error("No model found after {iterations} RANSAC iterations")]
    NoModel {
        /// Iterations run.
        iterations: usize,
    },
}

/// Thresholds for the linear algebra inside the solvers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericTol {
    /// Singular values below this count as zero.
    pub svd: f64,
    /// Determinants below this switch to a pseudo-inverse.
    pub eps: f64,
}

impl Default for NumericTol {
    fn default() -> Self {
        Self {
            svd: 1e-12,
            eps: 1e-12,
        }
    }
}

/// A solved pose, mapping world points into the camera frame.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// World to camera rotation.
    pub rotation: [[f64; 3]; 3],
    /// World to camera translation.
    pub translation: [f64; 3],
    /// `rotation` as a scaled axis.
    pub rvec: [f64; 3],
    /// Reprojection RMSE in pixels over the points the pose was fit to.
    pub reproj_rmse: Option<f64>,
    /// Refinement iterations, when refined.
    pub num_iterations: Option<usize>,
    /// Whether refinement converged, when refined.
    pub converged: Option<bool>,
}

/// A pose solver over paired world and image points.
pub trait PnPSolver {
    /// Solver parameters.
    type Param;

    /// Solve for the world to camera pose.
    fn solve(
        world: &[[f64; 3]],
        image: &[[f64; 2]],
        k: &[[f64; 3]; 3],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError>;
}

pub(crate) fn ensure_paired(world: &[[f64; 3]], image: &[[f64; 2]]) -> Result<(), PnPError> {
    if world.len() == image.len() {
        return Ok(());
    }
    Err(PnPError::MismatchedArrayLengths {
        left_name: "world",
        left_len: world.len(),
        right_name: "image",
        right_len: image.len(),
    })
}
