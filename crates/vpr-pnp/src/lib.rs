#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # vpr-pnp
//!
//! World to camera pose from 2D-3D correspondences: closed-form EPnP, a
//! RANSAC loop around it for correspondences that contain wrong matches, and
//! a Levenberg-Marquardt polish on the surviving inliers.
//!
//! ```rust
//! use vpr_pnp::{solve_pnp_ransac, PnPMethod, RansacParams};
//!
//! let k = [[525.0, 0.0, 320.0], [0.0, 525.0, 240.0], [0.0, 0.0, 1.0]];
//! let world: Vec<[f64; 3]> = (0..12)
//!     .map(|i| {
//!         let f = i as f64;
//!         [(f * 1.1).cos(), (f * 0.5).sin(), 4.0 + (f * 0.7).cos()]
//!     })
//!     .collect();
//! let mut image: Vec<[f64; 2]> = world
//!     .iter()
//!     .map(|p| [525.0 * p[0] / p[2] + 320.0, 525.0 * p[1] / p[2] + 240.0])
//!     .collect();
//! // one wrong match
//! image[3] = [10.0, 10.0];
//!
//! let params = RansacParams {
//!     random_seed: Some(0),
//!     ..Default::default()
//! };
//! let found = solve_pnp_ransac(&world, &image, &k, PnPMethod::EPnPDefault, &params)?;
//! assert!(!found.inliers.contains(&3));
//! # Ok::<(), vpr_pnp::PnPError>(())
//! ```

/// EPnP.
pub mod epnp;

/// Hypothesize-and-verify pose estimation.
pub mod ransac;

/// Nonlinear pose polish.
pub mod refine;

/// Shared result, error and solver types.
pub mod types;

mod ops;

pub use epnp::{EPnP, EPnPParams};
pub use ransac::{solve_pnp_ransac, PnPRansacResult, RansacParams};
pub use refine::{refine_pose_lm, LMParams};
pub use types::{NumericTol, PnPError, PnPResult, PnPSolver};

/// Base solver used by [`solve_pnp`] and inside RANSAC.
#[derive(Debug, Clone)]
pub enum PnPMethod {
    /// EPnP with explicit parameters.
    EPnP(EPnPParams),
    /// EPnP with default parameters.
    EPnPDefault,
}

/// Solve with `method` on correspondences assumed to be all inliers.
pub fn solve_pnp(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    method: PnPMethod,
) -> Result<PnPResult, PnPError> {
    match method {
        PnPMethod::EPnP(params) => EPnP::solve(world, image, k, &params),
        PnPMethod::EPnPDefault => EPnP::solve(world, image, k, &EPnPParams::default()),
    }
}
