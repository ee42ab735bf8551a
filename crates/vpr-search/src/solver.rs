use serde::{Deserialize, Serialize};
use thiserror::Error;
use vpr_core::{CameraModel, DbId, Pose, SignatureId};
use vpr_db::{Signature, SignatureStore};
use vpr_pnp::{refine_pose_lm, solve_pnp_ransac, LMParams, PnPError, PnPMethod, RansacParams};

use crate::{Candidate, QueryWords};

/// EPnP needs at least this many correspondences.
const MIN_SOLVER_POINTS: usize = 4;

/// Why a single candidate was not accepted. Never leaves the trial loop.
#[derive(Debug, Error)]
pub enum Rejection {
    /// The camera has no image size.
    #[error("Camera image size is unknown")]
    UncalibratedCamera,

    /// The ranked id is not in the store.
    #[error("Signature {0} is not in the store")]
    UnknownSignature(SignatureId),

    /// Not enough shared words to attempt a solve.
    #[error("Only {found} correspondences, need {required}")]
    TooFewCorrespondences {
        /// Correspondences built.
        found: usize,
        /// Required to attempt a solve.
        required: usize,
    },

    /// The robust estimator failed.
    #[error("Pose solver failed: {0}")]
    Solver(#[from] PnPError),

    /// A pose was found but too few correspondences agree with it.
    #[error("Only {inliers} inliers, need {required}")]
    TooFewInliers {
        /// Inlier count.
        inliers: usize,
        /// Configured minimum.
        required: usize,
    },
}

/// Every candidate in the budget was rejected.
#[derive(Debug, Error, PartialEq)]
#[error("All {tried} candidates rejected")]
pub struct Exhausted {
    /// Number of candidates tried.
    pub tried: usize,
}

/// Geometric verification parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSolverParams {
    /// Minimum inlier count for a pose to be accepted.
    pub min_inliers: usize,
    /// Robust estimator settings.
    pub ransac: RansacParams,
    /// Optional Levenberg-Marquardt polish on the inliers.
    pub refine_lm: Option<LMParams>,
    /// Maximum number of ranked candidates to try; `None` tries them all.
    pub max_candidates: Option<usize>,
}

impl Default for PoseSolverParams {
    fn default() -> Self {
        Self {
            min_inliers: 3,
            ransac: RansacParams {
                random_seed: Some(0),
                ..Default::default()
            },
            refine_lm: Some(LMParams::default()),
            max_candidates: None,
        }
    }
}

/// An accepted pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    /// Matched signature.
    pub signature: SignatureId,
    /// Database of the matched signature.
    pub db_id: DbId,
    /// Query camera to world.
    pub pose: Pose,
    /// Inlier count.
    pub inliers: usize,
    /// Correspondences the solve started from.
    pub correspondences: usize,
    /// Reprojection RMSE over the inliers, in pixels.
    pub reproj_rmse: f64,
}

/// Candidate trial loop state.
#[derive(Debug)]
enum Trial {
    Trying(usize),
    Accepted(PoseEstimate),
    Exhausted,
}

/// Robust pose recovery against ranked candidates.
#[derive(Debug, Clone, Default)]
pub struct PoseSolver {
    params: PoseSolverParams,
}

impl PoseSolver {
    /// Create a solver.
    pub fn new(params: PoseSolverParams) -> Self {
        Self { params }
    }

    /// Solver parameters.
    pub fn params(&self) -> &PoseSolverParams {
        &self.params
    }

    /// Try to recover the query pose against one signature.
    ///
    /// Correspondences join query and signature on words that occur exactly
    /// once on each side. The 3D points live in the signature's camera frame,
    /// so the recovered relative pose is chained onto the signature pose.
    pub fn solve(
        &self,
        signature: &Signature,
        query: &QueryWords,
        camera: &CameraModel,
    ) -> Result<PoseEstimate, Rejection> {
        if !camera.is_sized() {
            return Err(Rejection::UncalibratedCamera);
        }

        let query_unique = query.unique();
        let (world, image): (Vec<[f64; 3]>, Vec<[f64; 2]>) = signature
            .unique_correspondences()
            .filter_map(|(word, _, point)| {
                query_unique.get(&word).map(|kp| {
                    (
                        [point[0] as f64, point[1] as f64, point[2] as f64],
                        kp.uv(),
                    )
                })
            })
            .unzip();

        let required = self.params.min_inliers.max(MIN_SOLVER_POINTS);
        if world.len() < required {
            return Err(Rejection::TooFewCorrespondences {
                found: world.len(),
                required,
            });
        }

        let k = camera.intrinsics_matrix();
        let ransac = solve_pnp_ransac(
            &world,
            &image,
            &k,
            PnPMethod::EPnPDefault,
            &self.params.ransac,
        )?;
        if ransac.inliers.len() < self.params.min_inliers {
            return Err(Rejection::TooFewInliers {
                inliers: ransac.inliers.len(),
                required: self.params.min_inliers,
            });
        }

        let mut rotation = ransac.pose.rotation;
        let mut translation = ransac.pose.translation;
        let mut rmse = ransac.pose.reproj_rmse.unwrap_or(f64::INFINITY);

        if let Some(lm) = &self.params.refine_lm {
            let w_in: Vec<[f64; 3]> = ransac.inliers.iter().map(|&i| world[i]).collect();
            let i_in: Vec<[f64; 2]> = ransac.inliers.iter().map(|&i| image[i]).collect();
            let mut rvec = ransac.pose.rvec;
            let mut t = ransac.pose.translation;
            match refine_pose_lm(&w_in, &i_in, &k, &mut rvec, &mut t, lm) {
                Ok((refined, _, _)) if refined <= rmse => {
                    // still world -> camera, only borrowing the Rodrigues conversion
                    let refined_rt = Pose::from_axis_angle(rvec, t);
                    rotation = refined_rt.rotation;
                    translation = refined_rt.translation;
                    rmse = refined;
                }
                Ok(_) => {}
                Err(e) => log::debug!("LM refinement skipped: {e}"),
            }
        }

        let relative = Pose::from_world_to_camera(&rotation, &translation);
        let pose = signature.pose().compose(&relative);

        Ok(PoseEstimate {
            signature: signature.id(),
            db_id: signature.db_id(),
            pose,
            inliers: ransac.inliers.len(),
            correspondences: world.len(),
            reproj_rmse: rmse,
        })
    }

    /// Try ranked candidates in order until one is accepted or the budget is spent.
    pub fn localize(
        &self,
        store: &SignatureStore,
        candidates: &[Candidate],
        query: &QueryWords,
        camera: &CameraModel,
    ) -> Result<PoseEstimate, Exhausted> {
        let budget = self
            .params
            .max_candidates
            .map_or(candidates.len(), |m| m.min(candidates.len()));

        let mut state = Trial::Trying(0);
        loop {
            state = match state {
                Trial::Trying(i) if i >= budget => Trial::Exhausted,
                Trial::Trying(i) => {
                    let id = candidates[i].id;
                    let outcome = store
                        .get(id)
                        .ok_or(Rejection::UnknownSignature(id))
                        .and_then(|sig| self.solve(sig, query, camera));
                    match outcome {
                        Ok(estimate) => Trial::Accepted(estimate),
                        Err(rejection) => {
                            log::debug!("candidate {id} rejected: {rejection}");
                            Trial::Trying(i + 1)
                        }
                    }
                }
                Trial::Accepted(estimate) => return Ok(estimate),
                Trial::Exhausted => return Err(Exhausted { tried: budget }),
            };
        }
    }
}
