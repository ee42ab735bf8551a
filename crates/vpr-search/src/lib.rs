#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # vpr-search
//!
//! The three database-facing steps of a query:
//!
//! - **Retrieval**: inverse-frequency voting of query words over the signature store
//! - **Pose solving**: RANSAC EPnP against ranked candidates until one is accepted
//! - **Visibility**: labels that project into the posed query camera
//!
//! ## Example: rank, then localize
//!
//! ```rust,no_run
//! use vpr_core::CameraModel;
//! use vpr_db::SignatureStore;
//! use vpr_search::{PoseSolver, QueryWords, Retrieval};
//!
//! # fn run(store: &SignatureStore, query: &QueryWords) -> Result<(), Box<dyn std::error::Error>> {
//! let camera = CameraModel::new(525.0, 525.0, 319.5, 239.5)?.with_size(640, 480)?;
//! let ranked = Retrieval::default().rank(store, &query.word_ids());
//! let estimate = PoseSolver::default().localize(store, &ranked, query, &camera)?;
//! println!("signature {} at {:?}", estimate.signature, estimate.pose.translation);
//! # Ok(())
//! # }
//! ```

mod query;
mod retrieval;

/// Geometric verification of ranked candidates.
pub mod solver;

/// Label visibility from a posed camera.
pub mod visibility;

pub use query::QueryWords;
pub use retrieval::{Candidate, Retrieval, RetrievalParams};
pub use solver::{Exhausted, PoseEstimate, PoseSolver, PoseSolverParams, Rejection};
pub use visibility::{Visibility, VisibilityParams};
