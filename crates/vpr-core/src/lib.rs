#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # vpr-core
//!
//! Plain data shared by every stage of the recognition pipeline: the query
//! camera, the per-query [`Session`] with its timing record, keypoints, rigid
//! poses and the terminal [`Failure`] taxonomy.

/// Pinhole camera intrinsics of a query image.
pub mod camera;

/// Terminal failures reported to ingestion channels.
pub mod error;

/// Image keypoints and descriptors.
pub mod keypoint;

/// Rigid camera poses.
pub mod pose;

/// Per-query session bookkeeping and timing.
pub mod session;

pub use camera::{CameraError, CameraModel};
pub use error::Failure;
pub use keypoint::{Descriptor, Keypoint};
pub use pose::Pose;
pub use session::{Channel, Session, SessionId, Span, Timestamp, Window};

/// Identifier of a visual word.
pub type WordId = u32;

/// Identifier of a stored signature.
pub type SignatureId = u32;

/// Identifier of the database file a signature or label was loaded from.
pub type DbId = u32;
