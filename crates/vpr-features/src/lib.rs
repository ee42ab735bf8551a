#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # vpr-features
//!
//! The boundary between raw query bytes and the recognition pipeline:
//! [`decode_image`] turns an encoded image into a grayscale buffer and a
//! [`FeatureExtractor`] turns that buffer into keypoints with descriptors.
//!
//! [`FastPatchExtractor`] is the bundled extractor: FAST-9 corners with
//! non-maximum suppression, described by normalized patch intensities.

/// FAST corner detection.
pub mod fast;

mod patch;

pub use fast::{fast_corners, FastParams};
pub use patch::{patch_descriptor, PatchParams, DESCRIPTOR_DIM};

use bincode::{Decode, Encode};
use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vpr_core::{Descriptor, Keypoint};

/// Errors raised while decoding or describing a query image.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The bytes are not a supported image.
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// The decoded image has no pixels.
    #[error("Decoded image is empty")]
    EmptyImage,

    /// Keypoints and descriptors do not pair up.
    #[error("{keypoints} keypoints but {descriptors} descriptors")]
    Unpaired {
        /// Number of keypoints.
        keypoints: usize,
        /// Number of descriptors.
        descriptors: usize,
    },
}

/// Keypoints with one descriptor each.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Features {
    keypoints: Vec<Keypoint>,
    descriptors: Vec<Descriptor>,
}

impl Features {
    /// Pair keypoints with descriptors.
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Vec<Descriptor>) -> Result<Self, FeatureError> {
        if keypoints.len() != descriptors.len() {
            return Err(FeatureError::Unpaired {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    /// Detected keypoints.
    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Descriptors, parallel to [`Features::keypoints`].
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Whether nothing was detected.
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Split into keypoints and descriptors.
    pub fn into_parts(self) -> (Vec<Keypoint>, Vec<Descriptor>) {
        (self.keypoints, self.descriptors)
    }
}

/// Computes local features on a grayscale image.
///
/// Implementations must be deterministic: the same image yields the same
/// features in the same order.
pub trait FeatureExtractor: Send + Sync {
    /// Detect and describe features.
    fn extract(&self, image: &GrayImage) -> Result<Features, FeatureError>;

    /// Length of the produced descriptors.
    fn descriptor_dim(&self) -> usize;
}

/// Decode an encoded image (PNG or JPEG) to 8-bit grayscale.
pub fn decode_image(bytes: &[u8]) -> Result<GrayImage, FeatureError> {
    let image = image::load_from_memory(bytes)?.into_luma8();
    if image.width() == 0 || image.height() == 0 {
        return Err(FeatureError::EmptyImage);
    }
    Ok(image)
}

/// Parameters of [`FastPatchExtractor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorParams {
    /// Corner detection.
    pub fast: FastParams,
    /// Patch description.
    pub patch: PatchParams,
}

/// FAST corners described by normalized patch intensities.
#[derive(Debug, Clone, Default)]
pub struct FastPatchExtractor {
    params: ExtractorParams,
}

impl FastPatchExtractor {
    /// Create an extractor.
    pub fn new(params: ExtractorParams) -> Self {
        Self { params }
    }
}

impl FeatureExtractor for FastPatchExtractor {
    fn extract(&self, image: &GrayImage) -> Result<Features, FeatureError> {
        let corners = fast_corners(image, &self.params.fast);

        let (keypoints, descriptors): (Vec<Keypoint>, Vec<Descriptor>) = corners
            .par_iter()
            .filter_map(|kp| {
                patch_descriptor(image, kp.x as u32, kp.y as u32, &self.params.patch)
                    .map(|d| (*kp, d))
            })
            .unzip();

        log::trace!(
            "{} corners, {} described",
            corners.len(),
            keypoints.len()
        );
        Features::new(keypoints, descriptors)
    }

    fn descriptor_dim(&self) -> usize {
        DESCRIPTOR_DIM
    }
}
