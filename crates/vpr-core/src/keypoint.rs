use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Feature vector attached to a keypoint.
pub type Descriptor = Vec<f32>;

/// A 2D image feature location.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Encode, Decode)]
pub struct Keypoint {
    /// Column in pixels.
    pub x: f32,
    /// Row in pixels.
    pub y: f32,
    /// Diameter of the meaningful neighbourhood.
    pub size: f32,
    /// Orientation in degrees, negative when not computed.
    pub angle: f32,
    /// Detector response; larger is stronger.
    pub response: f32,
}

impl Keypoint {
    /// Create a keypoint at a pixel location with no size or orientation.
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            size: 0.0,
            angle: -1.0,
            response: 0.0,
        }
    }

    /// Pixel coordinates as `f64`, the precision used by pose solving.
    pub fn uv(&self) -> [f64; 2] {
        [self.x as f64, self.y as f64]
    }
}
