use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for camera construction.
#[derive(Debug, Error, PartialEq)]
pub enum CameraError {
    /// A focal length is zero, negative or not finite.
    #[error("Invalid focal length: fx={fx}, fy={fy}")]
    InvalidFocalLength {
        /// Focal length along x.
        fx: f64,
        /// Focal length along y.
        fy: f64,
    },

    /// The principal point is not finite.
    #[error("Invalid principal point: cx={cx}, cy={cy}")]
    InvalidPrincipalPoint {
        /// Principal point x coordinate.
        cx: f64,
        /// Principal point y coordinate.
        cy: f64,
    },

    /// Width or height is zero.
    #[error("Invalid image size: {width}x{height}")]
    InvalidSize {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },
}

/// Intrinsic calibration of the camera that took a query image.
///
/// The intrinsics arrive with the query; the image size is only known once the
/// image has been decoded, so a freshly built model has `width == height == 0`
/// until [`CameraModel::with_size`] is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct CameraModel {
    /// Focal length in x direction
    pub fx: f64,
    /// Focal length in y direction
    pub fy: f64,
    /// Principal point x coordinate
    pub cx: f64,
    /// Principal point y coordinate
    pub cy: f64,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl CameraModel {
    /// Create a camera model from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, CameraError> {
        if !(fx.is_finite() && fy.is_finite()) || fx <= 0.0 || fy <= 0.0 {
            return Err(CameraError::InvalidFocalLength { fx, fy });
        }
        if !(cx.is_finite() && cy.is_finite()) {
            return Err(CameraError::InvalidPrincipalPoint { cx, cy });
        }
        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            width: 0,
            height: 0,
        })
    }

    /// Return a copy of the model with the image size set.
    pub fn with_size(self, width: u32, height: u32) -> Result<Self, CameraError> {
        if width == 0 || height == 0 {
            return Err(CameraError::InvalidSize { width, height });
        }
        Ok(Self {
            width,
            height,
            ..self
        })
    }

    /// Whether the image size is known.
    pub fn is_sized(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Convert to 3x3 intrinsics matrix.
    pub fn intrinsics_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Project a point expressed in the camera frame to pixel coordinates.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, point_cam: [f64; 3]) -> Option<[f64; 2]> {
        let [x, y, z] = point_cam;
        if z <= 0.0 {
            return None;
        }
        Some([self.fx * x / z + self.cx, self.fy * y / z + self.cy])
    }

    /// Whether a pixel lies inside the image, shrunk by `margin` pixels on every side.
    pub fn contains(&self, uv: [f64; 2], margin: f64) -> bool {
        let [u, v] = uv;
        u >= margin
            && v >= margin
            && u < self.width as f64 - margin
            && v < self.height as f64 - margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_new_rejects_bad_focal() {
        assert!(matches!(
            CameraModel::new(0.0, 500.0, 320.0, 240.0),
            Err(CameraError::InvalidFocalLength { .. })
        ));
        assert!(matches!(
            CameraModel::new(f64::NAN, 500.0, 320.0, 240.0),
            Err(CameraError::InvalidFocalLength { .. })
        ));
        assert!(matches!(
            CameraModel::new(500.0, 500.0, f64::INFINITY, 240.0),
            Err(CameraError::InvalidPrincipalPoint { .. })
        ));
    }

    #[test]
    fn test_camera_size() -> Result<(), CameraError> {
        let camera = CameraModel::new(500.0, 500.0, 320.0, 240.0)?;
        assert!(!camera.is_sized());
        let camera = camera.with_size(640, 480)?;
        assert!(camera.is_sized());
        assert_eq!(camera.width, 640);
        assert!(camera.with_size(0, 480).is_err());
        Ok(())
    }

    #[test]
    fn test_intrinsics_matrix() -> Result<(), CameraError> {
        let k = CameraModel::new(1000.0, 900.0, 640.0, 480.0)?.intrinsics_matrix();
        assert_eq!(k[0][0], 1000.0);
        assert_eq!(k[1][1], 900.0);
        assert_eq!(k[0][2], 640.0);
        assert_eq!(k[1][2], 480.0);
        assert_eq!(k[2][2], 1.0);
        Ok(())
    }

    #[test]
    fn test_project_and_contains() -> Result<(), CameraError> {
        let camera = CameraModel::new(500.0, 500.0, 320.0, 240.0)?.with_size(640, 480)?;
        let uv = camera.project([0.0, 0.0, 2.0]).unwrap();
        assert_eq!(uv, [320.0, 240.0]);
        assert!(camera.contains(uv, 0.0));
        assert!(camera.project([0.0, 0.0, -1.0]).is_none());

        let far_right = camera.project([2.0, 0.0, 1.0]).unwrap();
        assert!(!camera.contains(far_right, 0.0));
        assert!(!camera.contains([5.0, 5.0], 10.0));
        Ok(())
    }
}
