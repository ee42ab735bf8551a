use bincode::{Decode, Encode};
use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid transform from a camera frame to the world frame.
///
/// The camera frame is the optical frame: x right, y down, z forward. The
/// rotation is stored row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Pose {
    /// Rotation camera → world.
    pub rotation: [[f64; 3]; 3],
    /// Camera centre in world coordinates.
    pub translation: [f64; 3],
}

impl Pose {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Create a pose from a rotation and a translation (camera → world).
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a pose from an axis-angle rotation vector and a translation.
    pub fn from_axis_angle(rvec: [f64; 3], translation: [f64; 3]) -> Self {
        let r = Rotation3::from_scaled_axis(Vector3::from(rvec));
        Self::from_parts(r.matrix(), &Vector3::from(translation))
    }

    /// Build the camera → world pose from a world → camera transform, as
    /// returned by PnP solvers.
    pub fn from_world_to_camera(rotation: &[[f64; 3]; 3], translation: &[f64; 3]) -> Self {
        let r_cw = to_matrix(rotation);
        let t_cw = Vector3::from(*translation);
        let r_wc = r_cw.transpose();
        Self::from_parts(&r_wc, &(-(r_wc * t_cw)))
    }

    /// The world → camera transform `(R, t)` such that `p_cam = R * p_world + t`.
    pub fn world_to_camera(&self) -> ([[f64; 3]; 3], [f64; 3]) {
        let inv = self.inverse();
        (inv.rotation, inv.translation)
    }

    /// Whether the pose is undefined: non-finite values or a zero rotation.
    pub fn is_null(&self) -> bool {
        let finite = self.rotation.iter().flatten().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite());
        let zero_rotation = self.rotation.iter().flatten().all(|v| *v == 0.0);
        !finite || zero_rotation
    }

    /// Rotation as a nalgebra matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        to_matrix(&self.rotation)
    }

    /// Translation as a nalgebra vector.
    pub fn translation_vector(&self) -> Vector3<f64> {
        Vector3::from(self.translation)
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Pose) -> Pose {
        let r1 = self.rotation_matrix();
        let r = r1 * other.rotation_matrix();
        let t = r1 * other.translation_vector() + self.translation_vector();
        Self::from_parts(&r, &t)
    }

    /// The inverse transform.
    pub fn inverse(&self) -> Pose {
        let r_t = self.rotation_matrix().transpose();
        let t = -(r_t * self.translation_vector());
        Self::from_parts(&r_t, &t)
    }

    /// Map a point from the camera frame to the world frame.
    pub fn transform_point(&self, point: [f64; 3]) -> [f64; 3] {
        let p = self.rotation_matrix() * Vector3::from(point) + self.translation_vector();
        [p.x, p.y, p.z]
    }

    /// Map a point from the world frame into this camera's frame.
    pub fn to_camera(&self, point_world: [f64; 3]) -> [f64; 3] {
        let p = self.rotation_matrix().transpose()
            * (Vector3::from(point_world) - self.translation_vector());
        [p.x, p.y, p.z]
    }

    /// Euclidean distance between camera centres.
    pub fn translation_error(&self, other: &Pose) -> f64 {
        (self.translation_vector() - other.translation_vector()).norm()
    }

    /// Angle in radians of the relative rotation between two poses.
    pub fn rotation_error(&self, other: &Pose) -> f64 {
        let rel = self.rotation_matrix().transpose() * other.rotation_matrix();
        let cos = ((rel.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
        cos.acos()
    }

    fn from_parts(r: &Matrix3<f64>, t: &Vector3<f64>) -> Self {
        Self {
            rotation: [
                [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
                [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
                [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
            ],
            translation: [t.x, t.y, t.z],
        }
    }
}

fn to_matrix(r: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_null_pose() {
        assert!(!Pose::identity().is_null());
        assert!(Pose::new([[0.0; 3]; 3], [1.0, 2.0, 3.0]).is_null());
        let mut pose = Pose::identity();
        pose.translation[1] = f64::NAN;
        assert!(pose.is_null());
    }

    #[test]
    fn test_compose_inverse_is_identity() {
        let pose = Pose::from_axis_angle([0.1, -0.3, 0.2], [1.0, -2.0, 0.5]);
        let id = pose.compose(&pose.inverse());
        assert_relative_eq!(id.translation_error(&Pose::identity()), 0.0, epsilon = 1e-12);
        assert_relative_eq!(id.rotation_error(&Pose::identity()), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_world_to_camera_roundtrip() {
        let pose = Pose::from_axis_angle([0.2, 0.1, -0.4], [0.3, 0.2, -1.0]);
        let (r, t) = pose.world_to_camera();
        let back = Pose::from_world_to_camera(&r, &t);
        assert_relative_eq!(back.translation_error(&pose), 0.0, epsilon = 1e-12);
        assert_relative_eq!(back.rotation_error(&pose), 0.0, epsilon = 1e-6);

        let p_world = [1.0, 2.0, 5.0];
        let p_cam = pose.to_camera(p_world);
        let again = pose.transform_point(p_cam);
        for i in 0..3 {
            assert_relative_eq!(again[i], p_world[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rotation_error_known_angle() {
        let a = Pose::identity();
        let b = Pose::from_axis_angle([0.0, 0.0, 0.25], [0.0; 3]);
        assert_relative_eq!(a.rotation_error(&b), 0.25, epsilon = 1e-9);
    }
}
