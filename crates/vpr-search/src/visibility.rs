use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use vpr_core::{CameraModel, Pose};
use vpr_db::Label;

/// Label visibility parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityParams {
    /// Pixels trimmed from every image border.
    pub margin_px: f64,
    /// Labels farther than this from the camera are not visible.
    pub max_distance: Option<f64>,
}

/// Decides which labels a posed camera can see.
#[derive(Debug, Clone, Default)]
pub struct Visibility {
    params: VisibilityParams,
}

impl Visibility {
    /// Create a visibility check.
    pub fn new(params: VisibilityParams) -> Self {
        Self { params }
    }

    /// Names of the labels that project inside the image of `camera` placed at `pose`.
    ///
    /// Labels behind the camera never count. The result is sorted and free of
    /// duplicate names.
    pub fn labels_visible<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a Label>,
        pose: &Pose,
        camera: &CameraModel,
    ) -> BTreeSet<String> {
        if !camera.is_sized() {
            return BTreeSet::new();
        }

        labels
            .into_iter()
            .filter(|label| {
                let p_cam = pose.to_camera(label.position);
                if let Some(max) = self.params.max_distance {
                    let d2 = p_cam.iter().map(|v| v * v).sum::<f64>();
                    if d2 > max * max {
                        return false;
                    }
                }
                camera
                    .project(p_cam)
                    .is_some_and(|uv| camera.contains(uv, self.params.margin_px))
            })
            .map(|label| label.name.clone())
            .collect()
    }
}
