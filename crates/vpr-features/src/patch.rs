use image::GrayImage;
use serde::{Deserialize, Serialize};
use vpr_core::Descriptor;

/// Cells per patch side.
const GRID: u32 = 8;

/// Length of a patch descriptor.
pub const DESCRIPTOR_DIM: usize = (GRID * GRID) as usize;

/// Patch descriptor parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchParams {
    /// Side of one grid cell in pixels. The patch side is eight cells.
    pub cell_size: u32,
}

impl Default for PatchParams {
    fn default() -> Self {
        Self { cell_size: 4 }
    }
}

/// Describe the patch centred on `(x, y)` by its 8x8 grid of cell means.
///
/// The vector is made zero-mean and unit-length so that it is invariant to
/// affine intensity changes. Returns `None` when the patch leaves the image or
/// has no texture.
pub fn patch_descriptor(image: &GrayImage, x: u32, y: u32, params: &PatchParams) -> Option<Descriptor> {
    if params.cell_size == 0 {
        return None;
    }
    let half = params.cell_size.checked_mul(GRID)? / 2;
    if x < half
        || y < half
        || x.checked_add(half)? > image.width()
        || y.checked_add(half)? > image.height()
    {
        return None;
    }

    let (x0, y0) = (x - half, y - half);
    let area = (params.cell_size as f32).powi(2);
    let mut desc: Descriptor = Vec::with_capacity(DESCRIPTOR_DIM);
    for cy in 0..GRID {
        for cx in 0..GRID {
            let mut sum = 0u64;
            for py in 0..params.cell_size {
                for px in 0..params.cell_size {
                    let ix = x0 + cx * params.cell_size + px;
                    let iy = y0 + cy * params.cell_size + py;
                    sum += u64::from(image.get_pixel(ix, iy).0[0]);
                }
            }
            desc.push(sum as f32 / area);
        }
    }

    let mean = desc.iter().sum::<f32>() / DESCRIPTOR_DIM as f32;
    desc.iter_mut().for_each(|v| *v -= mean);
    let norm = desc.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < 1e-6 {
        return None;
    }
    desc.iter_mut().for_each(|v| *v /= norm);
    Some(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    fn gradient() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| Luma([(x * 2 + y) as u8]))
    }

    #[test]
    fn test_descriptor_is_normalized() {
        let desc = patch_descriptor(&gradient(), 32, 32, &PatchParams::default())
            .expect("patch inside the image");
        assert_eq!(desc.len(), DESCRIPTOR_DIM);
        assert_relative_eq!(desc.iter().sum::<f32>(), 0.0, epsilon = 1e-4);
        assert_relative_eq!(
            desc.iter().map(|v| v * v).sum::<f32>(),
            1.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_invariant_to_brightness_and_contrast() {
        let img = gradient();
        let brighter = GrayImage::from_fn(64, 64, |x, y| Luma([img.get_pixel(x, y).0[0] / 2 + 40]));
        let params = PatchParams { cell_size: 2 };
        let a = patch_descriptor(&img, 30, 30, &params).expect("inside");
        let b = patch_descriptor(&brighter, 30, 30, &params).expect("inside");
        for (u, v) in a.iter().zip(&b) {
            assert_relative_eq!(u, v, epsilon = 2e-2);
        }
    }

    #[test]
    fn test_border_and_flat_patches() {
        let params = PatchParams::default();
        assert!(patch_descriptor(&gradient(), 10, 32, &params).is_none());
        assert!(patch_descriptor(&gradient(), 32, 60, &params).is_none());
        let flat = GrayImage::from_pixel(64, 64, Luma([90]));
        assert!(patch_descriptor(&flat, 32, 32, &params).is_none());
    }

    #[test]
    fn test_oversized_cells_describe_nothing() {
        let img = gradient();
        for cell_size in [u32::MAX, u32::MAX / GRID + 1, 1 << 20] {
            let params = PatchParams { cell_size };
            assert!(patch_descriptor(&img, 32, 32, &params).is_none());
            assert!(patch_descriptor(&img, u32::MAX, u32::MAX, &params).is_none());
        }
        assert!(patch_descriptor(&img, 32, 32, &PatchParams { cell_size: 0 }).is_none());
    }
}
