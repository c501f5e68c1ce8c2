use crate::cancel::CancelFlag;
use crate::error::RenderError;
use crate::mesh::{SurfaceMesh, marching_cubes};
use crate::slice::SliceImage;
use crate::volume::Mask;

use image::{ImageBuffer, Rgba};
use ndarray::Array3;
use rayon::prelude::*;

/// Mask weights at or below this value are treated as sub-threshold speckle
/// and never rendered.
pub const DEFAULT_VISIBILITY_THRESHOLD: f32 = 0.15;

/// Isovalue for the optional translucent tumor-shell mesh.
const TUMOR_SHELL_ISOVALUE: f32 = 0.5;

/// Per-vertex overlay weights aligned with a [`SurfaceMesh`]. A weight of 0
/// means the vertex is not tinted.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshOverlay {
    pub weights: Vec<f32>,
    pub tint: [u8; 3],
}

/// Blends the tumor overlay onto rendered slices and meshes.
///
/// Compositing is pure: inputs are read-only and every output is a fresh
/// buffer.
#[derive(Clone, Copy, Debug)]
pub struct OverlayCompositor {
    pub tint: [u8; 3],
    pub visibility_threshold: f32,
}

impl Default for OverlayCompositor {
    fn default() -> Self {
        Self {
            tint: [220, 40, 40],
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
        }
    }
}

impl OverlayCompositor {
    /// Render a slice to an RGBA image, tinting pixels whose overlay weight
    /// exceeds the visibility threshold at alpha = weight.
    pub fn composite_slice(&self, slice: &SliceImage) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
        let (rows, cols) = slice.dim();
        let pixels = slice.pixels.as_slice().expect("slice plane is contiguous");
        let overlay = slice.overlay.as_ref().and_then(|o| o.as_slice());

        let pixel_data: Vec<u8> = (0..rows * cols)
            .into_par_iter()
            .flat_map_iter(|i| {
                let base = (pixels[i] * 255.0).clamp(0.0, 255.0) as u8;
                let alpha = overlay
                    .map(|weights| weights[i])
                    .filter(|&w| w > self.visibility_threshold)
                    .unwrap_or(0.0);
                let blend = |tint: u8| -> u8 {
                    (f32::from(base) * (1.0 - alpha) + f32::from(tint) * alpha).round() as u8
                };
                [
                    blend(self.tint[0]),
                    blend(self.tint[1]),
                    blend(self.tint[2]),
                    255,
                ]
            })
            .collect();

        ImageBuffer::from_raw(cols as u32, rows as u32, pixel_data)
            .expect("pixel buffer matches image dimensions")
    }

    /// Per-vertex overlay weights for a surface mesh.
    ///
    /// Each vertex samples the mask at its nearest voxel; the weight is kept
    /// only where it exceeds the visibility threshold and the voxel survives
    /// the current peel (`visible`). Tumor tissue hidden beneath the peel
    /// depth therefore surfaces in the overlay exactly when peeling reveals
    /// it.
    pub fn composite_mesh(
        &self,
        mesh: &SurfaceMesh,
        mask: &Mask,
        spacing: (f32, f32, f32),
        visible: impl Fn(usize, usize, usize) -> bool,
    ) -> MeshOverlay {
        let (nz, ny, nx) = mask.dim();
        let (sz, sy, sx) = spacing;
        let weights = mesh
            .positions
            .iter()
            .map(|p| {
                let x = ((p.x / sx).round() as usize).min(nx - 1);
                let y = ((p.y / sy).round() as usize).min(ny - 1);
                let z = ((p.z / sz).round() as usize).min(nz - 1);
                let weight = mask.weight(z, y, x);
                if weight > self.visibility_threshold && visible(z, y, x) {
                    weight
                } else {
                    0.0
                }
            })
            .collect();
        MeshOverlay {
            weights,
            tint: self.tint,
        }
    }

    /// Secondary translucent overlay geometry: the isosurface of the mask
    /// volume, intersected with the peel visibility predicate. `None` when no
    /// mask voxel is both certain enough and currently revealed.
    ///
    /// # Errors
    ///
    /// [`RenderError::Cancelled`] when superseded mid-extraction.
    pub fn tumor_shell(
        &self,
        mask: &Mask,
        spacing: (f32, f32, f32),
        visible: impl Fn(usize, usize, usize) -> bool + Sync,
        cancel: &CancelFlag,
    ) -> Result<Option<SurfaceMesh>, RenderError> {
        let dim = mask.dim();
        let gated = Array3::from_shape_fn(dim, |(z, y, x)| {
            let weight = mask.weight(z, y, x);
            if weight > self.visibility_threshold && visible(z, y, x) {
                weight
            } else {
                0.0
            }
        });

        let mut shell = marching_cubes(&gated, TUMOR_SHELL_ISOVALUE, cancel)?;
        if shell.is_empty() {
            return Ok(None);
        }
        shell.scale_to_physical(spacing);
        Ok(Some(shell))
    }
}
