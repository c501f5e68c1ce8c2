use crate::enums::Orientation;
use crate::error::RenderError;
use crate::volume::{Mask, VoxelVolume};
use crate::windowing::{WindowSettings, WindowingTransform};

use ndarray::{Array2, ArrayView2, s};
use rayon::prelude::*;

/// A single windowed 2D plane extracted from a volume, with an optional
/// aligned tumor-overlay weight plane.
///
/// `pixels` holds display intensities in `[0, 1]` (post-windowing). `overlay`
/// holds raw mask weights sampled at the same coordinates; gating weights
/// against the visibility threshold is the compositor's job.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceImage {
    pub orientation: Orientation,
    pub index: usize,
    pub pixels: Array2<f32>,
    pub overlay: Option<Array2<f32>>,
    /// Physical size of one pixel in millimetres, ordered (row, column).
    /// Non-isotropic volumes need this to display with correct proportions.
    pub pixel_spacing: (f32, f32),
}

impl SliceImage {
    /// (rows, columns) of the plane.
    pub fn dim(&self) -> (usize, usize) {
        self.pixels.dim()
    }
}

pub struct SliceExtractor;

impl SliceExtractor {
    /// Extract a windowed slice orthogonal to `orientation` at `index`.
    ///
    /// Walks exactly one plane of the volume (never the full grid), applies
    /// the windowing transform per voxel in parallel, and samples the mask at
    /// the same coordinates when one is supplied. Deterministic: identical
    /// inputs produce an identical `SliceImage`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::OutOfRange`] if `index` is outside
    /// `[0, extent(orientation))`.
    pub fn extract(
        volume: &VoxelVolume,
        orientation: Orientation,
        index: usize,
        window: WindowSettings,
        mask: Option<&Mask>,
    ) -> Result<SliceImage, RenderError> {
        let extent = volume.extent(orientation);
        if index >= extent {
            return Err(RenderError::slice_index(index, extent));
        }

        let transform = WindowingTransform::new(window);
        let plane = Self::plane_view(volume, orientation, index);
        let (rows, cols) = plane.dim();

        let pixel_data: Vec<f32> = plane.into_par_iter().map(|&v| transform.apply(v)).collect();
        let pixels = Array2::from_shape_vec((rows, cols), pixel_data)
            .map_err(|e| RenderError::InvalidInput(e.to_string()))?;

        let overlay = mask
            .map(|mask| {
                let weights: Vec<f32> = Self::mask_plane_view(mask, orientation, index)
                    .into_par_iter()
                    .copied()
                    .collect();
                Array2::from_shape_vec((rows, cols), weights)
                    .map_err(|e| RenderError::InvalidInput(e.to_string()))
            })
            .transpose()?;

        Ok(SliceImage {
            orientation,
            index,
            pixels,
            overlay,
            pixel_spacing: Self::pixel_spacing(volume, orientation),
        })
    }

    fn plane_view(
        volume: &VoxelVolume,
        orientation: Orientation,
        index: usize,
    ) -> ArrayView2<'_, f32> {
        match orientation {
            Orientation::Axial => volume.data().slice(s![index, .., ..]),
            Orientation::Coronal => volume.data().slice(s![.., index, ..]),
            Orientation::Sagittal => volume.data().slice(s![.., .., index]),
        }
    }

    fn mask_plane_view(
        mask: &Mask,
        orientation: Orientation,
        index: usize,
    ) -> ArrayView2<'_, f32> {
        match orientation {
            Orientation::Axial => mask.data().slice(s![index, .., ..]),
            Orientation::Coronal => mask.data().slice(s![.., index, ..]),
            Orientation::Sagittal => mask.data().slice(s![.., .., index]),
        }
    }

    fn pixel_spacing(volume: &VoxelVolume, orientation: Orientation) -> (f32, f32) {
        let (sz, sy, sx) = volume.spacing();
        // Plane layout follows the view: rows are the slower axis of the slice.
        match orientation {
            Orientation::Axial => (sy, sx),
            Orientation::Coronal => (sz, sx),
            Orientation::Sagittal => (sz, sy),
        }
    }
}
