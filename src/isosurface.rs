use crate::cancel::CancelFlag;
use crate::error::RenderError;
use crate::mesh::{SurfaceMesh, marching_cubes};
use crate::volume::VoxelVolume;

/// Intensity percentile used for the default isosurface threshold. Tuned so
/// the brain boundary, not scanner background, is captured.
pub const DEFAULT_THRESHOLD_PERCENTILE: f32 = 0.40;

pub struct IsosurfaceBuilder;

impl IsosurfaceBuilder {
    /// Default threshold for a volume, derived from its own intensity
    /// histogram rather than hardcoded per scan.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::DegenerateVolume`] for a uniform volume.
    pub fn default_threshold(volume: &VoxelVolume) -> Result<f32, RenderError> {
        if volume.is_uniform() {
            return Err(RenderError::DegenerateVolume);
        }
        let threshold = volume.intensity_percentile(DEFAULT_THRESHOLD_PERCENTILE);
        log::debug!(
            "derived isosurface threshold {threshold} at percentile {DEFAULT_THRESHOLD_PERCENTILE}"
        );
        Ok(threshold)
    }

    /// Extract the tissue boundary at `threshold` as a triangle mesh in
    /// physical millimetres.
    ///
    /// Deterministic for a fixed volume and threshold: same topology, same
    /// vertex ordering.
    ///
    /// # Errors
    ///
    /// [`RenderError::DegenerateVolume`] for a uniform volume,
    /// [`RenderError::Cancelled`] when superseded mid-extraction.
    pub fn build(
        volume: &VoxelVolume,
        threshold: f32,
        cancel: &CancelFlag,
    ) -> Result<SurfaceMesh, RenderError> {
        if volume.is_uniform() {
            return Err(RenderError::DegenerateVolume);
        }
        let mut mesh = marching_cubes(volume.data(), threshold, cancel)?;
        mesh.scale_to_physical(volume.spacing());
        Ok(mesh)
    }
}
