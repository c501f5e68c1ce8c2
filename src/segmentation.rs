use crate::error::RenderError;
use crate::volume::{Mask, VoxelVolume};

/// Tumor segmentation capability.
///
/// A learned model and the deterministic stand-in below satisfy the same
/// contract: given the active volume, produce a grid-aligned weight mask. The
/// strategy is selected once at session construction.
pub trait Segmenter: Send + Sync {
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidInput`] if the volume cannot be
    /// segmented.
    fn segment(&self, volume: &VoxelVolume) -> Result<Mask, RenderError>;
}

/// Fixed deterministic stand-in: marks the brightest intensity blob.
///
/// Weights ramp linearly from 0 at the onset percentile to 1 at the robust
/// maximum, mimicking a probability map well enough to exercise the overlay
/// path. Same volume in, same mask out.
pub struct ThresholdBlobSegmenter {
    /// Intensity percentile where tumor likelihood starts rising.
    pub onset_percentile: f32,
}

impl Default for ThresholdBlobSegmenter {
    fn default() -> Self {
        Self {
            onset_percentile: 0.95,
        }
    }
}

impl Segmenter for ThresholdBlobSegmenter {
    fn segment(&self, volume: &VoxelVolume) -> Result<Mask, RenderError> {
        if volume.is_uniform() {
            return Err(RenderError::InvalidInput(
                "cannot segment a uniform volume".into(),
            ));
        }
        let onset = volume.intensity_percentile(self.onset_percentile);
        let (_, robust_max) = volume.robust_range();
        let span = (robust_max - onset).max(f32::EPSILON);

        let weights = volume
            .data()
            .iter()
            .map(|&v| ((v - onset) / span).clamp(0.0, 1.0))
            .collect();
        Mask::new(volume.dim(), weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graded_volume() -> VoxelVolume {
        let data: Vec<f32> = (0..512).map(|i| i as f32).collect();
        VoxelVolume::new((8, 8, 8), (1.0, 1.0, 1.0), data).unwrap()
    }

    #[test]
    fn marks_only_the_brightest_voxels() {
        let volume = graded_volume();
        let mask = ThresholdBlobSegmenter::default()
            .segment(&volume)
            .unwrap();
        assert_eq!(mask.weight(0, 0, 0), 0.0);
        assert_eq!(mask.weight(7, 7, 7), 1.0);
        let marked = mask.data().iter().filter(|&&w| w > 0.0).count();
        assert!(marked > 0 && marked < 100, "marked {marked} voxels");
    }

    #[test]
    fn segmentation_is_deterministic() {
        let volume = graded_volume();
        let segmenter = ThresholdBlobSegmenter::default();
        let a = segmenter.segment(&volume).unwrap();
        let b = segmenter.segment(&volume).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn refuses_uniform_volume() {
        let volume = VoxelVolume::new((4, 4, 4), (1.0, 1.0, 1.0), vec![3.0; 64]).unwrap();
        assert!(
            ThresholdBlobSegmenter::default()
                .segment(&volume)
                .is_err()
        );
    }
}
