use crate::error::RenderError;
use crate::volume::VoxelVolume;

/// Radiology-style display window: the sub-range of raw intensities mapped to
/// the full display contrast range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowSettings {
    center: f32,
    width: f32,
}

impl WindowSettings {
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidInput`] if `width` is not strictly
    /// positive or either value is not finite.
    pub fn new(center: f32, width: f32) -> Result<Self, RenderError> {
        if !center.is_finite() || !width.is_finite() {
            return Err(RenderError::InvalidInput(
                "window center and width must be finite".into(),
            ));
        }
        if width <= 0.0 {
            return Err(RenderError::InvalidInput(format!(
                "window width must be positive, got {width}"
            )));
        }
        Ok(Self { center, width })
    }

    /// Default window for a volume: the robust 2nd–98th percentile intensity
    /// range, so background and hot spots do not wash out the brain tissue.
    pub fn robust_for(volume: &VoxelVolume) -> Self {
        let (lo, hi) = volume.robust_range();
        let width = (hi - lo).max(f32::EPSILON);
        Self {
            center: (lo + hi) / 2.0,
            width,
        }
    }

    pub fn center(&self) -> f32 {
        self.center
    }

    pub fn width(&self) -> f32 {
        self.width
    }
}

/// Pure intensity → display mapping derived from a [`WindowSettings`].
///
/// The transform is a single precomputed affine followed by a clamp to
/// `[0, 1]`, so it evaluates per voxel in O(1) and vectorizes across a plane.
#[derive(Clone, Copy, Debug)]
pub struct WindowingTransform {
    lower: f32,
    inv_width: f32,
}

impl WindowingTransform {
    pub fn new(settings: WindowSettings) -> Self {
        Self {
            lower: settings.center - settings.width / 2.0,
            inv_width: 1.0 / settings.width,
        }
    }

    /// Map a raw intensity to a display value in `[0, 1]`.
    #[inline]
    pub fn apply(&self, intensity: f32) -> f32 {
        ((intensity - self.lower) * self.inv_width).clamp(0.0, 1.0)
    }
}

impl From<WindowSettings> for WindowingTransform {
    fn from(settings: WindowSettings) -> Self {
        Self::new(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nonpositive_width() {
        assert!(WindowSettings::new(0.5, 0.0).is_err());
        assert!(WindowSettings::new(0.5, -1.0).is_err());
    }

    #[test]
    fn maps_window_edges_to_display_range() {
        let transform = WindowingTransform::new(WindowSettings::new(100.0, 50.0).unwrap());
        assert_eq!(transform.apply(75.0), 0.0);
        assert_eq!(transform.apply(125.0), 1.0);
        assert!((transform.apply(100.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn clamps_outside_window() {
        let transform = WindowingTransform::new(WindowSettings::new(0.0, 2.0).unwrap());
        assert_eq!(transform.apply(-100.0), 0.0);
        assert_eq!(transform.apply(100.0), 1.0);
    }

    #[test]
    fn monotonic_in_intensity() {
        let transform = WindowingTransform::new(WindowSettings::new(0.5, 1.0).unwrap());
        let mut previous = transform.apply(-1.0);
        for step in -10..=20 {
            let value = transform.apply(step as f32 / 10.0);
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn robust_window_covers_bulk_of_ramp() {
        let data: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let volume = crate::volume::VoxelVolume::new((10, 10, 10), (1.0, 1.0, 1.0), data).unwrap();
        let settings = WindowSettings::robust_for(&volume);
        assert!(settings.width() > 900.0);
        assert!((settings.center() - 500.0).abs() < 50.0);
    }
}
