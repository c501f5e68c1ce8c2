use crate::enums::Orientation;
use crate::error::RenderError;

use ndarray::Array3;

const HISTOGRAM_BINS: usize = 4096;

/// An immutable scalar voxel grid with physical spacing metadata.
///
/// The grid is stored as `(depth, height, width)` corresponding to `(z, y, x)`,
/// with spacing in millimetres per voxel along the same axes. Intensities are
/// raw scanner units or pre-normalized floats; no unit is assumed. The volume
/// is never mutated after construction. Replacing the scan means constructing
/// a new `VoxelVolume`.
pub struct VoxelVolume {
    data: Array3<f32>,
    spacing: (f32, f32, f32),
    min_intensity: f32,
    max_intensity: f32,
}

impl VoxelVolume {
    /// Build a volume from decoded scan data.
    ///
    /// `dim` is `(depth, height, width)`, `spacing` the per-axis voxel size in
    /// millimetres in the same order, `data` a flat intensity array in z-major
    /// order (`x` fastest).
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidInput`] if any dimension is zero, the data
    /// length does not match the dimensions, any spacing component is not
    /// strictly positive, or any intensity is not finite.
    pub fn new(
        dim: (usize, usize, usize),
        spacing: (f32, f32, f32),
        data: Vec<f32>,
    ) -> Result<Self, RenderError> {
        let (depth, height, width) = dim;
        if depth == 0 || height == 0 || width == 0 {
            return Err(RenderError::InvalidInput(format!(
                "volume dimensions must be positive, got {depth}x{height}x{width}"
            )));
        }
        let expected = depth * height * width;
        if data.len() != expected {
            return Err(RenderError::InvalidInput(format!(
                "intensity array length {} does not match {depth}x{height}x{width} = {expected}",
                data.len()
            )));
        }
        if spacing.0 <= 0.0 || spacing.1 <= 0.0 || spacing.2 <= 0.0 {
            return Err(RenderError::InvalidInput(format!(
                "voxel spacing must be positive, got {spacing:?}"
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(RenderError::InvalidInput(
                "intensity array contains non-finite values".into(),
            ));
        }

        let (min_intensity, max_intensity) = data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        let data = Array3::from_shape_vec((depth, height, width), data)
            .map_err(|e| RenderError::InvalidInput(e.to_string()))?;

        Ok(Self {
            data,
            spacing,
            min_intensity,
            max_intensity,
        })
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Voxel spacing in millimetres, ordered (z, y, x).
    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn min_intensity(&self) -> f32 {
        self.min_intensity
    }

    pub fn max_intensity(&self) -> f32 {
        self.max_intensity
    }

    /// True when every voxel carries the same intensity. No isosurface can be
    /// extracted from such a volume.
    pub fn is_uniform(&self) -> bool {
        self.min_intensity == self.max_intensity
    }

    /// Number of slices along the given orientation.
    pub fn extent(&self, orientation: Orientation) -> usize {
        let (depth, height, width) = self.data.dim();
        match orientation {
            Orientation::Axial => depth,
            Orientation::Coronal => height,
            Orientation::Sagittal => width,
        }
    }

    /// Intensity value at quantile `q` in `[0, 1]`, derived from a fixed-width
    /// histogram of the volume's own intensities. Deterministic for a given
    /// volume, so threshold defaults derived from it are reproducible.
    pub fn intensity_percentile(&self, q: f32) -> f32 {
        let q = q.clamp(0.0, 1.0);
        if self.is_uniform() {
            return self.min_intensity;
        }

        let range = self.max_intensity - self.min_intensity;
        let scale = (HISTOGRAM_BINS - 1) as f32 / range;
        let mut histogram = vec![0u64; HISTOGRAM_BINS];
        for &v in &self.data {
            let bin = ((v - self.min_intensity) * scale) as usize;
            histogram[bin.min(HISTOGRAM_BINS - 1)] += 1;
        }

        let target = (q as f64 * self.data.len() as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for (bin, &count) in histogram.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.min_intensity + bin as f32 / scale;
            }
        }
        self.max_intensity
    }

    /// Robust intensity range (2nd and 98th percentiles), ignoring the extreme
    /// tails that would otherwise wash out display contrast.
    pub fn robust_range(&self) -> (f32, f32) {
        (
            self.intensity_percentile(0.02),
            self.intensity_percentile(0.98),
        )
    }
}

/// A tumor-likelihood mask aligned to a [`VoxelVolume`] grid.
///
/// Per-voxel weights lie in `[0, 1]`: 0 means not tumor, 1 certain tumor.
/// Supplied by the external segmentation capability and treated read-only.
pub struct Mask {
    data: Array3<f32>,
}

impl Mask {
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidInput`] if the data length does not match
    /// the dimensions or any weight falls outside `[0, 1]`.
    pub fn new(dim: (usize, usize, usize), data: Vec<f32>) -> Result<Self, RenderError> {
        let expected = dim.0 * dim.1 * dim.2;
        if data.len() != expected {
            return Err(RenderError::InvalidInput(format!(
                "mask length {} does not match volume dimensions ({expected} voxels)",
                data.len()
            )));
        }
        if data.iter().any(|&w| !(0.0..=1.0).contains(&w)) {
            return Err(RenderError::InvalidInput(
                "mask weights must lie in [0, 1]".into(),
            ));
        }
        let data = Array3::from_shape_vec(dim, data)
            .map_err(|e| RenderError::InvalidInput(e.to_string()))?;
        Ok(Self { data })
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Membership weight at the given voxel.
    pub fn weight(&self, z: usize, y: usize, x: usize) -> f32 {
        self.data[[z, y, x]]
    }

    /// Checks grid alignment against the active volume.
    pub(crate) fn validate_against(&self, volume: &VoxelVolume) -> Result<(), RenderError> {
        if self.dim() != volume.dim() {
            return Err(RenderError::InvalidInput(format!(
                "mask dimensions {:?} do not match volume dimensions {:?}",
                self.dim(),
                volume.dim()
            )));
        }
        Ok(())
    }
}
