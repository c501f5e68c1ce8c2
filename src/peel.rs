//! Depth-based peeling of the reconstructed surface.
//!
//! Once per volume load a radial depth field is computed: for every tissue
//! voxel, the distance in erosion layers to the nearest exterior/background
//! voxel (6-connected), normalized to `[0, 1]` by the deepest layer. A voxel
//! is peeled away at depth `d` when its normalized depth is below `d`, and
//! the visible boundary is re-derived as the isosurface of the
//! occupancy-masked field. The policy is a free function so a different
//! peeling geometry can replace it.

use crate::cancel::CancelFlag;
use crate::error::RenderError;
use crate::mesh::{SurfaceMesh, marching_cubes};
use crate::volume::VoxelVolume;

use ndarray::{Array3, Zip};
use std::sync::Arc;

/// Slider-driven peel parameter: 0 shows the full outer surface, 1 peels to
/// the deepest tissue core.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct PeelState {
    depth: f32,
}

impl PeelState {
    /// # Errors
    ///
    /// Returns [`RenderError::OutOfRange`] when `depth` is outside `[0, 1]`.
    pub fn new(depth: f32) -> Result<Self, RenderError> {
        if !(0.0..=1.0).contains(&depth) || depth.is_nan() {
            return Err(RenderError::peel_depth(depth));
        }
        Ok(Self { depth })
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }
}

/// Per-voxel erosion-layer distances from the exterior boundary.
///
/// `steps` is 0 for background voxels, `k >= 1` for tissue voxels whose
/// nearest exterior voxel (or volume face) is `k` erosion layers away.
pub struct DepthField {
    steps: Array3<u32>,
    max_steps: u32,
}

impl DepthField {
    /// Normalized radial depth of a voxel, 0 for background.
    #[inline]
    pub fn normalized(&self, z: usize, y: usize, x: usize) -> f32 {
        if self.max_steps == 0 {
            return 0.0;
        }
        self.steps[[z, y, x]] as f32 / self.max_steps as f32
    }

    #[inline]
    pub fn is_tissue(&self, z: usize, y: usize, x: usize) -> bool {
        self.steps[[z, y, x]] > 0
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }
}

/// Compute the radial depth field of `volume` with tissue defined as
/// intensity `>= threshold`.
///
/// Multi-source breadth-first search: tissue voxels touching a background
/// voxel or a volume face sit at layer 1, and each further erosion layer adds
/// one step. Layer assignment is independent of traversal order, so the field
/// is deterministic.
pub fn radial_depth_field(volume: &VoxelVolume, threshold: f32) -> DepthField {
    let (nz, ny, nx) = volume.dim();
    let data = volume.data();
    let mut steps = Array3::<u32>::zeros((nz, ny, nx));

    let inside = |z: usize, y: usize, x: usize| data[[z, y, x]] >= threshold;

    let mut frontier: Vec<(usize, usize, usize)> = Vec::new();
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                if !inside(z, y, x) {
                    continue;
                }
                let on_face =
                    z == 0 || z == nz - 1 || y == 0 || y == ny - 1 || x == 0 || x == nx - 1;
                let touches_background = on_face
                    || !inside(z - 1, y, x)
                    || !inside(z + 1, y, x)
                    || !inside(z, y - 1, x)
                    || !inside(z, y + 1, x)
                    || !inside(z, y, x - 1)
                    || !inside(z, y, x + 1);
                if touches_background {
                    steps[[z, y, x]] = 1;
                    frontier.push((z, y, x));
                }
            }
        }
    }

    let mut level = 1u32;
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for &(z, y, x) in &frontier {
            let mut visit = |z: usize, y: usize, x: usize, next: &mut Vec<_>| {
                if inside(z, y, x) && steps[[z, y, x]] == 0 {
                    steps[[z, y, x]] = level + 1;
                    next.push((z, y, x));
                }
            };
            if z > 0 {
                visit(z - 1, y, x, &mut next);
            }
            if z + 1 < nz {
                visit(z + 1, y, x, &mut next);
            }
            if y > 0 {
                visit(z, y - 1, x, &mut next);
            }
            if y + 1 < ny {
                visit(z, y + 1, x, &mut next);
            }
            if x > 0 {
                visit(z, y, x - 1, &mut next);
            }
            if x + 1 < nx {
                visit(z, y, x + 1, &mut next);
            }
        }
        if !next.is_empty() {
            level += 1;
        }
        frontier = next;
    }

    let max_steps = if steps.iter().any(|&s| s > 0) { level } else { 0 };
    DepthField { steps, max_steps }
}

/// Owns the depth field for one volume/threshold pair and rebuilds the
/// visible surface for any peel depth.
pub struct PeelEngine {
    volume: Arc<VoxelVolume>,
    threshold: f32,
    field: DepthField,
}

impl PeelEngine {
    /// Build the engine, computing the depth field once.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::DegenerateVolume`] for a uniform volume.
    pub fn new(volume: Arc<VoxelVolume>, threshold: f32) -> Result<Self, RenderError> {
        if volume.is_uniform() {
            return Err(RenderError::DegenerateVolume);
        }
        let field = radial_depth_field(&volume, threshold);
        log::debug!(
            "depth field ready: {} erosion layers at threshold {threshold}",
            field.max_steps()
        );
        Ok(Self {
            volume,
            threshold,
            field,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn depth_field(&self) -> &DepthField {
        &self.field
    }

    /// Whether the voxel is tissue that survives peeling at `depth`.
    ///
    /// Monotonic: the visible set at a larger depth is a subset of the
    /// visible set at any smaller depth.
    #[inline]
    pub fn visible(&self, z: usize, y: usize, x: usize, depth: f32) -> bool {
        self.field.is_tissue(z, y, x) && self.field.normalized(z, y, x) >= depth
    }

    /// Value substituted for peeled voxels, guaranteed below the threshold so
    /// the masked field treats them as exterior.
    fn peel_fill(&self) -> f32 {
        let range = (self.volume.max_intensity() - self.volume.min_intensity()).max(1.0);
        self.threshold - range
    }

    /// The occupancy-masked field: original intensities where tissue survives
    /// peeling (and everywhere outside tissue, which already lies below the
    /// threshold and shapes the boundary interpolation), fill elsewhere.
    ///
    /// At depth 0 no voxel is masked, so the field equals the original volume
    /// and the rebuilt mesh reproduces the unpeeled isosurface exactly.
    fn masked_field(&self, depth: f32) -> Array3<f32> {
        let fill = self.peel_fill();
        let inv_max = if self.field.max_steps == 0 {
            0.0
        } else {
            1.0 / self.field.max_steps as f32
        };
        Zip::from(self.volume.data())
            .and(&self.field.steps)
            .par_map_collect(|&value, &steps| {
                if steps > 0 && (steps as f32 * inv_max) < depth {
                    fill
                } else {
                    value
                }
            })
    }

    /// Rebuild the visible surface at the given peel depth, full resolution.
    ///
    /// The mesh carries per-vertex normalized depths sampled from the field,
    /// so a display layer can also clip at render time without recomputing.
    ///
    /// # Errors
    ///
    /// [`RenderError::Cancelled`] when superseded mid-extraction.
    pub fn build(&self, state: PeelState, cancel: &CancelFlag) -> Result<SurfaceMesh, RenderError> {
        let masked = self.masked_field(state.depth());
        let mut mesh = marching_cubes(&masked, self.threshold, cancel)?;
        self.annotate_depths(&mut mesh, 1);
        mesh.scale_to_physical(self.volume.spacing());
        Ok(mesh)
    }

    /// Half-resolution rebuild for slider drags: samples every second voxel,
    /// cheap enough to track the slider, replaced by a full build on release.
    pub fn build_preview(
        &self,
        state: PeelState,
        cancel: &CancelFlag,
    ) -> Result<SurfaceMesh, RenderError> {
        const STRIDE: usize = 2;
        let (nz, ny, nx) = self.volume.dim();
        let (hz, hy, hx) = (nz.div_ceil(STRIDE), ny.div_ceil(STRIDE), nx.div_ceil(STRIDE));
        if hz < 2 || hy < 2 || hx < 2 {
            return self.build(state, cancel);
        }

        let masked = self.masked_field(state.depth());
        let coarse = Array3::from_shape_fn((hz, hy, hx), |(z, y, x)| {
            masked[[z * STRIDE, y * STRIDE, x * STRIDE]]
        });
        let mut mesh = marching_cubes(&coarse, self.threshold, cancel)?;
        self.annotate_depths(&mut mesh, STRIDE);
        let (sz, sy, sx) = self.volume.spacing();
        let s = STRIDE as f32;
        mesh.scale_to_physical((sz * s, sy * s, sx * s));
        Ok(mesh)
    }

    /// Clip-at-render path: keep only triangles whose vertices all survive
    /// peeling at `depth`, reusing the annotated full mesh. Vertices are left
    /// in place so indices stay valid.
    pub fn clip(mesh: &SurfaceMesh, depth: f32) -> SurfaceMesh {
        let Some(depths) = &mesh.depths else {
            return mesh.clone();
        };
        let mut clipped = mesh.clone();
        clipped.indices = mesh
            .indices
            .chunks_exact(3)
            .filter(|tri| tri.iter().all(|&i| depths[i as usize] >= depth))
            .flatten()
            .copied()
            .collect();
        clipped
    }

    /// Attach the normalized depth of the nearest voxel to each vertex.
    /// `stride` maps preview-grid coordinates back to volume coordinates.
    fn annotate_depths(&self, mesh: &mut SurfaceMesh, stride: usize) {
        let (nz, ny, nx) = self.volume.dim();
        let depths = mesh
            .positions
            .iter()
            .map(|p| {
                let x = ((p.x * stride as f32).round() as usize).min(nx - 1);
                let y = ((p.y * stride as f32).round() as usize).min(ny - 1);
                let z = ((p.z * stride as f32).round() as usize).min(nz - 1);
                self.field.normalized(z, y, x)
            })
            .collect();
        mesh.depths = Some(depths);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isosurface::IsosurfaceBuilder;
    use glam::Vec3;

    fn sphere_volume(n: usize, radius: f32) -> Arc<VoxelVolume> {
        let center = (n as f32 - 1.0) / 2.0;
        let mut data = Vec::with_capacity(n * n * n);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let d = Vec3::new(x as f32 - center, y as f32 - center, z as f32 - center)
                        .length();
                    data.push(if d < radius { 1.0 } else { 0.0 });
                }
            }
        }
        Arc::new(VoxelVolume::new((n, n, n), (1.0, 1.0, 1.0), data).unwrap())
    }

    #[test]
    fn peel_state_validates_range() {
        assert!(PeelState::new(0.0).is_ok());
        assert!(PeelState::new(1.0).is_ok());
        assert!(matches!(
            PeelState::new(-0.1),
            Err(RenderError::OutOfRange { .. })
        ));
        assert!(matches!(
            PeelState::new(1.5),
            Err(RenderError::OutOfRange { .. })
        ));
    }

    #[test]
    fn depth_field_layers_grow_inward() {
        let volume = sphere_volume(24, 9.0);
        let field = radial_depth_field(&volume, 0.5);
        assert!(field.max_steps() >= 8, "got {} layers", field.max_steps());

        let c = 11; // nearest voxel to the center
        assert!(field.is_tissue(c, c, c));
        assert!(field.normalized(c, c, c) > 0.9);
        assert!(!field.is_tissue(0, 0, 0));
        assert_eq!(field.normalized(0, 0, 0), 0.0);
    }

    #[test]
    fn boundary_tissue_sits_at_layer_one() {
        // A slab filling the whole grid: every face voxel touches a volume
        // face, so the first layer exists even without background voxels.
        let volume =
            Arc::new(VoxelVolume::new((6, 6, 6), (1.0, 1.0, 1.0), vec![1.0; 216]).unwrap());
        let field = radial_depth_field(&volume, 0.5);
        assert_eq!(field.steps[[0, 3, 3]], 1);
        assert_eq!(field.steps[[1, 3, 3]], 2);
        assert_eq!(field.steps[[3, 3, 3]], 3);
        assert_eq!(field.max_steps(), 3);
    }

    #[test]
    fn visibility_is_monotonic_in_depth() {
        let volume = sphere_volume(24, 9.0);
        let engine = PeelEngine::new(volume.clone(), 0.5).unwrap();
        let (nz, ny, nx) = volume.dim();

        let visible_count = |d: f32| -> usize {
            let mut count = 0;
            for z in 0..nz {
                for y in 0..ny {
                    for x in 0..nx {
                        if engine.visible(z, y, x, d) {
                            count += 1;
                        }
                    }
                }
            }
            count
        };

        let mut previous = usize::MAX;
        for step in 0..=10 {
            let d = step as f32 / 10.0;
            let count = visible_count(d);
            assert!(count <= previous, "visible set grew from d={}", d - 0.1);
            previous = count;
        }

        // Subset property, not just cardinality: anything visible at d2 is
        // visible at d1 < d2.
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    if engine.visible(z, y, x, 0.7) {
                        assert!(engine.visible(z, y, x, 0.3));
                    }
                }
            }
        }
    }

    #[test]
    fn depth_zero_reproduces_unpeeled_surface() {
        let volume = sphere_volume(24, 9.0);
        let engine = PeelEngine::new(volume.clone(), 0.5).unwrap();
        let peeled = engine
            .build(PeelState::new(0.0).unwrap(), &CancelFlag::new())
            .unwrap();
        let unpeeled = IsosurfaceBuilder::build(&volume, 0.5, &CancelFlag::new()).unwrap();

        assert_eq!(peeled.indices, unpeeled.indices);
        assert_eq!(peeled.positions.len(), unpeeled.positions.len());
        for (a, b) in peeled.positions.iter().zip(&unpeeled.positions) {
            assert!((*a - *b).length() < 1e-5);
        }
    }

    #[test]
    fn peeling_shrinks_the_surface() {
        let volume = sphere_volume(32, 13.0);
        let engine = PeelEngine::new(volume, 0.5).unwrap();
        let center = Vec3::splat(31.0 / 2.0);

        let radius_of = |mesh: &SurfaceMesh| -> f32 {
            let sum: f32 = mesh.positions.iter().map(|p| (*p - center).length()).sum();
            sum / mesh.positions.len() as f32
        };

        let outer = engine
            .build(PeelState::new(0.0).unwrap(), &CancelFlag::new())
            .unwrap();
        let inner = engine
            .build(PeelState::new(0.6).unwrap(), &CancelFlag::new())
            .unwrap();
        assert!(!inner.is_empty());
        assert!(radius_of(&inner) < radius_of(&outer) - 2.0);
    }

    #[test]
    fn preview_build_tracks_full_build() {
        let volume = sphere_volume(32, 13.0);
        let engine = PeelEngine::new(volume, 0.5).unwrap();
        let state = PeelState::new(0.4).unwrap();
        let full = engine.build(state, &CancelFlag::new()).unwrap();
        let preview = engine.build_preview(state, &CancelFlag::new()).unwrap();
        assert!(!preview.is_empty());
        assert!(preview.num_triangles() < full.num_triangles());
    }

    #[test]
    fn vertices_carry_depth_annotation() {
        let volume = sphere_volume(24, 9.0);
        let engine = PeelEngine::new(volume, 0.5).unwrap();
        let mesh = engine
            .build(PeelState::new(0.0).unwrap(), &CancelFlag::new())
            .unwrap();
        let depths = mesh.depths.as_ref().expect("annotated");
        assert_eq!(depths.len(), mesh.positions.len());
        // The outer surface hugs the first erosion layers.
        for &d in depths {
            assert!((0.0..=0.5).contains(&d), "outer-surface depth {d}");
        }
    }

    #[test]
    fn clip_discards_shallow_triangles() {
        let volume = sphere_volume(24, 9.0);
        let engine = PeelEngine::new(volume, 0.5).unwrap();
        let mesh = engine
            .build(PeelState::new(0.0).unwrap(), &CancelFlag::new())
            .unwrap();
        let clipped = PeelEngine::clip(&mesh, 0.9);
        assert!(clipped.num_triangles() < mesh.num_triangles());
        assert_eq!(clipped.positions.len(), mesh.positions.len());
    }

    #[test]
    fn cancellation_propagates() {
        let volume = sphere_volume(24, 9.0);
        let engine = PeelEngine::new(volume, 0.5).unwrap();
        let flag = CancelFlag::new();
        flag.cancel();
        assert_eq!(
            engine.build(PeelState::new(0.5).unwrap(), &flag),
            Err(RenderError::Cancelled)
        );
    }

    #[test]
    fn degenerate_volume_rejected_at_construction() {
        let volume = Arc::new(VoxelVolume::new((4, 4, 4), (1.0, 1.0, 1.0), vec![2.0; 64]).unwrap());
        assert!(matches!(
            PeelEngine::new(volume, 0.5),
            Err(RenderError::DegenerateVolume)
        ));
    }
}
