//! Session orchestration: parameter state, per-renderable caches, and the
//! background-task layer.
//!
//! The interaction thread only mutates session parameters and replaces the
//! pending job for the affected renderable slot; heavy recomputation runs on
//! `spawn_blocking` workers. Each slot applies last-value-wins: a completed
//! job commits its result only if no newer request exists for the slot, so a
//! rapidly dragged slider never lets a stale result overwrite a newer one.

use crate::cancel::CancelFlag;
use crate::enums::{Orientation, SessionState};
use crate::error::RenderError;
use crate::isosurface::IsosurfaceBuilder;
use crate::mesh::SurfaceMesh;
use crate::overlay::{MeshOverlay, OverlayCompositor};
use crate::peel::{PeelEngine, PeelState};
use crate::segmentation::Segmenter;
use crate::slice::{SliceExtractor, SliceImage};
use crate::volume::{Mask, VoxelVolume};
use crate::windowing::WindowSettings;

use glam::Vec3;
use image::{ImageBuffer, Rgba};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Camera parameters consumed verbatim by the display layer; the core never
/// recomputes anything when they change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraTransform {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
}

impl Default for CameraTransform {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 400.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_degrees: 45.0,
        }
    }
}

/// Committed 2D renderable: the raw windowed slice plus the composited image.
#[derive(Clone, Debug)]
pub struct SliceFrame {
    pub generation: u64,
    pub slice: SliceImage,
    pub composited: ImageBuffer<Rgba<u8>, Vec<u8>>,
}

/// Committed 3D renderable with the parameters it was computed at, so the
/// display layer can detect stale frames without inspecting geometry.
#[derive(Clone, Debug)]
pub struct SurfaceFrame {
    pub generation: u64,
    pub peel_depth: f32,
    pub threshold: f32,
    pub preview: bool,
    pub mesh: SurfaceMesh,
    pub overlay: Option<MeshOverlay>,
    pub tumor_shell: Option<SurfaceMesh>,
}

trait Renderable {
    fn stamp(&mut self, generation: u64);
}

impl Renderable for SliceFrame {
    fn stamp(&mut self, generation: u64) {
        self.generation = generation;
    }
}

impl Renderable for SurfaceFrame {
    fn stamp(&mut self, generation: u64) {
        self.generation = generation;
    }
}

struct Committed<T> {
    frame: Option<T>,
    error: Option<RenderError>,
}

struct Inflight {
    cancel: CancelFlag,
    handle: JoinHandle<()>,
}

/// One renderable slot: a committed frame mutated only by the commit path
/// under its mutex (single-writer discipline) and at most one in-flight job.
struct Slot<T> {
    latest: Arc<AtomicU64>,
    generation: Arc<AtomicU64>,
    committed: Arc<Mutex<Committed<T>>>,
    inflight: Option<Inflight>,
}

impl<T: Renderable + Send + 'static> Slot<T> {
    fn new() -> Self {
        Self {
            latest: Arc::new(AtomicU64::new(0)),
            generation: Arc::new(AtomicU64::new(0)),
            committed: Arc::new(Mutex::new(Committed {
                frame: None,
                error: None,
            })),
            inflight: None,
        }
    }

    /// Replace the pending job. The previous job is signalled to cancel; if
    /// it completes anyway its result is discarded, never applied.
    fn schedule<F>(&mut self, compute: F)
    where
        F: FnOnce(&CancelFlag) -> Result<T, RenderError> + Send + 'static,
    {
        if let Some(previous) = self.inflight.take() {
            previous.cancel.cancel();
        }
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let latest = Arc::clone(&self.latest);
        let generation = Arc::clone(&self.generation);
        let committed = Arc::clone(&self.committed);

        let handle = tokio::task::spawn_blocking(move || {
            // Compute without holding any lock; cancellation checkpoints run
            // inside the kernels.
            let result = compute(&flag);
            let mut slot = committed.lock().expect("slot lock poisoned");
            if latest.load(Ordering::SeqCst) != id {
                log::trace!("discarding superseded result for request {id}");
                return;
            }
            match result {
                Ok(mut frame) => {
                    let stamp = generation.fetch_add(1, Ordering::SeqCst) + 1;
                    frame.stamp(stamp);
                    slot.frame = Some(frame);
                    slot.error = None;
                }
                // Superseded computations terminate silently.
                Err(RenderError::Cancelled) => {}
                Err(error) => slot.error = Some(error),
            }
        });
        self.inflight = Some(Inflight { cancel, handle });
    }

    /// Invalidate the cache and orphan any in-flight job (its commit check
    /// will fail against the bumped request id).
    fn reset(&mut self) {
        if let Some(previous) = self.inflight.take() {
            previous.cancel.cancel();
        }
        self.latest.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.committed.lock().expect("slot lock poisoned");
        slot.frame = None;
        slot.error = None;
    }

    async fn flush(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            let _ = inflight.handle.await;
        }
    }

    fn frame(&self) -> Option<T>
    where
        T: Clone,
    {
        self.committed
            .lock()
            .expect("slot lock poisoned")
            .frame
            .clone()
    }

    fn error(&self) -> Option<RenderError> {
        self.committed
            .lock()
            .expect("slot lock poisoned")
            .error
            .clone()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_rendering(&self) -> bool {
        self.inflight
            .as_ref()
            .is_some_and(|inflight| !inflight.handle.is_finished())
    }
}

/// Top-level orchestrator for one scan's viewing session.
///
/// Created on scan selection, mutated on every UI interaction event,
/// discarded when a new scan is loaded or the session ends. All setters are
/// non-blocking and idempotent when called twice with the same value. A 3D
/// reconstruction failure never disables the 2D path, and vice versa.
pub struct RenderSession {
    volume: Option<Arc<VoxelVolume>>,
    mask: Option<Arc<Mask>>,
    segmenter: Option<Arc<dyn Segmenter>>,
    compositor: OverlayCompositor,

    window: WindowSettings,
    orientation: Orientation,
    slice_index: usize,
    peel: PeelState,
    threshold: f32,
    camera: CameraTransform,

    // Built lazily by the first surface job after each load or threshold
    // change; shared so superseded jobs still warm the cache.
    engine: Arc<Mutex<Option<Arc<PeelEngine>>>>,
    slice_slot: Slot<SliceFrame>,
    surface_slot: Slot<SurfaceFrame>,
}

impl Default for RenderSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSession {
    pub fn new() -> Self {
        Self {
            volume: None,
            mask: None,
            segmenter: None,
            compositor: OverlayCompositor::default(),
            window: WindowSettings::new(0.5, 1.0).expect("static default window is valid"),
            orientation: Orientation::Axial,
            slice_index: 0,
            peel: PeelState::default(),
            threshold: 0.0,
            camera: CameraTransform::default(),
            engine: Arc::new(Mutex::new(None)),
            slice_slot: Slot::new(),
            surface_slot: Slot::new(),
        }
    }

    /// Select the segmentation strategy used when a scan arrives without an
    /// externally supplied mask.
    pub fn with_segmenter(mut self, segmenter: Arc<dyn Segmenter>) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    /// Load a new scan, replacing the previous one and invalidating every
    /// cached renderable. Valid from both `Idle` and `Loaded`.
    ///
    /// With `mask` absent, the configured segmenter (if any) produces one;
    /// otherwise overlay compositing is skipped, not synthesized.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidInput`] if the mask shape does not match
    /// the volume; no session state changes in that case.
    pub fn load_volume(
        &mut self,
        volume: VoxelVolume,
        mask: Option<Mask>,
    ) -> Result<(), RenderError> {
        if let Some(mask) = &mask {
            mask.validate_against(&volume)?;
        }
        let mask = match (mask, &self.segmenter) {
            (Some(mask), _) => Some(mask),
            (None, Some(segmenter)) => match segmenter.segment(&volume) {
                Ok(mask) => Some(mask),
                Err(error) => {
                    log::warn!("segmentation unavailable for this scan: {error}");
                    None
                }
            },
            (None, None) => None,
        };

        let volume = Arc::new(volume);
        log::info!(
            "volume loaded: {:?} voxels, spacing {:?} mm, mask {}",
            volume.dim(),
            volume.spacing(),
            if mask.is_some() { "present" } else { "absent" }
        );

        self.window = WindowSettings::robust_for(&volume);
        self.orientation = Orientation::Axial;
        self.slice_index = volume.extent(self.orientation) / 2;
        self.peel = PeelState::default();
        self.threshold = IsosurfaceBuilder::default_threshold(&volume).unwrap_or(0.0);
        self.mask = mask.map(Arc::new);
        self.volume = Some(volume);

        *self.engine.lock().expect("engine lock poisoned") = None;
        self.slice_slot.reset();
        self.surface_slot.reset();
        self.schedule_slice();
        self.schedule_surface(false);
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        if self.volume.is_none() {
            SessionState::Idle
        } else if self.slice_slot.is_rendering() || self.surface_slot.is_rendering() {
            SessionState::Rendering
        } else {
            SessionState::Loaded
        }
    }

    pub fn window(&self) -> WindowSettings {
        self.window
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn slice_index(&self) -> usize {
        self.slice_index
    }

    pub fn peel_depth(&self) -> f32 {
        self.peel.depth()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn camera(&self) -> CameraTransform {
        self.camera
    }

    /// Latest committed 2D frame, if any.
    pub fn slice_frame(&self) -> Option<SliceFrame> {
        self.slice_slot.frame()
    }

    /// Latest committed 3D frame, if any.
    pub fn surface_frame(&self) -> Option<SurfaceFrame> {
        self.surface_slot.frame()
    }

    /// Failure state of the 2D path, cleared by the next successful commit.
    pub fn slice_error(&self) -> Option<RenderError> {
        self.slice_slot.error()
    }

    /// Failure state of the 3D path ("cannot reconstruct 3D view").
    pub fn surface_error(&self) -> Option<RenderError> {
        self.surface_slot.error()
    }

    pub fn slice_generation(&self) -> u64 {
        self.slice_slot.generation()
    }

    pub fn surface_generation(&self) -> u64 {
        self.surface_slot.generation()
    }

    /// Update the display window; invalidates the 2D slot only.
    pub fn set_window(&mut self, center: f32, width: f32) -> Result<(), RenderError> {
        self.require_loaded()?;
        let window = WindowSettings::new(center, width)?;
        if window == self.window {
            return Ok(());
        }
        self.window = window;
        self.schedule_slice();
        Ok(())
    }

    /// Change the slicing axis, keeping the index centered when the old index
    /// does not exist along the new axis.
    pub fn set_slice_orientation(&mut self, orientation: Orientation) -> Result<(), RenderError> {
        let volume = self.require_loaded()?;
        if orientation == self.orientation {
            return Ok(());
        }
        let extent = volume.extent(orientation);
        if self.slice_index >= extent {
            log::debug!("slice index re-centered for {orientation:?}");
            self.slice_index = extent / 2;
        }
        self.orientation = orientation;
        self.schedule_slice();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RenderError::OutOfRange`] for an index outside the current
    /// axis extent; the previously committed slice stays untouched.
    pub fn set_slice_index(&mut self, index: usize) -> Result<(), RenderError> {
        let volume = self.require_loaded()?;
        let extent = volume.extent(self.orientation);
        if index >= extent {
            return Err(RenderError::slice_index(index, extent));
        }
        if index == self.slice_index {
            return Ok(());
        }
        self.slice_index = index;
        self.schedule_slice();
        Ok(())
    }

    /// Commit a peel depth at full resolution; invalidates the 3D slot only.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::OutOfRange`] for a depth outside `[0, 1]`.
    pub fn set_peel_depth(&mut self, depth: f32) -> Result<(), RenderError> {
        self.require_loaded()?;
        let peel = PeelState::new(depth)?;
        let unchanged = peel == self.peel;
        self.peel = peel;
        // Re-applying the same value is a no-op unless the committed frame is
        // a drag preview that still needs its full-resolution replacement.
        let committed_preview = self
            .surface_slot
            .frame()
            .is_some_and(|frame| frame.preview);
        if unchanged && !committed_preview && !self.surface_slot.is_rendering() {
            return Ok(());
        }
        self.schedule_surface(false);
        Ok(())
    }

    /// Cheap half-resolution rebuild for continuous slider drags; call
    /// [`set_peel_depth`](Self::set_peel_depth) on release for the
    /// full-resolution mesh.
    pub fn preview_peel_depth(&mut self, depth: f32) -> Result<(), RenderError> {
        self.require_loaded()?;
        self.peel = PeelState::new(depth)?;
        self.schedule_surface(true);
        Ok(())
    }

    /// Change the isosurface threshold; rebuilds the depth field and mesh in
    /// the background.
    pub fn set_threshold(&mut self, threshold: f32) -> Result<(), RenderError> {
        self.require_loaded()?;
        if !threshold.is_finite() {
            return Err(RenderError::InvalidInput(
                "threshold must be finite".into(),
            ));
        }
        if threshold == self.threshold {
            return Ok(());
        }
        self.threshold = threshold;
        *self.engine.lock().expect("engine lock poisoned") = None;
        self.schedule_surface(false);
        Ok(())
    }

    /// Store the camera; consumed by the display layer, no recomputation.
    pub fn set_camera(&mut self, camera: CameraTransform) -> Result<(), RenderError> {
        self.require_loaded()?;
        self.camera = camera;
        Ok(())
    }

    /// Wait until both slots have settled. Test and shutdown convenience; the
    /// interaction path never calls this.
    pub async fn flush(&mut self) {
        self.slice_slot.flush().await;
        self.surface_slot.flush().await;
    }

    fn require_loaded(&self) -> Result<Arc<VoxelVolume>, RenderError> {
        self.volume
            .clone()
            .ok_or_else(|| RenderError::InvalidInput("no volume loaded".into()))
    }

    fn schedule_slice(&mut self) {
        let Some(volume) = self.volume.clone() else {
            return;
        };
        let mask = self.mask.clone();
        let orientation = self.orientation;
        let index = self.slice_index;
        let window = self.window;
        let compositor = self.compositor;

        self.slice_slot.schedule(move |cancel| {
            let slice =
                SliceExtractor::extract(&volume, orientation, index, window, mask.as_deref())?;
            cancel.checkpoint()?;
            let composited = compositor.composite_slice(&slice);
            Ok(SliceFrame {
                generation: 0,
                slice,
                composited,
            })
        });
    }

    fn schedule_surface(&mut self, preview: bool) {
        let Some(volume) = self.volume.clone() else {
            return;
        };
        let mask = self.mask.clone();
        let threshold = self.threshold;
        let peel = self.peel;
        let compositor = self.compositor;
        let engine_cache = Arc::clone(&self.engine);

        self.surface_slot.schedule(move |cancel| {
            let engine = cached_engine(&engine_cache, &volume, threshold)?;
            cancel.checkpoint()?;

            let mesh = if preview {
                engine.build_preview(peel, cancel)?
            } else {
                engine.build(peel, cancel)?
            };

            let depth = peel.depth();
            let (overlay, tumor_shell) = match &mask {
                Some(mask) => {
                    let visible = |z: usize, y: usize, x: usize| engine.visible(z, y, x, depth);
                    let overlay =
                        compositor.composite_mesh(&mesh, mask, volume.spacing(), visible);
                    cancel.checkpoint()?;
                    let shell =
                        compositor.tumor_shell(mask, volume.spacing(), visible, cancel)?;
                    (Some(overlay), shell)
                }
                None => (None, None),
            };

            Ok(SurfaceFrame {
                generation: 0,
                peel_depth: depth,
                threshold,
                preview,
                mesh,
                overlay,
                tumor_shell,
            })
        });
    }
}

/// Fetch the peel engine for the current volume/threshold pair, building it
/// on first use. The depth field survives parameter changes that do not touch
/// the threshold, and superseded jobs that already built it still warm the
/// cache for their successors.
fn cached_engine(
    cache: &Mutex<Option<Arc<PeelEngine>>>,
    volume: &Arc<VoxelVolume>,
    threshold: f32,
) -> Result<Arc<PeelEngine>, RenderError> {
    if let Some(engine) = cache.lock().expect("engine lock poisoned").as_ref()
        && engine.threshold() == threshold
    {
        return Ok(Arc::clone(engine));
    }
    // Built outside the lock; concurrent builders race benignly.
    let engine = Arc::new(PeelEngine::new(Arc::clone(volume), threshold)?);
    let mut slot = cache.lock().expect("engine lock poisoned");
    *slot = Some(Arc::clone(&engine));
    Ok(engine)
}
