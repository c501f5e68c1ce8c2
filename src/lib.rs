//! # MRI-volume library
//!
//! Volumetric processing and interactive rendering core for brain MRI
//! viewers.
//!
//! The crate takes a decoded scalar voxel grid (container parsing such as
//! NIfTI or DICOM happens upstream) and produces two synchronized visual
//! representations: calibrated 2D slice imagery and an interactively
//! peelable 3D reconstruction, both annotated with a tumor-region overlay.
//! Slices can be taken in the three medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//! The 3D path extracts the tissue isosurface with marching cubes, derives a
//! per-voxel radial depth field once per scan, and peels outer shells away as
//! the peel-depth slider moves. [`session::RenderSession`] orchestrates both
//! paths: setters are non-blocking, heavy recomputation runs on background
//! tasks with cooperative cancellation, and only the most recently requested
//! parameter value is ever committed to the visible state.
//!
//! Tumor masks come from the external segmentation capability (or the
//! deterministic stand-in in [`segmentation`]); without one, overlay
//! compositing is skipped.
//!
//!   Contributions are highly welcome!
//!
//! # Examples
//!
//! ## Windowed slice extraction
//!
//! ```no_run
//! # use mri_volume::enums::Orientation;
//! # use mri_volume::slice::SliceExtractor;
//! # use mri_volume::volume::VoxelVolume;
//! # use mri_volume::windowing::WindowSettings;
//! let volume = VoxelVolume::new((64, 64, 64), (1.0, 1.0, 1.0), vec![0.0; 64 * 64 * 64])
//!     .expect("should have built volume from decoded scan data");
//! let window = WindowSettings::robust_for(&volume);
//! let slice = SliceExtractor::extract(&volume, Orientation::Axial, 32, window, None)
//!     .expect("should have extracted slice at center of volume");
//! assert_eq!(slice.dim(), (64, 64));
//! ```
//!
//! ## Peelable 3D reconstruction
//!
//! ```no_run
//! # use mri_volume::cancel::CancelFlag;
//! # use mri_volume::peel::{PeelEngine, PeelState};
//! # use mri_volume::volume::VoxelVolume;
//! # use std::sync::Arc;
//! # let volume = Arc::new(
//! #     VoxelVolume::new((64, 64, 64), (1.0, 1.0, 1.0), vec![0.0; 64 * 64 * 64]).unwrap(),
//! # );
//! let engine = PeelEngine::new(volume, 0.5).expect("should have built depth field");
//! let mesh = engine
//!     .build(PeelState::new(0.4).unwrap(), &CancelFlag::new())
//!     .expect("should have rebuilt the peeled surface");
//! ```

pub mod cancel;
pub mod enums;
pub mod error;
pub mod isosurface;
pub mod mesh;
pub mod overlay;
pub mod peel;
pub mod segmentation;
pub mod session;
pub mod slice;
pub mod volume;
pub mod windowing;

pub use cancel::CancelFlag;
pub use enums::{Orientation, SessionState};
pub use error::RenderError;
pub use isosurface::IsosurfaceBuilder;
pub use mesh::SurfaceMesh;
pub use overlay::{MeshOverlay, OverlayCompositor};
pub use peel::{PeelEngine, PeelState};
pub use segmentation::{Segmenter, ThresholdBlobSegmenter};
pub use session::{CameraTransform, RenderSession, SliceFrame, SurfaceFrame};
pub use slice::{SliceExtractor, SliceImage};
pub use volume::{Mask, VoxelVolume};
pub use windowing::{WindowSettings, WindowingTransform};
