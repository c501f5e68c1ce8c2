use thiserror::Error;

/// Errors raised by the volumetric processing and rendering core.
///
/// Failures are isolated per renderable: a 3D reconstruction error never
/// disables the 2D slice path, and vice versa. `Cancelled` is internal
/// bookkeeping for superseded background computations and is never surfaced
/// to library consumers by [`RenderSession`](crate::session::RenderSession).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{what} {value} outside valid range [{min}, {max}]")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("degenerate volume: uniform intensity, no isosurface exists")]
    DegenerateVolume,

    #[error("computation superseded before completion")]
    Cancelled,
}

impl RenderError {
    pub(crate) fn slice_index(index: usize, extent: usize) -> Self {
        RenderError::OutOfRange {
            what: "slice index",
            value: index as f64,
            min: 0.0,
            max: extent.saturating_sub(1) as f64,
        }
    }

    pub(crate) fn peel_depth(depth: f32) -> Self {
        RenderError::OutOfRange {
            what: "peel depth",
            value: f64::from(depth),
            min: 0.0,
            max: 1.0,
        }
    }
}
