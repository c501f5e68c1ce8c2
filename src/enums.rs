#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Lifecycle state of a [`RenderSession`](crate::session::RenderSession).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No volume loaded. Only `load_volume` is accepted.
    #[default]
    Idle,
    /// A volume is loaded and every committed renderable is up to date.
    Loaded,
    /// At least one background recomputation is in flight.
    Rendering,
}
