use crate::error::RenderError;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation handle shared between a background computation
/// and the session that may supersede it.
///
/// Heavy kernels poll the flag at coarse granularity (per z-slab, per
/// scanline) and bail out with [`RenderError::Cancelled`]. No lock is ever
/// held across a checkpoint.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the computation to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Bail out of a computation if cancellation was requested.
    #[inline]
    pub fn checkpoint(&self) -> Result<(), RenderError> {
        if self.is_cancelled() {
            Err(RenderError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_passes_until_cancelled() {
        let flag = CancelFlag::new();
        assert!(flag.checkpoint().is_ok());
        flag.cancel();
        assert_eq!(flag.checkpoint(), Err(RenderError::Cancelled));
    }

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        flag.cancel();
        assert!(observer.is_cancelled());
    }
}
