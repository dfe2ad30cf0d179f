use anyhow::Result;

use crate::detect::result::RawDetection;

/// Object detector boundary.
///
/// The detector is an external collaborator: it receives a frame's pixels and
/// returns labeled pixel-space boxes with scores. Filtering, thresholding, and
/// coordinate normalization happen on this side of the boundary, never inside
/// a backend.
pub trait DetectorBackend: Send {
    /// Backend identifier, used in logs and CLI selection.
    fn name(&self) -> &'static str;

    /// Whether the model is loaded and usable. Polling performs no detector
    /// calls while this is false.
    fn ready(&self) -> bool {
        true
    }

    /// Optional initialization hook (model load, first-inference warm-up).
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run detection on one RGB frame.
    ///
    /// Implementations must treat the pixel slice as read-only and ephemeral,
    /// and must not retain it across calls.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>>;
}
