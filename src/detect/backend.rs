use anyhow::Result;
use ndarray::{Array4, ArrayD};

/// Inference engine seam.
///
/// Backends take a `[1, 3, S, S]` input tensor and return the raw
/// `[1, F, N]` output. They run synchronously on the frame thread; a call
/// that returns has completed.
pub trait InferenceBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run one inference.
    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release worker resources. Called once at teardown.
    fn release(&mut self) {}
}
