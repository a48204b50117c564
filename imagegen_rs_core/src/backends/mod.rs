mod synthetic;

use std::path::Path;

use anyhow::Context;
use image::DynamicImage;
use tracing::{info, warn};

pub use synthetic::SyntheticBackend;

/// An inference engine which can be brought up from a model directory.
pub trait Backend: Send {
    fn name(&self) -> &'static str;

    /// Load the model and return a live handle to it. This is expected to be slow.
    fn initialize(&self, model_dir: &Path) -> anyhow::Result<Box<dyn GeneratorHandle>>;
}

/// A live, initialized inference engine.
///
/// All methods block until the engine is done and must not be called on a thread which
/// consumes session snapshots.
pub trait GeneratorHandle: Send {
    /// Run the whole denoising process and return the final image.
    fn generate_final(&mut self, prompt: &str, steps: u32, seed: i64)
        -> anyhow::Result<DynamicImage>;

    /// Prepare a stepped generation. Must precede [`GeneratorHandle::generate_step`].
    fn set_input(&mut self, prompt: &str, steps: u32, seed: i64) -> anyhow::Result<()>;

    /// Run one denoising step. When `show_result` is set the engine may decode the current
    /// latents into an image; `None` means it did not.
    fn generate_step(&mut self, show_result: bool) -> anyhow::Result<Option<DynamicImage>>;

    /// Release the engine. Calling this more than once must be harmless.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// Exclusive owner of one [`GeneratorHandle`].
///
/// The underlying handle is closed exactly once: by [`EngineHandle::close`] or, failing that,
/// on drop. Close failures are logged and never returned.
pub struct EngineHandle {
    inner: Option<Box<dyn GeneratorHandle>>,
    backend: &'static str,
}

impl EngineHandle {
    pub fn new(inner: Box<dyn GeneratorHandle>, backend: &'static str) -> Self {
        Self {
            inner: Some(inner),
            backend,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn live(&mut self) -> anyhow::Result<&mut Box<dyn GeneratorHandle>> {
        let backend = self.backend;
        self.inner
            .as_mut()
            .with_context(|| format!("{backend} engine handle is already closed"))
    }

    pub fn generate_final(
        &mut self,
        prompt: &str,
        steps: u32,
        seed: i64,
    ) -> anyhow::Result<DynamicImage> {
        self.live()?.generate_final(prompt, steps, seed)
    }

    pub fn set_input(&mut self, prompt: &str, steps: u32, seed: i64) -> anyhow::Result<()> {
        self.live()?.set_input(prompt, steps, seed)
    }

    pub fn generate_step(&mut self, show_result: bool) -> anyhow::Result<Option<DynamicImage>> {
        self.live()?.generate_step(show_result)
    }

    /// Release the engine. Returns whether this call did the release.
    pub fn close(&mut self) -> bool {
        let Some(mut inner) = self.inner.take() else {
            return false;
        };
        match inner.close() {
            Ok(()) => info!("{} engine released.", self.backend),
            Err(e) => warn!("failed to release {} engine: {e:#}", self.backend),
        }
        true
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.close();
    }
}
