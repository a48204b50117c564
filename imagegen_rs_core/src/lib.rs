//! Core crate for driving an on-device image generator.
//!
//! A [`GenerationSession`] owns one inference engine, runs every engine call on a background
//! worker and republishes its state as immutable [`SessionState`] snapshots.
//!
//! ```rust,no_run
//! use imagegen_rs_core::{DisplayMode, GenerationSession, SyntheticBackend};
//!
//! let session = GenerationSession::new(SyntheticBackend::default())?;
//! session.set_model_dir("/data/local/tmp/image_generator/bins/");
//! session.set_display_mode(DisplayMode::ShowIterations);
//! session.set_preview_every(5);
//! session.initialize()?.wait()?;
//!
//! session.set_prompt("Draw a picture of a sunrise.");
//! session.set_step_count(Some(20));
//! session.set_seed(Some(42));
//!
//! let previews = session.subscribe();
//! let op = session.generate_image()?;
//! std::thread::spawn(move || {
//!     for state in previews {
//!         if let Some(progress) = state.progress {
//!             println!("preview {}/{}", progress.step, progress.total);
//!         }
//!     }
//! });
//! op.wait()?;
//!
//! let state = session.state();
//! println!("Took: {}ms", state.generate_duration_ms.unwrap_or_default());
//! if let Some(image) = &state.last_image {
//!     image.save("image.png")?;
//! }
//! session.shutdown();
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

mod backends;
mod session;
mod util;

pub use backends::{Backend, EngineHandle, GeneratorHandle, SyntheticBackend};
pub use imagegen_rs_common::{placeholder_image, ModelDir, Result, SessionError, DEFAULT_MODEL_DIR};
pub use session::{
    DisplayMode, GenerationRequest, GenerationSession, Operation, Phase, SessionConfig,
    SessionState, StepProgress, Subscription, DEFAULT_PREVIEW_EVERY,
};
