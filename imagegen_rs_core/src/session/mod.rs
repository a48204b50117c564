mod config;
mod state;
mod worker;

use std::{sync::Arc, time::Instant};

use anyhow::Context;
use imagegen_rs_common::{placeholder_image, ModelDir, Result, SessionError};
use tracing::{debug, error, info, warn};

pub use config::{DisplayMode, GenerationRequest, SessionConfig, DEFAULT_PREVIEW_EVERY};
pub use state::{Phase, SessionState, StepProgress, Subscription};
pub use worker::Operation;

use crate::{
    backends::Backend,
    util::{elapsed_ms, is_preview_step},
};
use state::StatePublisher;
use worker::{guarded, Worker, WorkerContext};

const INITIALIZING_MESSAGE: &str = "Initializing...";
const GENERATING_MESSAGE: &str = "Generating...";

/// Drives one inference engine through initialize and generate, publishing a new
/// [`SessionState`] snapshot after every transition.
///
/// Engine calls run on a dedicated worker thread, never on the caller's thread. At most one
/// initialize or generate is in flight at a time; a second request while one is running is
/// rejected with [`SessionError::Busy`] and leaves the state untouched.
///
/// Dropping the session waits for queued operations to finish and releases the engine.
pub struct GenerationSession {
    publisher: Arc<StatePublisher>,
    /// Only `None` while dropping.
    worker: Option<Worker>,
}

impl GenerationSession {
    pub fn new<B: Backend + 'static>(backend: B) -> anyhow::Result<Self> {
        Self::with_config(backend, SessionConfig::default())
    }

    pub fn with_config<B: Backend + 'static>(
        backend: B,
        config: SessionConfig,
    ) -> anyhow::Result<Self> {
        let worker = Worker::spawn(Box::new(backend)).context("spawning session worker")?;
        let publisher = Arc::new(StatePublisher::new(SessionState {
            config,
            ..Default::default()
        }));
        Ok(Self {
            publisher,
            worker: Some(worker),
        })
    }

    /// The latest snapshot.
    pub fn state(&self) -> Arc<SessionState> {
        self.publisher.latest()
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.publisher.subscribe()
    }

    fn configure(&self, f: impl FnOnce(&mut SessionConfig)) {
        self.publisher.update(|state| f(&mut state.config));
    }

    pub fn set_prompt<S: Into<String>>(&self, prompt: S) {
        let prompt = prompt.into();
        self.configure(|cfg| cfg.prompt = prompt);
    }

    pub fn set_step_count(&self, step_count: Option<u32>) {
        self.configure(|cfg| cfg.step_count = step_count);
    }

    pub fn set_seed(&self, seed: Option<i64>) {
        self.configure(|cfg| cfg.seed = seed);
    }

    pub fn set_display_mode(&self, display_mode: DisplayMode) {
        self.configure(|cfg| cfg.display_mode = display_mode);
    }

    pub fn set_preview_every(&self, preview_every: u32) {
        self.configure(|cfg| cfg.preview_every = preview_every);
    }

    pub fn set_model_dir<M: Into<ModelDir>>(&self, model_dir: M) {
        let model_dir = model_dir.into();
        self.configure(|cfg| cfg.model_dir = model_dir);
    }

    /// Replace the whole configuration at once.
    pub fn set_config(&self, config: SessionConfig) {
        self.configure(|cfg| *cfg = config);
    }

    pub fn clear_error(&self) {
        self.publisher.update(|state| state.last_error = None);
    }

    pub fn clear_generate_time(&self) {
        self.publisher.update(|state| state.generate_duration_ms = None);
    }

    pub fn clear_initialize_time(&self) {
        self.publisher.update(|state| state.initialize_duration_ms = None);
    }

    /// Load the engine in the background. An already loaded engine is released first.
    ///
    /// Fails immediately with [`SessionError::Config`] when showing iterations with a preview
    /// cadence of 0; the error is published as `last_error` and the phase is unchanged.
    pub fn initialize(&self) -> Result<Operation> {
        let model_dir = self.publisher.try_update(|state| {
            if state.phase.is_busy() {
                return Err(SessionError::Busy);
            }
            Ok(match state.config.check_initialize() {
                Err(e) => {
                    state.last_error = Some(e.to_string());
                    Err(e)
                }
                Ok(()) => {
                    state.phase = Phase::Initializing;
                    state.last_error = None;
                    state.status_message = INITIALIZING_MESSAGE.to_string();
                    Ok(state.config.model_dir.clone())
                }
            })
        })??;

        let publisher = self.publisher.clone();
        self.submit(move |ctx| {
            let start = Instant::now();
            match ctx.initialize(&model_dir) {
                Ok(()) => {
                    let elapsed = elapsed_ms(start);
                    info!("engine initialized in {elapsed}ms.");
                    publisher.update(|state| {
                        state.phase = Phase::Ready;
                        state.status_message.clear();
                        state.initialize_duration_ms = Some(elapsed);
                    });
                    Ok(())
                }
                Err(e) => {
                    error!("failed to initialize engine: {e:#}");
                    let err = SessionError::capability(&e);
                    publisher.update(|state| {
                        state.phase = Phase::Uninitialized;
                        state.status_message.clear();
                        state.last_error = Some(err.to_string());
                    });
                    Err(err)
                }
            }
        })
    }

    /// Generate an image from the current configuration in the background.
    ///
    /// Fails immediately, publishing `last_error`, when the prompt is empty, the step count or
    /// seed is missing, or the engine is not initialized. When showing iterations, a preview
    /// is published every `preview_every` steps; a step count of 0 runs no steps and publishes
    /// no image.
    pub fn generate_image(&self) -> Result<Operation> {
        let request = self.publisher.try_update(|state| {
            if state.phase.is_busy() {
                return Err(SessionError::Busy);
            }
            let checked = state.config.check_generate().and_then(|request| {
                if state.phase == Phase::Uninitialized {
                    Err(SessionError::NotInitialized)
                } else {
                    Ok(request)
                }
            });
            Ok(match checked {
                Err(e) => {
                    state.last_error = Some(e.to_string());
                    Err(e)
                }
                Ok(request) => {
                    state.phase = Phase::Generating;
                    state.last_error = None;
                    state.status_message = GENERATING_MESSAGE.to_string();
                    state.progress = None;
                    Ok(request)
                }
            })
        })??;

        let publisher = self.publisher.clone();
        self.submit(move |ctx| {
            let start = Instant::now();
            let res = run_generation(ctx, &request, &publisher);
            let elapsed = elapsed_ms(start);
            let phase = if ctx.has_engine() {
                Phase::Ready
            } else {
                Phase::Uninitialized
            };
            match &res {
                Ok(()) => {
                    info!("generated `{}` in {elapsed}ms.", request.prompt);
                    publisher.update(|state| {
                        state.phase = phase;
                        state.status_message.clear();
                        state.progress = None;
                        state.generate_duration_ms = Some(elapsed);
                    });
                }
                Err(e) => {
                    error!("generation failed: {e}");
                    publisher.update(|state| {
                        state.phase = phase;
                        state.status_message.clear();
                        state.progress = None;
                        state.last_error = Some(e.to_string());
                    });
                }
            }
            res
        })
    }

    /// Release the engine once every queued operation has finished.
    ///
    /// Never blocks and never fails; calling it again is harmless.
    pub fn close(&self) {
        let Some(worker) = &self.worker else {
            return;
        };
        let publisher = self.publisher.clone();
        let submitted = worker.submit(move |ctx| {
            if ctx.release() {
                // A queued re-initialize or generate owns the phase from here on.
                let _ = publisher.try_update(|state| {
                    if state.phase != Phase::Ready {
                        return Err(());
                    }
                    state.phase = Phase::Uninitialized;
                    Ok(())
                });
            }
            Ok(())
        });
        if let Err(e) = submitted {
            warn!("could not schedule engine release: {e}");
        }
    }

    /// Close the engine and wait for the worker to finish every queued operation.
    ///
    /// Same as dropping the session.
    pub fn shutdown(self) {
        drop(self);
    }

    fn submit<F>(&self, job: F) -> Result<Operation>
    where
        F: FnOnce(&mut WorkerContext) -> Result<()> + Send + 'static,
    {
        let submitted = match &self.worker {
            Some(worker) => worker.submit(job),
            None => Err(SessionError::WorkerGone),
        };
        match submitted {
            Ok(op) => Ok(op),
            Err(e) => {
                // Nothing will finish the transition that was just published.
                self.publisher.update(|state| {
                    state.phase = Phase::Uninitialized;
                    state.status_message.clear();
                    state.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }
}

impl Drop for GenerationSession {
    fn drop(&mut self) {
        self.close();
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

fn run_generation(
    ctx: &mut WorkerContext,
    request: &GenerationRequest,
    publisher: &StatePublisher,
) -> Result<()> {
    let engine = ctx.engine().ok_or(SessionError::NotInitialized)?;
    let capability = |e: anyhow::Error| SessionError::capability(&e);
    let GenerationRequest {
        prompt,
        steps,
        seed,
        display_mode,
        preview_every,
    } = request;
    let (steps, seed) = (*steps, *seed);

    match display_mode {
        DisplayMode::FinalOnly => {
            let image =
                guarded(|| engine.generate_final(prompt, steps, seed)).map_err(capability)?;
            publisher.update(|state| state.last_image = Some(Arc::new(image)));
        }
        DisplayMode::ShowIterations => {
            guarded(|| engine.set_input(prompt, steps, seed)).map_err(capability)?;
            for step in 0..steps {
                let preview = is_preview_step(step, *preview_every);
                let image = guarded(|| engine.generate_step(preview)).map_err(capability)?;
                debug!("step {}/{steps} done.", step + 1);
                if !preview {
                    continue;
                }
                let image = image.unwrap_or_else(|| {
                    debug!("engine returned no image for step {}, using placeholder.", step + 1);
                    placeholder_image()
                });
                publisher.update(|state| {
                    state.last_image = Some(Arc::new(image));
                    state.status_message = format!("Generating... ({}/{steps})", step + 1);
                    state.progress = Some(StepProgress {
                        step: step + 1,
                        total: steps,
                    });
                });
            }
        }
    }
    Ok(())
}
