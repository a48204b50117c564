use std::{fmt::Display, path::Path};

use anyhow::Context;
use imagegen_rs_common::{ModelDir, Result, SessionError};
use serde::{Deserialize, Serialize};

/// Default number of steps between preview images.
pub const DEFAULT_PREVIEW_EVERY: u32 = 5;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
/// How a generation is presented.
///
/// - FinalOnly: run the whole generation in one engine call and publish only the result.
/// - ShowIterations: step the engine one denoising step at a time and publish a preview every
///   `preview_every` steps.
pub enum DisplayMode {
    #[default]
    #[serde(rename = "final_only")]
    #[value(name = "final")]
    FinalOnly,
    #[serde(rename = "show_iterations")]
    #[value(name = "iterations")]
    ShowIterations,
}

impl Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FinalOnly => write!(f, "final only"),
            Self::ShowIterations => write!(f, "show iterations"),
        }
    }
}

/// User-editable parameters of a session.
///
/// Nothing is validated when a field is set. [`SessionConfig::check_initialize`] and
/// [`SessionConfig::check_generate`] run when the corresponding operation starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub prompt: String,
    /// The number of denoising steps.
    pub step_count: Option<u32>,
    pub seed: Option<i64>,
    pub display_mode: DisplayMode,
    /// Publish a preview every this many steps. 0 means never.
    pub preview_every: u32,
    pub model_dir: ModelDir,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            step_count: None,
            seed: None,
            display_mode: DisplayMode::FinalOnly,
            preview_every: DEFAULT_PREVIEW_EVERY,
            model_dir: ModelDir::default(),
        }
    }
}

/// Validated, frozen parameters of one generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub steps: u32,
    pub seed: i64,
    pub display_mode: DisplayMode,
    pub preview_every: u32,
}

impl SessionConfig {
    /// Load a JSON config. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn check_initialize(&self) -> Result<()> {
        if self.display_mode == DisplayMode::ShowIterations && self.preview_every == 0 {
            return Err(SessionError::config("display iteration cannot be empty"));
        }
        Ok(())
    }

    /// A zero step count is accepted only when showing iterations, where it runs no steps.
    pub fn check_generate(&self) -> Result<GenerationRequest> {
        if self.prompt.is_empty() {
            return Err(SessionError::config("prompt cannot be empty"));
        }
        let Some(steps) = self.step_count else {
            return Err(SessionError::config("step count cannot be empty"));
        };
        if steps == 0 && self.display_mode == DisplayMode::FinalOnly {
            return Err(SessionError::config("step count must be positive"));
        }
        let Some(seed) = self.seed else {
            return Err(SessionError::config("seed cannot be empty"));
        };
        Ok(GenerationRequest {
            prompt: self.prompt.clone(),
            steps,
            seed,
            display_mode: self.display_mode,
            preview_every: self.preview_every,
        })
    }
}
