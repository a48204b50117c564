#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]

use std::path::Path;

use anyhow::Context;
use image::{DynamicImage, Rgb, RgbImage};
use imagegen_rs_common::ModelDir;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use super::{Backend, GeneratorHandle};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A deterministic stand-in for a real diffusion engine.
///
/// Images are a pure function of the prompt, the seed and how far denoising has progressed: every
/// step blends less seeded noise into a two-color gradient picked from the prompt and seed. The
/// model directory must exist but its contents are not read.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticBackend {
    width: u32,
    height: u32,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
        }
    }
}

impl SyntheticBackend {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Backend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn initialize(&self, model_dir: &Path) -> anyhow::Result<Box<dyn GeneratorHandle>> {
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("image size must be nonzero, got {}x{}", self.width, self.height);
        }
        ModelDir::new(model_dir)
            .ensure_exists()
            .context("initializing synthetic engine")?;
        Ok(Box::new(SyntheticGenerator {
            width: self.width,
            height: self.height,
            input: None,
            closed: false,
        }))
    }
}

struct SteppedInput {
    prompt: String,
    steps: u32,
    seed: i64,
    done: u32,
}

struct SyntheticGenerator {
    width: u32,
    height: u32,
    input: Option<SteppedInput>,
    closed: bool,
}

fn prompt_seed(prompt: &str, seed: i64) -> u64 {
    prompt
        .bytes()
        .fold(FNV_OFFSET ^ seed as u64, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Position of pixel `(x, y)` along the top-left to bottom-right diagonal, in `[0, 1]`.
fn gradient_position(x: u32, y: u32, width: u32, height: u32) -> f32 {
    let span = (u64::from(width) + u64::from(height)).saturating_sub(2).max(1);
    ((u64::from(x) + u64::from(y)) as f64 / span as f64) as f32
}

impl SyntheticGenerator {
    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.closed {
            anyhow::bail!("synthetic engine is closed");
        }
        Ok(())
    }

    /// `progress` is in `[0, 1]`; 1 is the fully denoised image.
    fn render(&self, prompt: &str, seed: i64, progress: f32) -> DynamicImage {
        let mut palette = StdRng::seed_from_u64(prompt_seed(prompt, seed));
        let from: [f32; 3] = [palette.gen(), palette.gen(), palette.gen()];
        let to: [f32; 3] = [palette.gen(), palette.gen(), palette.gen()];
        let mut noise = StdRng::seed_from_u64(seed as u64);

        let (width, height) = (self.width, self.height);
        let img = RgbImage::from_fn(width, height, |x, y| {
            let t = gradient_position(x, y, width, height);
            let mut px = [0u8; 3];
            for (c, out) in px.iter_mut().enumerate() {
                let clean = from[c] + (to[c] - from[c]) * t;
                let grain: f32 = noise.gen();
                let value = clean * progress + grain * (1. - progress);
                *out = (value.clamp(0., 1.) * 255.).round() as u8;
            }
            Rgb(px)
        });
        DynamicImage::ImageRgb8(img)
    }
}

impl GeneratorHandle for SyntheticGenerator {
    fn generate_final(
        &mut self,
        prompt: &str,
        steps: u32,
        seed: i64,
    ) -> anyhow::Result<DynamicImage> {
        self.ensure_open()?;
        if steps == 0 {
            anyhow::bail!("step count must be positive");
        }
        debug!("synthetic generate, {steps} steps, seed {seed}");
        Ok(self.render(prompt, seed, 1.))
    }

    fn set_input(&mut self, prompt: &str, steps: u32, seed: i64) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.input = Some(SteppedInput {
            prompt: prompt.to_string(),
            steps,
            seed,
            done: 0,
        });
        Ok(())
    }

    fn generate_step(&mut self, show_result: bool) -> anyhow::Result<Option<DynamicImage>> {
        self.ensure_open()?;
        let input = self
            .input
            .as_mut()
            .context("`set_input` must be called before stepping")?;
        if input.done >= input.steps {
            anyhow::bail!("all {} steps have already run", input.steps);
        }
        input.done += 1;
        if !show_result {
            return Ok(None);
        }
        let progress = input.done as f32 / input.steps as f32;
        let (prompt, seed) = (input.prompt.clone(), input.seed);
        Ok(Some(self.render(&prompt, seed, progress)))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        self.input = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Box<dyn GeneratorHandle> {
        SyntheticBackend::with_size(16, 8)
            .initialize(&std::env::temp_dir())
            .expect("temp dir exists")
    }

    #[test]
    fn missing_model_dir_fails() {
        let err = SyntheticBackend::default()
            .initialize(Path::new("/no/such/model/dir"))
            .err()
            .expect("initialize should fail");
        assert!(format!("{err:#}").contains("initializing synthetic engine"));
    }

    #[test]
    fn final_image_is_deterministic() -> anyhow::Result<()> {
        let mut engine = engine();
        let a = engine.generate_final("a cat", 4, 42)?;
        let b = engine.generate_final("a cat", 4, 42)?;
        let c = engine.generate_final("a cat", 4, 43)?;
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!((a.width(), a.height()), (16, 8));
        Ok(())
    }

    #[test]
    fn last_step_matches_final() -> anyhow::Result<()> {
        let mut engine = engine();
        engine.set_input("a dog", 3, 7)?;
        assert!(engine.generate_step(false)?.is_none());
        let mid = engine.generate_step(true)?.expect("preview requested");
        let last = engine.generate_step(true)?.expect("preview requested");
        assert_ne!(mid, last);
        assert_eq!(last, engine.generate_final("a dog", 3, 7)?);
        assert!(engine.generate_step(true).is_err());
        Ok(())
    }

    #[test]
    fn gradient_spans_corners_at_any_size() {
        assert_eq!(gradient_position(0, 0, 16, 8), 0.);
        assert_eq!(gradient_position(15, 7, 16, 8), 1.);
        assert_eq!(gradient_position(0, 0, 1, 1), 0.);
        assert_eq!(
            gradient_position(u32::MAX - 1, u32::MAX - 1, u32::MAX, u32::MAX),
            1.
        );
        let mid = gradient_position(u32::MAX / 2, u32::MAX / 2, u32::MAX, u32::MAX);
        assert!((mid - 0.5).abs() < 1e-6);
    }

    #[test]
    fn step_requires_input() {
        assert!(engine().generate_step(true).is_err());
    }

    #[test]
    fn closed_engine_rejects_calls() -> anyhow::Result<()> {
        let mut engine = engine();
        engine.close()?;
        engine.close()?;
        assert!(engine.generate_final("x", 1, 0).is_err());
        assert!(engine.set_input("x", 1, 0).is_err());
        Ok(())
    }
}
