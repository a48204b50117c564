use cliclack::{confirm, input, log};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use imagegen_rs_core::{
    DisplayMode, GenerationSession, Operation, SessionConfig, Subscription, SyntheticBackend,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STEPS_DEFAULT: u32 = 20;
const SEED_DEFAULT: i64 = 0;

#[derive(Parser)]
struct Args {
    /// JSON session config. Flags below override its fields.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the model files.
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Show only the final image, or publish previews while denoising.
    #[arg(short, long)]
    display: Option<DisplayMode>,

    /// Publish a preview every this many steps.
    #[arg(short, long)]
    preview_every: Option<u32>,

    /// Number of denoising steps. A higher number of steps often means higher quality.
    #[arg(short, long)]
    num_steps: Option<u32>,

    /// Generation seed.
    #[arg(short, long, allow_negative_numbers = true)]
    seed: Option<i64>,

    /// Width of generated images.
    #[arg(long, default_value_t = 256)]
    width: u32,

    /// Height of generated images.
    #[arg(long, default_value_t = 256)]
    height: u32,

    /// Directory to write previews to when showing iterations.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
}

impl Args {
    fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_json_file(path)?,
            None => SessionConfig::default(),
        };
        if let Some(model_dir) = &self.model_dir {
            config.model_dir = model_dir.clone().into();
        }
        if let Some(display) = self.display {
            config.display_mode = display;
        }
        if let Some(preview_every) = self.preview_every {
            config.preview_every = preview_every;
        }
        if let Some(num_steps) = self.num_steps {
            config.step_count = Some(num_steps);
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        Ok(config)
    }
}

fn progress_bar(config: &SessionConfig) -> anyhow::Result<ProgressBar> {
    let bar = match (config.display_mode, config.step_count) {
        (DisplayMode::ShowIterations, Some(steps)) => {
            let bar = ProgressBar::new(u64::from(steps));
            bar.set_style(ProgressStyle::with_template(
                "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}",
            )?);
            bar
        }
        _ => {
            let bar = ProgressBar::new_spinner();
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        }
    };
    bar.set_message("Generating");
    Ok(bar)
}

/// `after` when it was published since `before` was taken.
fn published_since<'a, T>(
    before: &Option<Arc<T>>,
    after: &'a Option<Arc<T>>,
) -> Option<&'a Arc<T>> {
    match (before, after) {
        (Some(before), Some(after)) if Arc::ptr_eq(before, after) => None,
        (_, after) => after.as_ref(),
    }
}

/// Follow a running generation, writing every preview to `out_dir`.
fn follow(
    op: &Operation,
    updates: &Subscription,
    bar: &ProgressBar,
    out_dir: &Path,
) -> anyhow::Result<imagegen_rs_core::Result<()>> {
    loop {
        let done = op.wait_timeout(POLL_INTERVAL);
        for state in updates.drain() {
            let (Some(progress), Some(image)) = (state.progress, &state.last_image) else {
                continue;
            };
            bar.set_position(u64::from(progress.step));
            let path = out_dir.join(format!("step_{:04}.png", progress.step));
            image.save(&path)?;
        }
        if let Some(res) = done {
            return Ok(res);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let session = GenerationSession::new(SyntheticBackend::with_size(args.width, args.height))?;
    session.set_config(args.session_config()?);

    session.initialize()?.wait()?;
    println!(
        "Model initialization took: {}ms",
        session.state().initialize_duration_ms.unwrap_or_default()
    );

    loop {
        let config = session.state().config.clone();

        let mut prompt_input = input("Prompt:");
        if !config.prompt.is_empty() {
            prompt_input = prompt_input.default_input(&config.prompt);
        }
        let prompt: String = prompt_input
            .validate(|input: &String| {
                if input.is_empty() {
                    Err("Prompt is required!")
                } else {
                    Ok(())
                }
            })
            .interact()?;
        let final_only = config.display_mode == DisplayMode::FinalOnly;
        let num_steps: u32 = input("Steps:")
            .default_input(&config.step_count.unwrap_or(STEPS_DEFAULT).to_string())
            .validate(move |input: &String| {
                if input.parse::<u32>().map_err(|e| e.to_string())? == 0 && final_only {
                    Err("Nonzero value is required!".to_string())
                } else {
                    Ok(())
                }
            })
            .interact()?;
        let seed: i64 = input("Seed:")
            .default_input(&config.seed.unwrap_or(SEED_DEFAULT).to_string())
            .validate(|input: &String| input.parse::<i64>().map(|_| ()).map_err(|e| e.to_string()))
            .interact()?;

        session.set_prompt(prompt);
        session.set_step_count(Some(num_steps));
        session.set_seed(Some(seed));

        let previous_image = session.state().last_image.clone();
        let updates = session.subscribe();
        let bar = progress_bar(&session.state().config)?;
        let op = session.generate_image()?;
        let res = follow(&op, &updates, &bar, &args.out_dir)?;
        bar.finish_and_clear();

        match res {
            Ok(()) => {
                let state = session.state();
                println!(
                    "Image generation took: {}ms",
                    state.generate_duration_ms.unwrap_or_default()
                );
                if let Some(image) = published_since(&previous_image, &state.last_image) {
                    let out_file: String = input("Save image to:")
                        .validate(|input: &String| {
                            if input.is_empty() {
                                Err("Image path is required!")
                            } else {
                                let path = PathBuf::from(input);
                                let ext = path
                                    .extension()
                                    .and_then(|ext| ext.to_str())
                                    .ok_or("Extension is required!")?;
                                if !["png", "jpg"].contains(&ext) {
                                    Err(".png or .jpg extension is required!")
                                } else {
                                    Ok(())
                                }
                            }
                        })
                        .interact()?;
                    image.save(out_file)?;
                }
            }
            Err(e) => {
                log::error(format!("Generation failed: {e}"))?;
                session.clear_error();
            }
        }

        if !confirm("Generate another image?").initial_value(true).interact()? {
            break;
        }
    }

    session.shutdown();
    Ok(())
}
