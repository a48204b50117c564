use std::{path::PathBuf, thread};

use imagegen_rs_core::{DisplayMode, GenerationSession, SessionConfig, SyntheticBackend};

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Prompt to use
    #[arg(short, long)]
    prompt: String,

    /// Directory holding the model files
    #[arg(short, long, default_value = imagegen_rs_core::DEFAULT_MODEL_DIR)]
    model_dir: PathBuf,

    /// Number of denoising steps
    #[arg(short, long, default_value_t = 20)]
    num_steps: u32,

    /// Publish a preview every this many steps
    #[arg(long, default_value_t = 5)]
    preview_every: u32,

    /// Generation seed
    #[arg(short, long, default_value_t = 0)]
    seed: i64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let session = GenerationSession::with_config(
        SyntheticBackend::default(),
        SessionConfig {
            prompt: args.prompt,
            step_count: Some(args.num_steps),
            seed: Some(args.seed),
            display_mode: DisplayMode::ShowIterations,
            preview_every: args.preview_every,
            model_dir: args.model_dir.into(),
        },
    )?;

    session.initialize()?.wait()?;

    // Previews are written from a separate thread, the way a UI would consume them.
    let updates = session.subscribe();
    let writer = thread::spawn(move || -> anyhow::Result<()> {
        for state in updates {
            let (Some(progress), Some(image)) = (state.progress, &state.last_image) else {
                continue;
            };
            println!("{}", state.status_message);
            image.save(format!("step_{:04}.png", progress.step))?;
        }
        Ok(())
    });

    session.generate_image()?.wait()?;
    println!(
        "Took: {}ms",
        session.state().generate_duration_ms.unwrap_or_default()
    );

    session.shutdown();
    writer
        .join()
        .map_err(|_| anyhow::anyhow!("preview writer panicked"))??;
    Ok(())
}
