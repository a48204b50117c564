use std::path::PathBuf;

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
            display_mode: DisplayMode::FinalOnly,
            model_dir: args.model_dir.into(),
            ..Default::default()
        },
    )?;

    session.initialize()?.wait()?;
    session.generate_image()?.wait()?;

    let state = session.state();
    println!(
        "Took: {}ms (initialization {}ms)",
        state.generate_duration_ms.unwrap_or_default(),
        state.initialize_duration_ms.unwrap_or_default()
    );
    if let Some(image) = &state.last_image {
        image.save("image.png")?;
    }

    session.shutdown();
    Ok(())
}
