mod error;
mod image_util;
mod model_dir;

pub use error::{Result, SessionError};
pub use image_util::{placeholder_image, PLACEHOLDER_HEIGHT, PLACEHOLDER_WIDTH};
pub use model_dir::{ModelDir, DEFAULT_MODEL_DIR};
