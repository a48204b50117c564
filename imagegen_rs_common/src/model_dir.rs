use std::{
    fmt::{Debug, Display},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Default on-device location of the image generator model files.
pub const DEFAULT_MODEL_DIR: &str = "/data/local/tmp/image_generator/bins/";

/// Directory from which an inference engine loads its model files.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelDir(PathBuf);

impl Display for ModelDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "model dir: {}", self.0.display())
    }
}

impl Debug for ModelDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ModelDir").field(&self.0).finish()
    }
}

impl Default for ModelDir {
    fn default() -> Self {
        Self(PathBuf::from(DEFAULT_MODEL_DIR))
    }
}

impl ModelDir {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Check that the directory exists and is a directory.
    ///
    /// ```rust
    /// use imagegen_rs_common::ModelDir;
    ///
    /// assert!(ModelDir::new(std::env::temp_dir()).ensure_exists().is_ok());
    /// assert!(ModelDir::new("/definitely/not/here").ensure_exists().is_err());
    /// ```
    pub fn ensure_exists(&self) -> anyhow::Result<&Path> {
        let meta = std::fs::metadata(&self.0)
            .map_err(|e| anyhow::anyhow!("cannot open {}: {e}", self.0.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("expected {} to be a directory", self.0.display());
        }
        Ok(&self.0)
    }
}

impl From<&str> for ModelDir {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<PathBuf> for ModelDir {
    fn from(value: PathBuf) -> Self {
        Self(value)
    }
}

impl AsRef<Path> for ModelDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
