use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::{ProjectDirs, UserDirs};
use quiltconfig::CONFIG_FILE_NAME;

pub const ENV_CONFIG_DIR: &str = "PIXELQUILT_CONFIG_DIR";
pub const ENV_OUTPUT_DIR: &str = "PIXELQUILT_OUTPUT_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "PixelQuilt";
const APPLICATION: &str = "pixelquilt";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    output_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let config_dir = match env_override(ENV_CONFIG_DIR) {
            Some(dir) => dir,
            None => ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
                .map(|dirs| dirs.config_dir().to_path_buf())
                .ok_or_else(|| anyhow!("failed to determine user config directory"))?,
        };
        let output_dir = env_override(ENV_OUTPUT_DIR).unwrap_or_else(default_output_dir);

        Ok(Self {
            config_dir,
            output_dir,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Where exports go when neither the config nor the CLI names a directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[cfg(test)]
impl AppPaths {
    pub fn from_raw(config_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            config_dir,
            output_dir,
        }
    }
}

fn default_output_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.picture_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}
