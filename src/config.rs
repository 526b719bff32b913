//! Service configuration. Settings are layered: built-in defaults, then an
//! optional TOML file, then `CATDOG_<SECTION>__<KEY>` environment variables.

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Config file read when none is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "catdog.toml";

/// Name of the tracking experiment every classification is logged under
pub const DEFAULT_EXPERIMENT: &str = "cat_dog_classifier";

/// Side length of the square image the model expects
pub const IMAGE_SIZE: u32 = 224;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// `RUST_LOG`-style filter used when the environment sets none
    pub log: String,
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub tracking: TrackingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,

    /// Directory of the bundled UI, served at `/`
    pub ui_dir: PathBuf,

    /// Uploads larger than this are rejected
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    /// Path to the TorchScript classifier
    pub path: PathBuf,

    /// Feed the model NCHW instead of NHWC
    pub channels_first: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingSettings {
    /// Connection string of the run store, e.g. `file:./mlruns`
    pub uri: String,
    pub experiment: String,
}

impl Settings {
    /// Load settings from `file` (missing is fine) and the environment
    pub fn load(file: &str) -> Result<Self> {
        let settings = Config::builder()
            .set_default("log", "catdog=info,actix_web=info")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.ui_dir", "ui")?
            .set_default("server.max_upload_bytes", 10 * 1024 * 1024)?
            .set_default("model.path", "cats_dogs_finetuned_FT.pt")?
            .set_default("model.channels_first", false)?
            .set_default("tracking.uri", "file:./mlruns")?
            .set_default("tracking.experiment", DEFAULT_EXPERIMENT)?
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix("CATDOG").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
