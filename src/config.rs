//! `ecobench.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{EcoResult, PowerModel, Toolchain};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Base directory for the measurement store.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Default maximum number of trials actually executed per request.
    #[serde(default = "default_scale_threshold")]
    pub scale_threshold: u64,

    /// Per-trial timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub sampler: SamplerConfig,

    #[serde(default)]
    pub toolchain: Toolchain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SamplerConfig {
    /// When false, every measurement reports zero emission.
    #[serde(default = "default_sampler_enabled")]
    pub enabled: bool,

    #[serde(flatten)]
    pub model: PowerModel,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".ecobench")
}

fn default_scale_threshold() -> u64 {
    10_000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_sampler_enabled() -> bool {
    true
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: default_sampler_enabled(),
            model: PowerModel::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            scale_threshold: default_scale_threshold(),
            timeout_secs: default_timeout_secs(),
            sampler: SamplerConfig::default(),
            toolchain: Toolchain::default(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match Self::parse(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(s: &str) -> EcoResult<Self> {
        Ok(toml::from_str::<Config>(s)?)
    }

    pub fn store_path(&self) -> PathBuf {
        self.base_dir.join("records.jsonl")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
