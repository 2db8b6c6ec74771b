//! Pipeline configuration stored in `genesis.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::rules::ArtifactRules;

pub const DEFAULT_CONFIG_FILE: &str = "genesis.toml";

/// Pipeline configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenesisConfig {
    /// Repair cycles allowed before a session fails. Zero disables repair.
    pub retry_bound: u32,

    /// Watchdog deadline for each external call (generation or headless check).
    pub phase_timeout_secs: u64,

    /// Directory that receives one sub-directory per completed session.
    pub output_dir: PathBuf,

    /// Session records kept in memory. The oldest finished sessions are
    /// forgotten once a new session would exceed this.
    pub max_retained_sessions: usize,

    pub generation: GenerationConfig,
    pub validation: ValidationConfig,
    pub artifact: ArtifactRules,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    /// Backend model ids, in fallback order.
    pub backends: Vec<String>,
    /// Calls per backend before moving to the next one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            backends: vec![
                "claude-opus-4-20250514".to_string(),
                "claude-sonnet-4-20250514".to_string(),
            ],
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 16_000,
            max_tokens: 8000,
            request_timeout_secs: 120,
        }
    }
}

impl GenerationConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Run the dynamic tier at all.
    pub dynamic: bool,
    /// Time the page is left running before diagnostics are collected.
    pub settle_ms: u64,
    /// Headless driver command (e.g. `["node","driver.js"]`). Empty means absent.
    pub headless_command: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            dynamic: true,
            settle_ms: 2000,
            headless_command: Vec::new(),
        }
    }
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            retry_bound: 3,
            phase_timeout_secs: 180,
            output_dir: PathBuf::from("generated"),
            max_retained_sessions: 50,
            generation: GenerationConfig::default(),
            validation: ValidationConfig::default(),
            artifact: ArtifactRules::default(),
        }
    }
}

impl GenesisConfig {
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.phase_timeout_secs == 0 {
            return Err(anyhow!("phase_timeout_secs must be > 0"));
        }
        if self.max_retained_sessions == 0 {
            return Err(anyhow!("max_retained_sessions must be > 0"));
        }
        let generation = &self.generation;
        if generation.backends.is_empty() {
            return Err(anyhow!("generation.backends must be a non-empty array"));
        }
        if generation.backends.iter().any(|id| id.trim().is_empty()) {
            return Err(anyhow!(
                "generation.backends must not contain blank entries"
            ));
        }
        if generation.max_attempts == 0 {
            return Err(anyhow!("generation.max_attempts must be > 0"));
        }
        if generation.initial_backoff_ms > generation.max_backoff_ms {
            return Err(anyhow!(
                "generation.initial_backoff_ms must be <= generation.max_backoff_ms"
            ));
        }
        if generation.max_tokens == 0 {
            return Err(anyhow!("generation.max_tokens must be > 0"));
        }
        if generation.request_timeout_secs == 0 {
            return Err(anyhow!("generation.request_timeout_secs must be > 0"));
        }
        if self.validation.settle_ms == 0 {
            return Err(anyhow!("validation.settle_ms must be > 0"));
        }
        if self
            .validation
            .headless_command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(anyhow!(
                "validation.headless_command must start with a program"
            ));
        }
        let artifact = &self.artifact;
        if artifact.min_length == 0 {
            return Err(anyhow!("artifact.min_length must be > 0"));
        }
        if artifact.start_markers.is_empty() {
            return Err(anyhow!("artifact.start_markers must be a non-empty array"));
        }
        if artifact.end_marker.trim().is_empty() {
            return Err(anyhow!("artifact.end_marker must not be blank"));
        }
        if artifact.library_markers.is_empty() {
            return Err(anyhow!(
                "artifact.library_markers must be a non-empty array"
            ));
        }
        if artifact.entry_points.is_empty() {
            return Err(anyhow!("artifact.entry_points must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GenesisConfig::default()`.
pub fn load_config(path: &Path) -> Result<GenesisConfig> {
    if !path.exists() {
        let cfg = GenesisConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GenesisConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GenesisConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
