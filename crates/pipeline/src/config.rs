//! Pipeline configuration: `strata.toml` plus environment overrides.
//!
//! Credentials and the pseudonymization salt come from the environment
//! only (`ANTHROPIC_API_KEY`, `STRATA_SALT`); they have no file form
//! and are never written into artifacts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use strata_govern::GovernanceConfig;

use crate::error::PipelineError;

pub const DEFAULT_CONFIG_PATH: &str = "strata.toml";

/// File shape of `strata.toml`. Every section and field is optional;
/// omissions fall back to the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    pipeline: PipelineSection,
    sandbox: SandboxSection,
    generation: GenerationSection,
    governance: GovernanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PipelineSection {
    artifacts: PathBuf,
    source_crm: PathBuf,
    source_erp: PathBuf,
    retry_ceiling: u32,
}

impl Default for PipelineSection {
    fn default() -> PipelineSection {
        PipelineSection {
            artifacts: PathBuf::from("artifacts"),
            source_crm: PathBuf::from("data/crm"),
            source_erp: PathBuf::from("data/erp"),
            retry_ceiling: strata_engine::DEFAULT_RETRY_CEILING,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SandboxSection {
    timeout_secs: u64,
    max_cells: u64,
}

impl Default for SandboxSection {
    fn default() -> SandboxSection {
        SandboxSection {
            timeout_secs: 30,
            max_cells: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GenerationSection {
    model: Option<String>,
}

/// Fully resolved configuration the orchestrator runs with.
#[derive(Debug, Clone)]
pub struct Config {
    pub artifacts: PathBuf,
    pub source_crm: PathBuf,
    pub source_erp: PathBuf,
    pub retry_ceiling: u32,
    pub exec_timeout: Duration,
    pub exec_max_cells: u64,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub salt: Option<String>,
    pub governance: GovernanceConfig,
}

impl Config {
    /// Load from a config file and overlay the environment.
    ///
    /// An explicitly named file must exist; the default path is
    /// optional and silently falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Config, PipelineError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let file: FileConfig = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw).map_err(|e| {
                PipelineError::precondition(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                FileConfig::default()
            }
            Err(e) => {
                return Err(PipelineError::precondition(format!(
                    "cannot read config {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let mut config = Config {
            artifacts: file.pipeline.artifacts,
            source_crm: file.pipeline.source_crm,
            source_erp: file.pipeline.source_erp,
            retry_ceiling: file.pipeline.retry_ceiling,
            exec_timeout: Duration::from_secs(file.sandbox.timeout_secs),
            exec_max_cells: file.sandbox.max_cells,
            model: file.generation.model,
            api_key: None,
            salt: None,
            governance: file.governance,
        };
        config.overlay_env();
        Ok(config)
    }

    fn overlay_env(&mut self) {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(salt) = std::env::var("STRATA_SALT") {
            if !salt.is_empty() {
                self.salt = Some(salt);
            }
        }
        if let Ok(model) = std::env::var("STRATA_MODEL") {
            if !model.is_empty() {
                self.model = Some(model);
            }
        }
        if let Some(v) = env_parse::<u32>("STRATA_RETRY_CEILING") {
            self.retry_ceiling = v;
        }
        if let Some(v) = env_parse::<u64>("STRATA_EXEC_TIMEOUT_SECS") {
            self.exec_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("STRATA_EXEC_MAX_CELLS") {
            self.exec_max_cells = v;
        }
    }

    pub fn engine_config(&self) -> strata_engine::EngineConfig {
        strata_engine::EngineConfig {
            retry_ceiling: self.retry_ceiling,
            limits: strata_engine::ExecLimits {
                timeout: self.exec_timeout,
                max_cells: self.exec_max_cells,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}
