//! Configuration loader for YAML files and environment overrides

use crate::config::types::*;
use crate::errors::ConfigError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "quirk.yaml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the configuration for a server or CLI run.
    ///
    /// An explicit path must exist. Without one, `quirk.yaml` is used when
    /// present and built-in defaults otherwise. Environment overrides are
    /// applied last, then the result is validated.
    pub async fn load(path: Option<&Path>) -> Result<QuirkConfig, ConfigError> {
        let mut config = match path {
            Some(path) => Self::parse_file(path).await?,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::parse_file(&default_path).await?
                } else {
                    log::info!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                    QuirkConfig::default()
                }
            }
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file without environment overrides
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<QuirkConfig, ConfigError> {
        let config = Self::parse_file(path.as_ref()).await?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string without environment overrides
    pub fn from_str(content: &str) -> Result<QuirkConfig, ConfigError> {
        let config = Self::parse_str(content)?;
        config.validate()?;
        Ok(config)
    }

    async fn parse_file(path: &Path) -> Result<QuirkConfig, ConfigError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        log::info!("Loaded configuration from {}", path.display());
        Self::parse_str(&content)
    }

    fn parse_str(content: &str) -> Result<QuirkConfig, ConfigError> {
        // serde_yaml rejects an empty document, treat it as "all defaults"
        if content.trim().is_empty() {
            return Ok(QuirkConfig::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `QUIRK_*` environment variables and the baseline `PORT` variable
    pub fn apply_env_overrides(config: &mut QuirkConfig) -> Result<(), ConfigError> {
        let runner = &mut config.runner;

        if let Ok(program) = env::var("QUIRK_INTERPRETER") {
            runner.interpreter.program = program;
        }
        if let Ok(dir) = env::var("QUIRK_WORKING_DIR") {
            runner.interpreter.working_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = env::var("QUIRK_SCRATCH_DIR") {
            runner.workspace.scratch_dir = Some(PathBuf::from(dir));
        }
        if let Some(deadline) = parse_env::<u64>("QUIRK_DEADLINE_MS")? {
            runner.limits.deadline_ms = deadline;
        }
        if let Some(max) = parse_env::<usize>("QUIRK_MAX_CONCURRENT")? {
            runner.admission.max_concurrent = max;
        }
        if let Some(depth) = parse_env::<usize>("QUIRK_MAX_QUEUE_DEPTH")? {
            runner.admission.max_queue_depth = depth;
        }
        if let Some(policy) = parse_env::<OverloadPolicy>("QUIRK_OVERLOAD_POLICY")? {
            runner.admission.overload_policy = policy;
        }
        if let Some(port) = parse_env::<u16>("PORT")? {
            let host = config
                .server
                .bind_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            config.server.bind_addr = format!("{}:{}", host, port);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
