//! Configuration bundle for the motion binary.
//!
//! Loads the machine configuration ([`MotionConfig`]) and the job to run,
//! and validates both before anything is started.

use std::path::Path;

use cnc_common::config::{ConfigError, ConfigLoader, MotionConfig};

use crate::job::Job;

// ─── Loaded Config Bundle ───────────────────────────────────────────

/// Validated configuration, ready for runtime use.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub motion: MotionConfig,
    pub job: Job,
}

// ─── Loading Functions ──────────────────────────────────────────────

/// Load and validate the machine configuration and, if given, a job file.
///
/// Without a job file the bundle carries an empty job.
pub fn load_config(config_path: &Path, job_path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let motion = MotionConfig::load(config_path).map_err(|e| with_path(e, config_path))?;
    let job = match job_path {
        Some(path) => Job::load(path).map_err(|e| with_path(e, path))?,
        None => Job::default(),
    };
    validated(motion, job)
}

/// Load config from TOML strings (for testing).
pub fn load_config_from_strings(config_toml: &str, job_toml: &str) -> Result<LoadedConfig, ConfigError> {
    let motion = MotionConfig::from_toml(config_toml)?;
    let job = Job::from_toml(job_toml)?;
    validated(motion, job)
}

fn validated(motion: MotionConfig, job: Job) -> Result<LoadedConfig, ConfigError> {
    motion.validate()?;
    job.validate()?;
    Ok(LoadedConfig { motion, job })
}

fn with_path(e: ConfigError, path: &Path) -> ConfigError {
    match e {
        ConfigError::ParseError(msg) => {
            ConfigError::ParseError(format!("{}: {msg}", path.display()))
        }
        other => other,
    }
}
