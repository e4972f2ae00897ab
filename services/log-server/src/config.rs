//! Application configuration (TOML, optional file, sensible defaults).
//!
//! Mirrors the two-pass `Raw*Config`-then-defaults pattern `forwarder`'s
//! `config.rs` uses: every field is optional in the TOML and gets a concrete
//! default applied here, rather than failing on a missing file.

use log_model::Severity;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Seed for the process-wide RNG; `None` means draw from entropy.
    pub random_seed: Option<u64>,
    pub severity_threshold: Severity,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            random_seed: None,
            severity_threshold: Severity::Info,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    application: Option<RawApplicationConfig>,
    log: Option<RawLogConfig>,
}

#[derive(Debug, Deserialize)]
struct RawApplicationConfig {
    random: Option<RawRandomConfig>,
}

#[derive(Debug, Deserialize)]
struct RawRandomConfig {
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawLogConfig {
    severity_threshold: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Loads from `path` if given, else falls back to all defaults — a missing
/// config file is not an error for this service (unlike `forwarder`, which
/// requires one; `log_server` is meant to run with zero configuration).
pub fn load(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(ServerConfig::default());
    };
    let toml_str = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ServerConfig::default()),
        Err(e) => return Err(ConfigError::Io(format!("reading '{}': {e}", path.display()))),
    };
    load_from_str(&toml_str)
}

fn load_from_str(toml_str: &str) -> Result<ServerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let random_seed = raw
        .application
        .and_then(|a| a.random)
        .and_then(|r| r.seed)
        .filter(|&seed| seed != 0);

    let severity_threshold = match raw.log.and_then(|l| l.severity_threshold) {
        Some(name) => Severity::from_name(&name)
            .ok_or_else(|| ConfigError::InvalidValue(format!("unknown severity '{name}'")))?,
        None => Severity::Info,
    };

    Ok(ServerConfig {
        random_seed,
        severity_threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_all_defaults() {
        let cfg = load_from_str("").unwrap();
        assert_eq!(cfg.random_seed, None);
        assert_eq!(cfg.severity_threshold, Severity::Info);
    }

    #[test]
    fn zero_seed_means_entropy_not_a_literal_zero() {
        let cfg = load_from_str("[application.random]\nseed = 0\n").unwrap();
        assert_eq!(cfg.random_seed, None);
    }

    #[test]
    fn nonzero_seed_and_severity_are_read_through() {
        let cfg = load_from_str(
            "[application.random]\nseed = 42\n[log]\nseverity_threshold = \"warning\"\n",
        )
        .unwrap();
        assert_eq!(cfg.random_seed, Some(42));
        assert_eq!(cfg.severity_threshold, Severity::Warning);
    }

    #[test]
    fn unknown_severity_name_is_rejected() {
        let err = load_from_str("[log]\nseverity_threshold = \"urgent\"\n");
        assert!(err.is_err());
    }
}
