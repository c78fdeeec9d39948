use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// What the CPU does when it fetches an opcode outside the official set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Log, treat as a one-byte no-op costing two cycles, and continue.
    #[default]
    Skip,
    /// Stop and report the opcode and its address.
    Halt,
}

impl DecodePolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "skip" => Some(Self::Skip),
            "halt" | "strict" => Some(Self::Halt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub decode_policy: DecodePolicy,
    /// Default `tracing` filter directive; `RUST_LOG` wins when set.
    pub log_filter: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            decode_policy: DecodePolicy::Skip,
            log_filter: "info".to_string(),
        }
    }
}

impl EmulatorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse emulator config JSON")
    }
}

/// Installs the global fmt subscriber used by the binaries.
pub fn init_logging(config: &EmulatorConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .with_context(|| format!("invalid log filter: {}", config.log_filter))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install log subscriber: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = EmulatorConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EmulatorConfig::default());

        let config = EmulatorConfig::from_json_str(r#"{ "decode_policy": "halt" }"#).unwrap();
        assert_eq!(config.decode_policy, DecodePolicy::Halt);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(EmulatorConfig::from_json_str(r#"{ "decode_policy": "panic" }"#).is_err());
    }

    #[test]
    fn serializes_policy_in_snake_case() {
        let config = EmulatorConfig {
            decode_policy: DecodePolicy::Halt,
            log_filter: "famistep=debug".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"decode_policy":"halt","log_filter":"famistep=debug"}"#);
    }

    #[test]
    fn policy_names() {
        assert_eq!(DecodePolicy::from_name("SKIP"), Some(DecodePolicy::Skip));
        assert_eq!(DecodePolicy::from_name("strict"), Some(DecodePolicy::Halt));
        assert_eq!(DecodePolicy::from_name("ignore"), None);
    }
}
