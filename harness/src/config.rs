//! Harness configuration, loaded from YAML or JSON.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use gauntlet_common::ledger::LedgerConfig;
use serde::{Deserialize, Serialize};

use crate::runner::RunLimits;

fn default_max_steps() -> usize {
    256
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_op_budget() -> u64 {
    100_000
}

fn default_max_call_depth() -> usize {
    64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Ceiling on exploit steps per run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Wall-clock ceiling per exploit run, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Ledger operations an exploit run may meter
    #[serde(default = "default_op_budget")]
    pub op_budget: u64,

    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,

    /// Run scenarios concurrently, each in its own namespace
    #[serde(default)]
    pub parallel: bool,

    /// Scenario names to run; empty runs everything
    #[serde(default)]
    pub scenarios: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            timeout_ms: default_timeout_ms(),
            op_budget: default_op_budget(),
            max_call_depth: default_max_call_depth(),
            parallel: false,
            scenarios: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Load from `path`; the format follows the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config: HarnessConfig = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            other => bail!("Unsupported config format '{}': {}", other, path.display()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            bail!("max_steps must be greater than zero");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.op_budget == 0 {
            bail!("op_budget must be greater than zero");
        }
        if self.max_call_depth == 0 {
            bail!("max_call_depth must be greater than zero");
        }
        Ok(())
    }

    pub fn limits(&self) -> RunLimits {
        RunLimits {
            max_steps: self.max_steps,
            timeout: Duration::from_millis(self.timeout_ms),
            op_budget: Some(self.op_budget),
        }
    }

    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            max_call_depth: self.max_call_depth,
            ..LedgerConfig::default()
        }
    }

    /// Whether `name` passes the scenario filter
    pub fn selects(&self, name: &str) -> bool {
        self.scenarios.is_empty() || self.scenarios.iter().any(|wanted| wanted == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "max_steps: 12\nparallel: true\nscenarios: [truster]").unwrap();

        let config = HarnessConfig::load(file.path()).unwrap();
        assert_eq!(config.max_steps, 12);
        assert!(config.parallel);
        assert_eq!(config.timeout_ms, 10_000);
        assert!(config.selects("truster"));
        assert!(!config.selects("selfie"));
        assert_eq!(config.limits().timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_json_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, r#"{{"op_budget": 50, "max_call_depth": 8}}"#).unwrap();

        let config = HarnessConfig::load(file.path()).unwrap();
        assert_eq!(config.limits().op_budget, Some(50));
        assert_eq!(config.ledger().max_call_depth, 8);
        assert!(config.selects("anything"));
    }

    #[test]
    fn test_rejects_zero_ceiling() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "timeout_ms: 0").unwrap();
        let err = HarnessConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(HarnessConfig::load(file.path()).is_err());
    }
}
