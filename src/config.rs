// SPDX-License-Identifier: GPL-2.0
//
// cputopo - Configuration Management
//
// Loads tracker configuration from TOML files.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use crate::efficiency::{CpuEfficiency, EfficiencyTable};
use crate::policy::PowerSavings;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TopoConfig {
    /// Initial power-saving policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Capacity resolution settings
    #[serde(default)]
    pub capacity: CapacityConfig,

    /// Runtime control file settings
    #[serde(default)]
    pub control: ControlConfig,
}

/// Power-saving levels applied at startup
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub sched_mc_power_savings: PowerSavings,

    #[serde(default)]
    pub sched_smt_power_savings: PowerSavings,
}

/// Capacity resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Resolve per-CPU capacities from the machine description
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extra efficiency rows, consulted after the built-in ones
    #[serde(default)]
    pub efficiency: Vec<CpuEfficiency>,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            efficiency: Vec::new(),
        }
    }
}

impl CapacityConfig {
    pub fn efficiency_table(&self) -> EfficiencyTable {
        EfficiencyTable::with_extra(self.efficiency.iter().cloned())
    }
}

/// Runtime control file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Directory holding the control file
    #[serde(default = "default_control_dir")]
    pub dir: PathBuf,

    /// Fallback poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            dir: default_control_dir(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_control_dir() -> PathBuf {
    PathBuf::from("/run/cputopo")
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Standard config file locations (in priority order)
const CONFIG_PATHS: &[&str] = &[
    "/etc/cputopo/config.toml",
    "~/.config/cputopo/config.toml",
];

impl TopoConfig {
    /// Load configuration from standard paths
    pub fn load() -> Result<Self> {
        for path in CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());

            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: TopoConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        info!("Loaded config from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TopoConfig::default();
        assert_eq!(config.policy.sched_mc_power_savings, PowerSavings::None);
        assert_eq!(config.policy.sched_smt_power_savings, PowerSavings::None);
        assert!(config.capacity.enabled);
        assert_eq!(config.control.dir, PathBuf::from("/run/cputopo"));
        assert_eq!(config.control.poll_interval_ms, 500);
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[policy]
sched_mc_power_savings = "basic"

[capacity]
enabled = false

[[capacity.efficiency]]
compatible = "arm,cortex-a9"
efficiency = 2560

[control]
dir = "/tmp/cputopo"
"#;
        let config: TopoConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.policy.sched_mc_power_savings, PowerSavings::Basic);
        assert_eq!(config.policy.sched_smt_power_savings, PowerSavings::None);
        assert!(!config.capacity.enabled);
        assert_eq!(config.capacity.efficiency_table().entries().len(), 3);
        assert_eq!(config.control.dir, PathBuf::from("/tmp/cputopo"));
        assert_eq!(config.control.poll_interval_ms, 500);
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[policy]\nsched_smt_power_savings = \"wakeup\"\n").unwrap();

        let config = TopoConfig::load_from_path(&path).unwrap();
        assert_eq!(config.policy.sched_smt_power_savings, PowerSavings::Wakeup);

        assert!(TopoConfig::load_from_path(&dir.path().join("missing.toml")).is_err());
    }
}
