// SPDX-License-Identifier: GPL-2.0
//
// cputopo - Runtime Control Interface
//
// A simple file-based interface standing in for the scheduler's policy
// knobs and the per-CPU cpu_power debug files. Users write commands to
// <dir>/control; the daemon re-reads the file whenever it changes.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use crate::policy::PowerSavings;
use crate::tracker::TopologyTracker;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Control file commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Set the multi-core power-saving level
    SetMcPowerSavings(PowerSavings),
    /// Set the multi-thread power-saving level
    SetSmtPowerSavings(PowerSavings),
    /// Override the capacity of one CPU with the raw text written
    SetCpuPower { cpu: usize, value: String },
}

/// Control interface manager
pub struct ControlInterface {
    control_dir: PathBuf,
    control_file: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ControlInterface {
    /// Create a control interface rooted at `control_dir`
    pub fn new(control_dir: &Path) -> Self {
        Self {
            control_dir: control_dir.to_path_buf(),
            control_file: control_dir.join("control"),
            last_modified: None,
        }
    }

    /// Create the control directory and a control file with usage notes
    pub fn init(&mut self) -> Result<()> {
        if !self.control_dir.exists() {
            fs::create_dir_all(&self.control_dir).context("Failed to create control directory")?;
        }

        let usage = r#"# cputopo Runtime Control
# Write commands to this file to change the power-saving policy or
# override CPU capacities.
#
# Commands:
#   sched_mc_power_savings=<0|1|2>   - Multi-core power-saving level
#   sched_smt_power_savings=<0|1|2>  - Multi-thread power-saving level
#   cpu<N>.cpu_power=<value>         - Override capacity of CPU N
#
# Example:
#   echo "sched_mc_power_savings=1" >> /run/cputopo/control
"#;
        fs::write(&self.control_file, usage).context("Failed to create control file")?;
        self.last_modified = fs::metadata(&self.control_file)
            .and_then(|m| m.modified())
            .ok();

        info!("Control interface: {:?}", self.control_file);
        Ok(())
    }

    /// Check for and parse control commands. Returns nothing if the file
    /// did not change since the last poll.
    pub fn poll_commands(&mut self) -> Vec<ControlCommand> {
        let mut commands = Vec::new();

        let metadata = match fs::metadata(&self.control_file) {
            Ok(m) => m,
            Err(_) => return commands,
        };

        let modified = metadata.modified().ok();
        if modified.is_some() && modified == self.last_modified {
            return commands;
        }
        self.last_modified = modified;

        let content = match fs::read_to_string(&self.control_file) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read {:?}: {}", self.control_file, e);
                return commands;
            }
        };

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(cmd) = Self::parse_command(line) {
                debug!("Control command: {:?}", cmd);
                commands.push(cmd);
            }
        }

        commands
    }

    /// Parse a single command line
    fn parse_command(line: &str) -> Option<ControlCommand> {
        let (key, value) = line.split_once('=')?;
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "sched_mc_power_savings" => Self::parse_level(value).map(ControlCommand::SetMcPowerSavings),
            "sched_smt_power_savings" => Self::parse_level(value).map(ControlCommand::SetSmtPowerSavings),
            _ => {
                if let Some(cpu) = key
                    .strip_prefix("cpu")
                    .and_then(|rest| rest.strip_suffix(".cpu_power"))
                    .and_then(|n| n.parse::<usize>().ok())
                {
                    return Some(ControlCommand::SetCpuPower {
                        cpu,
                        value: value.to_string(),
                    });
                }

                warn!("Unknown control command: {}", key);
                None
            }
        }
    }

    fn parse_level(value: &str) -> Option<PowerSavings> {
        match value.parse() {
            Ok(level) => Some(level),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Get the control file path
    pub fn control_path(&self) -> &Path {
        &self.control_file
    }
}

/// Apply control commands to a tracker, then let it react to any policy
/// change. Returns true if the sibling masks were rebuilt.
pub fn apply_commands(tracker: &TopologyTracker, commands: &[ControlCommand]) -> bool {
    for cmd in commands {
        match cmd {
            ControlCommand::SetMcPowerSavings(level) => {
                tracker.policy().set_mc_power_savings(*level);
            }
            ControlCommand::SetSmtPowerSavings(level) => {
                tracker.policy().set_smt_power_savings(*level);
            }
            ControlCommand::SetCpuPower { cpu, value } => {
                match tracker.write_capacity_text(*cpu, value) {
                    Ok(_) => info!("CPU{}: cpu_power set to {}", cpu, value),
                    Err(e) => warn!("CPU{}: cpu_power override rejected: {}", cpu, e),
                }
            }
        }
    }

    tracker.on_policy_maybe_changed()
}
