// SPDX-License-Identifier: GPL-2.0
//
// cputopo - Hardware description provider
//
// The capacity resolver consumes CPU nodes from a hardware description
// (device-tree style): a list of compatible strings plus raw property cells.
// MachineDescription is a TOML-backed provider used by the CLI and tests.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const PROP_CLOCK_FREQUENCY: &str = "clock-frequency";
pub const PROP_REG: &str = "reg";

/// A CPU node of the hardware description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuNode {
    pub full_name: String,
    pub compatible: Vec<String>,
    properties: BTreeMap<String, Vec<u8>>,
}

impl CpuNode {
    pub fn new(full_name: &str, compatible: Vec<String>) -> Self {
        Self {
            full_name: full_name.to_string(),
            compatible,
            properties: BTreeMap::new(),
        }
    }

    /// Attach a raw property value
    pub fn with_property(mut self, name: &str, value: Vec<u8>) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    /// Attach a single big-endian 32-bit cell
    pub fn with_u32(self, name: &str, value: u32) -> Self {
        self.with_property(name, value.to_be_bytes().to_vec())
    }

    pub fn property(&self, name: &str) -> Option<&[u8]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    /// Read a property holding exactly one big-endian 32-bit cell.
    /// Missing properties and any other length yield None.
    pub fn property_u32(&self, name: &str) -> Option<u32> {
        let raw: [u8; 4] = self.property(name)?.try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }

    pub fn is_compatible(&self, compatible: &str) -> bool {
        self.compatible.iter().any(|c| c == compatible)
    }
}

/// Source of CPU nodes, in hardware description order
pub trait HardwareProvider {
    fn cpu_nodes(&self) -> Vec<CpuNode>;
}

impl HardwareProvider for [CpuNode] {
    fn cpu_nodes(&self) -> Vec<CpuNode> {
        self.to_vec()
    }
}

impl HardwareProvider for Vec<CpuNode> {
    fn cpu_nodes(&self) -> Vec<CpuNode> {
        self.clone()
    }
}

/// One `[[cpu]]` entry of a machine description file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CpuDescription {
    /// Node name, e.g. "cpu@0"
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub compatible: Vec<String>,

    /// Clock frequency in Hz. Values wider than 32 bits produce a
    /// malformed (8 byte) property.
    #[serde(default)]
    pub clock_frequency: Option<u64>,

    /// Hardware id cell
    #[serde(default)]
    pub reg: Option<u32>,

    /// Affinity register value the CPU reports when it comes online
    #[serde(default)]
    pub mpidr: Option<u32>,

    /// Main id register value the CPU reports when it comes online
    #[serde(default)]
    pub midr: Option<u32>,
}

impl CpuDescription {
    fn to_node(&self, index: usize) -> CpuNode {
        let name = if self.name.is_empty() {
            format!("/cpus/cpu@{}", index)
        } else {
            format!("/cpus/{}", self.name)
        };

        let mut node = CpuNode::new(&name, self.compatible.clone());

        if let Some(freq) = self.clock_frequency {
            node = match u32::try_from(freq) {
                Ok(freq) => node.with_u32(PROP_CLOCK_FREQUENCY, freq),
                Err(_) => node.with_property(PROP_CLOCK_FREQUENCY, freq.to_be_bytes().to_vec()),
            };
        }

        if let Some(reg) = self.reg {
            node = node.with_u32(PROP_REG, reg);
        }

        node
    }
}

/// Per-CPU register values reported when a CPU boots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    pub cpu: usize,
    pub mpidr: u32,
    pub midr: u32,
}

/// TOML machine description
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MachineDescription {
    /// Number of possible CPUs (defaults to the number of cpu entries)
    #[serde(default)]
    pub possible_cpus: Option<usize>,

    #[serde(default)]
    pub cpu: Vec<CpuDescription>,
}

impl MachineDescription {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read machine description: {:?}", path))?;

        let machine = Self::parse(&content)
            .with_context(|| format!("Failed to parse machine description: {:?}", path))?;

        info!(
            "Loaded machine description from {:?} ({} CPU nodes, {} possible CPUs)",
            path,
            machine.cpu.len(),
            machine.nr_possible_cpus()
        );

        Ok(machine)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let machine: MachineDescription = toml::from_str(content)?;

        if machine.nr_possible_cpus() == 0 {
            bail!("machine description has no possible CPUs");
        }

        debug!("Machine: {:?}", machine);
        Ok(machine)
    }

    pub fn nr_possible_cpus(&self) -> usize {
        self.possible_cpus.unwrap_or(self.cpu.len())
    }

    /// Boot order: one record per described CPU that fits in the possible
    /// CPU range. Logical CPU id is the description index.
    pub fn boot_records(&self) -> Vec<BootRecord> {
        self.cpu
            .iter()
            .enumerate()
            .take(self.nr_possible_cpus())
            .map(|(cpu, desc)| BootRecord {
                cpu,
                mpidr: desc.mpidr.unwrap_or(0),
                midr: desc.midr.unwrap_or(0),
            })
            .collect()
    }
}

impl HardwareProvider for MachineDescription {
    fn cpu_nodes(&self) -> Vec<CpuNode> {
        self.cpu
            .iter()
            .enumerate()
            .map(|(index, desc)| desc.to_node(index))
            .collect()
    }
}
