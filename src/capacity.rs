// SPDX-License-Identifier: GPL-2.0
//
// cputopo - CPU capacity scaling
//
// On a heterogeneous system cores don't have the same compute capacity.
// Each CPU carries a capacity value (baseline SCHED_POWER_SCALE) that the
// load balancer reads to weigh CPUs against each other. At boot the
// capacity of every described CPU is computed from its clock frequency and
// model efficiency, then scaled so that an 'average' CPU lands close to the
// baseline while no CPU exceeds 3/2 of it.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use crate::efficiency::EfficiencyTable;
use crate::error::{TopologyError, TopologyResult};
use crate::provider::{HardwareProvider, PROP_CLOCK_FREQUENCY, PROP_REG};
use log::{debug, error, info};
use std::sync::atomic::{AtomicU64, Ordering};

pub const SCHED_POWER_SHIFT: u32 = 10;

/// Capacity of a CPU with no specific description ("full scale")
pub const SCHED_POWER_SCALE: u64 = 1 << SCHED_POWER_SHIFT;

/// Upper bound of any scaled capacity
pub const MAX_CPU_CAPACITY: u64 = 3 * SCHED_POWER_SCALE / 2;

/// Longest accepted capacity override input, terminator excluded
pub const MAX_OVERRIDE_INPUT: usize = 127;

/// Raw capacity of one described CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuCapacityEntry {
    pub hardware_id: u32,
    pub capacity: u64,
}

/// Normalization factor for a min/max capacity spread, or None when all
/// CPUs have the same capacity and no scaling is needed.
pub fn middle_capacity(min_capacity: u64, max_capacity: u64) -> Option<u64> {
    if min_capacity == max_capacity {
        return None;
    }

    let middle = if 4 * max_capacity < 3 * (max_capacity + min_capacity) {
        (min_capacity + max_capacity) >> (SCHED_POWER_SHIFT + 1)
    } else {
        ((max_capacity / 3) >> (SCHED_POWER_SHIFT - 1)) + 1
    };

    Some(middle.max(1))
}

/// Capacities resolved from the hardware description at boot, kept
/// read-only afterwards for CPUs that come online later.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityTable {
    entries: Vec<CpuCapacityEntry>,
    middle_capacity: Option<u64>,
}

impl CapacityTable {
    /// A table that leaves every CPU at baseline capacity
    pub fn empty() -> Self {
        Self::default()
    }

    /// Walk every CPU node, compute its raw capacity and the middle
    /// capacity of the system. At most `nr_possible` entries are kept.
    pub fn resolve_all<P>(provider: &P, efficiencies: &EfficiencyTable, nr_possible: usize) -> Self
    where
        P: HardwareProvider + ?Sized,
    {
        let mut entries = Vec::new();
        if let Err(e) = entries.try_reserve_exact(nr_possible) {
            error!("Failed to allocate capacity table for {} CPUs: {}", nr_possible, e);
            return Self::empty();
        }

        let mut min_capacity = u64::MAX;
        let mut max_capacity = 0;

        for node in provider.cpu_nodes() {
            if entries.len() >= nr_possible {
                break;
            }

            let Some(efficiency) = efficiencies.lookup(&node) else {
                debug!("{}: no efficiency entry for {:?}", node.full_name, node.compatible);
                continue;
            };

            let Some(rate) = node.property_u32(PROP_CLOCK_FREQUENCY) else {
                error!("{} missing clock-frequency property", node.full_name);
                continue;
            };

            let Some(hardware_id) = node.property_u32(PROP_REG) else {
                error!("{} missing reg property", node.full_name);
                continue;
            };

            let capacity = u64::from(rate >> 20) * efficiency;

            min_capacity = min_capacity.min(capacity);
            max_capacity = max_capacity.max(capacity);

            debug!(
                "{}: hwid {:#x}, {} MHz-ish x {} = capacity {}",
                node.full_name,
                hardware_id,
                rate >> 20,
                efficiency,
                capacity
            );

            entries.push(CpuCapacityEntry {
                hardware_id,
                capacity,
            });
        }

        if entries.is_empty() {
            return Self::empty();
        }

        let middle_capacity = middle_capacity(min_capacity, max_capacity);
        match middle_capacity {
            Some(middle) => info!(
                "CPU capacity: min {}, max {}, middle {}",
                min_capacity, max_capacity, middle
            ),
            None => debug!("Homogeneous CPU capacity {}, no scaling", max_capacity),
        }

        Self {
            entries,
            middle_capacity,
        }
    }

    pub fn entries(&self) -> &[CpuCapacityEntry] {
        &self.entries
    }

    pub fn middle_capacity(&self) -> Option<u64> {
        self.middle_capacity
    }

    /// Scaled capacity for a hardware id, or None if the CPU keeps the
    /// baseline (homogeneous system, empty table or unknown id).
    pub fn scaled_capacity(&self, hardware_id: u32) -> Option<u64> {
        let middle = self.middle_capacity?;
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.hardware_id == hardware_id)?;

        Some((entry.capacity / middle).clamp(1, MAX_CPU_CAPACITY))
    }

    /// Look up the capacity of a CPU that is coming online and store it.
    /// Returns the stored value, or None if the CPU stays at baseline.
    pub fn apply(
        &self,
        store: &CapacityStore,
        cpu: usize,
        hardware_id: u32,
    ) -> TopologyResult<Option<u64>> {
        let Some(capacity) = self.scaled_capacity(hardware_id) else {
            return Ok(None);
        };

        store.set(cpu, capacity)?;
        info!("CPU{}: update cpu_power {}", cpu, capacity);
        Ok(Some(capacity))
    }
}

/// Per-CPU capacity values. Every slot is a single word so readers never
/// observe a partially written value.
#[derive(Debug)]
pub struct CapacityStore {
    scale: Vec<AtomicU64>,
}

impl CapacityStore {
    /// All CPUs start at SCHED_POWER_SCALE
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            scale: (0..nr_cpus)
                .map(|_| AtomicU64::new(SCHED_POWER_SCALE))
                .collect(),
        }
    }

    fn slot(&self, cpu: usize) -> TopologyResult<&AtomicU64> {
        self.scale.get(cpu).ok_or(TopologyError::InvalidCpu {
            cpu,
            nr_cpus: self.scale.len(),
        })
    }

    pub fn get(&self, cpu: usize) -> TopologyResult<u64> {
        Ok(self.slot(cpu)?.load(Ordering::Relaxed))
    }

    pub fn set(&self, cpu: usize, capacity: u64) -> TopologyResult<()> {
        self.slot(cpu)?.store(capacity, Ordering::Relaxed);
        Ok(())
    }

    /// Render the capacity of a CPU the way the override file shows it
    pub fn read_text(&self, cpu: usize) -> TopologyResult<String> {
        Ok(format!("{}\n", self.get(cpu)?))
    }

    /// Parse a decimal capacity override and store it. Returns the number of
    /// bytes consumed. Unparseable or out of range values leave the previous
    /// capacity in place.
    pub fn write_text(&self, cpu: usize, input: &str) -> TopologyResult<usize> {
        self.slot(cpu)?;

        if input.len() >= MAX_OVERRIDE_INPUT {
            return Err(TopologyError::InputTooLong { len: input.len() });
        }

        let value = input
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|v| (1..=MAX_CPU_CAPACITY).contains(v))
            .ok_or_else(|| TopologyError::InvalidCapacity {
                input: input.trim().to_string(),
            })?;

        self.set(cpu, value)?;
        debug!("CPU{}: cpu_power override {}", cpu, value);
        Ok(input.len())
    }
}
