// SPDX-License-Identifier: GPL-2.0
//
// cputopo - CPU Topology Table
//
// Per-CPU position in the socket/core/thread hierarchy, decoded from the
// multiprocessor affinity register (MPIDR) when each CPU comes online, plus
// the core and thread sibling masks the load balancer reads.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use crate::cpumask::Cpumask;
use crate::error::{TopologyError, TopologyResult};
use crate::siblings::SiblingMasks;
use arc_swap::ArcSwap;
use log::info;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Multiprocessor format and multiprocessor mode fields
pub const MPIDR_SMP_BITMASK: u32 = 0x3 << 30;
pub const MPIDR_SMP_VALUE: u32 = 0x2 << 30;

/// Cores are multi-threaded (affinity level 0 is a thread)
pub const MPIDR_MT_BITMASK: u32 = 0x1 << 24;

/// Affinity bits that identify a CPU in the hardware description
pub const MPIDR_HWID_BITMASK: u32 = 0x00ff_ffff;

const MPIDR_LEVEL_BITS: u32 = 8;
const MPIDR_LEVEL_MASK: u32 = (1 << MPIDR_LEVEL_BITS) - 1;

/// Main id bits that identify a CPU family (implementation revision dropped)
pub const ARM_FAMILY_MASK: u32 = 0xFF0F_FFF0;

/// Dual-core Cortex-A9 MPCore family
pub const ARM_CORTEX_A9_FAMILY: u32 = 0x410F_C090;

/// Extract one affinity level of an MPIDR value
pub fn mpidr_affinity_level(mpidr: u32, level: u32) -> u32 {
    (mpidr >> (MPIDR_LEVEL_BITS * level)) & MPIDR_LEVEL_MASK
}

/// How sibling masks are built for a CPU when power saving is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Group strictly by socket and core id
    Default,
    /// Split a package into two virtual packages of even and odd CPUs so
    /// power-saving balancing can gather tasks on one and idle the other
    PairedPackage,
}

impl MaskStrategy {
    pub fn for_family(family_id: u32) -> Self {
        match family_id {
            ARM_CORTEX_A9_FAMILY => MaskStrategy::PairedPackage,
            _ => MaskStrategy::Default,
        }
    }
}

/// Hierarchical position of a discovered CPU. Never changes once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuIdentity {
    pub family_id: u32,
    /// None on cores without hardware threads
    pub thread_id: Option<u32>,
    pub core_id: u32,
    /// None on uniprocessor systems
    pub socket_id: Option<u32>,
    pub strategy: MaskStrategy,
}

impl CpuIdentity {
    /// Decode the affinity register and main id register of a CPU
    pub fn decode(mpidr: u32, midr: u32) -> Self {
        let family_id = midr & ARM_FAMILY_MASK;

        let (thread_id, core_id, socket_id) = if (mpidr & MPIDR_SMP_BITMASK) == MPIDR_SMP_VALUE {
            if mpidr & MPIDR_MT_BITMASK != 0 {
                // core performance interdependency
                (
                    Some(mpidr_affinity_level(mpidr, 0)),
                    mpidr_affinity_level(mpidr, 1),
                    Some(mpidr_affinity_level(mpidr, 2)),
                )
            } else {
                // largely independent cores
                (
                    None,
                    mpidr_affinity_level(mpidr, 0),
                    Some(mpidr_affinity_level(mpidr, 1)),
                )
            }
        } else {
            // uniprocessor, or the legacy uniprocessor format
            (None, 0, None)
        };

        Self {
            family_id,
            thread_id,
            core_id,
            socket_id,
            strategy: MaskStrategy::for_family(family_id),
        }
    }
}

struct CpuSlot {
    identity: OnceLock<CpuIdentity>,
    masks: ArcSwap<SiblingMasks>,
}

/// The per-CPU topology table. Allocated once for every possible CPU;
/// identities are filled in as CPUs come online and sibling masks are
/// republished on every rebuild.
pub struct TopologyTable {
    slots: Vec<CpuSlot>,
    generation: AtomicU64,
}

impl TopologyTable {
    pub fn new(nr_cpus: usize) -> Self {
        let slots = (0..nr_cpus)
            .map(|_| CpuSlot {
                identity: OnceLock::new(),
                masks: ArcSwap::from_pointee(SiblingMasks::new(nr_cpus)),
            })
            .collect();

        Self {
            slots,
            generation: AtomicU64::new(0),
        }
    }

    pub fn nr_cpus(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, cpu: usize) -> TopologyResult<&CpuSlot> {
        self.slots.get(cpu).ok_or(TopologyError::InvalidCpu {
            cpu,
            nr_cpus: self.slots.len(),
        })
    }

    /// Identity of a CPU, None until it has been discovered
    pub fn identity(&self, cpu: usize) -> TopologyResult<Option<CpuIdentity>> {
        Ok(self.slot(cpu)?.identity.get().copied())
    }

    /// Snapshot of every CPU's identity, indexed by CPU id
    pub fn identities(&self) -> Vec<Option<CpuIdentity>> {
        self.slots
            .iter()
            .map(|slot| slot.identity.get().copied())
            .collect()
    }

    /// Current sibling masks of a CPU
    pub fn masks(&self, cpu: usize) -> TopologyResult<Arc<SiblingMasks>> {
        Ok(self.slot(cpu)?.masks.load_full())
    }

    pub fn core_siblings(&self, cpu: usize) -> TopologyResult<Cpumask> {
        Ok(self.slot(cpu)?.masks.load().core.clone())
    }

    pub fn thread_siblings(&self, cpu: usize) -> TopologyResult<Cpumask> {
        Ok(self.slot(cpu)?.masks.load().thread.clone())
    }

    /// Number of mask publications so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self, cpu: usize, masks: SiblingMasks) {
        if let Some(slot) = self.slots.get(cpu) {
            slot.masks.store(Arc::new(masks));
        }
    }

    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Record the position of a CPU that is coming online and link it into
    /// the sibling masks. A CPU that was already discovered is left as is.
    ///
    /// Callers bring CPUs online one at a time.
    pub fn discover(&self, cpu: usize, mpidr: u32, midr: u32) -> TopologyResult<CpuIdentity> {
        let slot = self.slot(cpu)?;

        if let Some(identity) = slot.identity.get() {
            return Ok(*identity);
        }

        let identity = *slot.identity.get_or_init(|| CpuIdentity::decode(mpidr, midr));

        // The masks are rebuilt again on the next policy change
        self.update_siblings(cpu);

        info!(
            "CPU{}: thread {}, cpu {}, socket {}, mpidr {:x}",
            cpu,
            fmt_id(identity.thread_id),
            identity.core_id,
            fmt_id(identity.socket_id),
            mpidr
        );

        Ok(identity)
    }
}

fn fmt_id(id: Option<u32>) -> String {
    id.map_or_else(|| "-1".to_string(), |id| id.to_string())
}
