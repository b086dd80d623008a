// SPDX-License-Identifier: GPL-2.0
//
// cputopo - Sibling mask engine
//
// Core siblings share a socket, thread siblings additionally share a core.
// Masks are computed into a private staging copy and then published per CPU
// with a single pointer swap, so a reader always sees a complete pair for
// any CPU: either the previous one or the new one.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use crate::cpumask::Cpumask;
use crate::topology::{CpuIdentity, MaskStrategy, TopologyTable};
use log::debug;
use serde::Serialize;
use std::sync::atomic::{Ordering, fence};

/// Core and thread sibling masks of one CPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiblingMasks {
    pub core: Cpumask,
    pub thread: Cpumask,
}

impl SiblingMasks {
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            core: Cpumask::new(nr_cpus),
            thread: Cpumask::new(nr_cpus),
        }
    }
}

/// Link `cpuid` with every discovered CPU it shares a package with.
///
/// With `MaskStrategy::PairedPackage` only CPUs of the same id parity share
/// a package, emulating two virtual packages out of one.
fn link_cpu(
    identities: &[Option<CpuIdentity>],
    masks: &mut [SiblingMasks],
    cpuid: usize,
    strategy: MaskStrategy,
) {
    let Some(Some(me)) = identities.get(cpuid) else {
        return;
    };

    for (cpu, other) in identities.iter().enumerate() {
        let Some(other) = other else {
            continue;
        };

        if me.socket_id != other.socket_id {
            continue;
        }

        if strategy == MaskStrategy::PairedPackage && (cpuid & 1) != (cpu & 1) {
            continue;
        }

        masks[cpu].core.insert(cpuid);
        masks[cpuid].core.insert(cpu);

        if me.core_id != other.core_id {
            continue;
        }

        masks[cpu].thread.insert(cpuid);
        masks[cpuid].thread.insert(cpu);
    }
}

impl TopologyTable {
    /// Incrementally add one newly discovered CPU to the masks. Only the
    /// default grouping is used; paired packages are only formed by a
    /// policy-driven rebuild.
    pub fn update_siblings(&self, cpuid: usize) {
        let identities = self.identities();
        let current: Vec<_> = (0..self.nr_cpus())
            .filter_map(|cpu| self.masks(cpu).ok())
            .collect();
        let mut staging: Vec<SiblingMasks> = current.iter().map(|m| (**m).clone()).collect();

        link_cpu(&identities, &mut staging, cpuid, MaskStrategy::Default);

        for (cpu, (new, old)) in staging.into_iter().zip(current.iter()).enumerate() {
            if new != **old {
                self.publish(cpu, new);
            }
        }

        fence(Ordering::Release);
        self.bump_generation();
    }

    /// Recompute every CPU's masks from scratch.
    ///
    /// With `power_saving` set each CPU is linked with the strategy chosen
    /// for its family at discovery; otherwise everything is grouped by
    /// socket and core. Concurrent rebuilds are not supported: the caller
    /// serializes them.
    pub fn rebuild_siblings(&self, power_saving: bool) {
        let nr_cpus = self.nr_cpus();
        let identities = self.identities();
        let mut staging = vec![SiblingMasks::new(nr_cpus); nr_cpus];

        for (cpuid, identity) in identities.iter().enumerate() {
            let strategy = match identity {
                Some(identity) if power_saving => identity.strategy,
                _ => MaskStrategy::Default,
            };
            link_cpu(&identities, &mut staging, cpuid, strategy);
        }

        for (cpu, masks) in staging.into_iter().enumerate() {
            debug!("CPU{}: core siblings {}, thread siblings {}", cpu, masks.core, masks.thread);
            self.publish(cpu, masks);
        }

        fence(Ordering::Release);
        self.bump_generation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{MPIDR_MT_BITMASK, MPIDR_SMP_VALUE};

    const MP: u32 = MPIDR_SMP_VALUE;
    const CORTEX_A15: u32 = 0x412F_C0F0;
    const CORTEX_A9: u32 = 0x410F_C090;

    fn mask(nr_cpus: usize, cpus: &[usize]) -> Cpumask {
        Cpumask::from_cpus(nr_cpus, cpus.iter().copied()).unwrap()
    }

    #[test]
    fn test_incremental_join() {
        let table = TopologyTable::new(4);

        table.discover(0, MP, CORTEX_A15).unwrap();
        assert_eq!(table.core_siblings(0).unwrap(), mask(4, &[0]));
        assert_eq!(table.thread_siblings(0).unwrap(), mask(4, &[0]));

        table.discover(1, MP | 0x1, CORTEX_A15).unwrap();
        assert_eq!(table.core_siblings(0).unwrap(), mask(4, &[0, 1]));
        assert_eq!(table.core_siblings(1).unwrap(), mask(4, &[0, 1]));
        assert_eq!(table.thread_siblings(1).unwrap(), mask(4, &[1]));

        // Undiscovered CPUs have empty masks
        assert!(table.core_siblings(3).unwrap().is_empty());
    }

    #[test]
    fn test_sockets_are_separate() {
        let table = TopologyTable::new(4);
        table.discover(0, MP, CORTEX_A15).unwrap();
        table.discover(1, MP | 0x1, CORTEX_A15).unwrap();
        table.discover(2, MP | 0x100, CORTEX_A15).unwrap();
        table.discover(3, MP | 0x101, CORTEX_A15).unwrap();

        assert_eq!(table.core_siblings(0).unwrap(), mask(4, &[0, 1]));
        assert_eq!(table.core_siblings(3).unwrap(), mask(4, &[2, 3]));
    }

    #[test]
    fn test_smt_threads() {
        let table = TopologyTable::new(4);
        for cpu in 0..4u32 {
            // two cores, two threads each
            let mpidr = MP | MPIDR_MT_BITMASK | ((cpu / 2) << 8) | (cpu % 2);
            table.discover(cpu as usize, mpidr, CORTEX_A15).unwrap();
        }

        assert_eq!(table.core_siblings(0).unwrap(), mask(4, &[0, 1, 2, 3]));
        assert_eq!(table.thread_siblings(0).unwrap(), mask(4, &[0, 1]));
        assert_eq!(table.thread_siblings(3).unwrap(), mask(4, &[2, 3]));
    }

    #[test]
    fn test_rebuild_paired_package() {
        let table = TopologyTable::new(4);
        for cpu in 0..4u32 {
            table.discover(cpu as usize, MP | cpu, CORTEX_A9).unwrap();
        }
        assert_eq!(table.core_siblings(0).unwrap(), mask(4, &[0, 1, 2, 3]));

        table.rebuild_siblings(true);
        assert_eq!(table.core_siblings(0).unwrap(), mask(4, &[0, 2]));
        assert_eq!(table.core_siblings(1).unwrap(), mask(4, &[1, 3]));
        assert_eq!(table.thread_siblings(2).unwrap(), mask(4, &[2]));

        table.rebuild_siblings(false);
        assert_eq!(table.core_siblings(1).unwrap(), mask(4, &[0, 1, 2, 3]));
    }

    fn assert_mask_laws(table: &TopologyTable) {
        let nr_cpus = table.nr_cpus();
        for a in 0..nr_cpus {
            let masks_a = table.masks(a).unwrap();
            assert!(masks_a.core.test_cpu(a));
            assert!(masks_a.thread.test_cpu(a));
            assert!(masks_a.thread.is_subset(&masks_a.core));

            for b in 0..nr_cpus {
                let masks_b = table.masks(b).unwrap();
                assert_eq!(masks_a.core.test_cpu(b), masks_b.core.test_cpu(a));
                assert_eq!(masks_a.thread.test_cpu(b), masks_b.thread.test_cpu(a));
            }
        }
    }

    #[test]
    fn test_rebuild_mixed_families() {
        let table = TopologyTable::new(3);
        table.discover(0, MP, CORTEX_A9).unwrap();
        table.discover(1, MP | 0x1, CORTEX_A15).unwrap();
        table.discover(2, MP | 0x2, CORTEX_A9).unwrap();

        table.rebuild_siblings(true);

        // The A15 links with everyone in its socket, the A9s split by parity
        assert_eq!(table.core_siblings(0).unwrap(), mask(3, &[0, 1, 2]));
        assert_eq!(table.core_siblings(1).unwrap(), mask(3, &[0, 1, 2]));
        assert_eq!(table.core_siblings(2).unwrap(), mask(3, &[0, 1, 2]));
        assert_eq!(table.thread_siblings(1).unwrap(), mask(3, &[1]));
        assert_mask_laws(&table);
    }

    #[test]
    fn test_rebuild_mixed_families_without_shared_parity() {
        let table = TopologyTable::new(4);
        table.discover(0, MP, CORTEX_A9).unwrap();
        table.discover(1, MP | 0x1, CORTEX_A9).unwrap();
        table.discover(2, MP | 0x2, CORTEX_A9).unwrap();
        table.discover(3, MP | 0x3, CORTEX_A15).unwrap();

        table.rebuild_siblings(true);

        // The A9s stay split by parity, the A15 links with all of them
        assert_eq!(table.core_siblings(0).unwrap(), mask(4, &[0, 2, 3]));
        assert_eq!(table.core_siblings(1).unwrap(), mask(4, &[1, 3]));
        assert_eq!(table.core_siblings(3).unwrap(), mask(4, &[0, 1, 2, 3]));
        assert_mask_laws(&table);
    }

    #[test]
    fn test_join_after_paired_rebuild() {
        let table = TopologyTable::new(4);
        for cpu in 0..3u32 {
            table.discover(cpu as usize, MP | cpu, CORTEX_A9).unwrap();
        }

        table.rebuild_siblings(true);
        assert_eq!(table.core_siblings(0).unwrap(), mask(4, &[0, 2]));
        assert_eq!(table.core_siblings(1).unwrap(), mask(4, &[1]));

        let generation = table.generation();
        table.discover(3, MP | 0x3, CORTEX_A9).unwrap();
        assert_eq!(table.generation(), generation + 1);

        // The newcomer is linked with the default grouping; the paired
        // masks of the others only gain it.
        assert_eq!(table.core_siblings(3).unwrap(), mask(4, &[0, 1, 2, 3]));
        assert_eq!(table.core_siblings(0).unwrap(), mask(4, &[0, 2, 3]));
        assert_eq!(table.core_siblings(1).unwrap(), mask(4, &[1, 3]));
        assert_eq!(table.thread_siblings(3).unwrap(), mask(4, &[3]));
        assert_mask_laws(&table);
    }

    #[test]
    fn test_rebuild_other_family_ignores_pairing() {
        let table = TopologyTable::new(2);
        table.discover(0, MP, CORTEX_A15).unwrap();
        table.discover(1, MP | 0x1, CORTEX_A15).unwrap();

        table.rebuild_siblings(true);
        assert_eq!(table.core_siblings(0).unwrap(), mask(2, &[0, 1]));
    }

    #[test]
    fn test_rebuild_bumps_generation() {
        let table = TopologyTable::new(2);
        let before = table.generation();
        table.rebuild_siblings(false);
        assert_eq!(table.generation(), before + 1);
    }
}
