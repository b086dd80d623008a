// SPDX-License-Identifier: GPL-2.0
//
// cputopo - Topology tracker
//
// Owns the topology table, the capacity store and the policy/notifier
// state for one system. Lifecycle: built once for all possible CPUs,
// CPUs are stored one at a time as they come online, masks are rebuilt
// whenever the power-saving policy flips, and the scheduler reads
// everything lock-free for as long as the tracker lives.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use crate::capacity::{CapacityStore, CapacityTable};
use crate::config::CapacityConfig;
use crate::cpumask::Cpumask;
use crate::efficiency::EfficiencyTable;
use crate::error::TopologyResult;
use crate::notifier::{TopologyNotifier, TopologyObserver};
use crate::policy::PolicyState;
use crate::provider::{HardwareProvider, MachineDescription};
use crate::topology::{CpuIdentity, MPIDR_HWID_BITMASK, TopologyTable};
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;

/// Everything the tracker knows about one CPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuReport {
    pub cpu: usize,
    pub identity: Option<CpuIdentity>,
    pub capacity: u64,
    pub core_siblings: Cpumask,
    pub thread_siblings: Cpumask,
}

pub struct TopologyTracker {
    table: TopologyTable,
    capacity: CapacityStore,
    capacities: CapacityTable,
    policy: PolicyState,
    notifier: TopologyNotifier,
}

impl TopologyTracker {
    /// A tracker whose CPUs all keep the baseline capacity
    pub fn new(nr_cpus: usize) -> Self {
        Self::with_capacities(nr_cpus, CapacityTable::empty())
    }

    /// A tracker using capacities resolved elsewhere
    pub fn with_capacities(nr_cpus: usize, capacities: CapacityTable) -> Self {
        Self {
            table: TopologyTable::new(nr_cpus),
            capacity: CapacityStore::new(nr_cpus),
            capacities,
            policy: PolicyState::new(),
            notifier: TopologyNotifier::new(),
        }
    }

    /// Resolve capacities from a hardware description
    pub fn from_provider<P>(nr_cpus: usize, provider: &P, efficiencies: &EfficiencyTable) -> Self
    where
        P: HardwareProvider + ?Sized,
    {
        let capacities = CapacityTable::resolve_all(provider, efficiencies, nr_cpus);
        Self::with_capacities(nr_cpus, capacities)
    }

    /// Build a tracker for a described machine and bring every described
    /// CPU online in order.
    pub fn boot_machine(machine: &MachineDescription, capacity: &CapacityConfig) -> TopologyResult<Self> {
        let nr_cpus = machine.nr_possible_cpus();
        let tracker = if capacity.enabled {
            Self::from_provider(nr_cpus, machine, &capacity.efficiency_table())
        } else {
            debug!("Capacity resolution disabled, all CPUs at baseline");
            Self::new(nr_cpus)
        };

        for record in machine.boot_records() {
            tracker.store_cpu_topology(record.cpu, record.mpidr, record.midr)?;
        }

        info!(
            "Booted {} of {} possible CPUs",
            tracker.table.identities().iter().flatten().count(),
            nr_cpus
        );

        Ok(tracker)
    }

    pub fn nr_cpus(&self) -> usize {
        self.table.nr_cpus()
    }

    pub fn table(&self) -> &TopologyTable {
        &self.table
    }

    pub fn policy(&self) -> &PolicyState {
        &self.policy
    }

    /// Record a CPU that is coming online and apply its resolved capacity.
    /// Calling it again for the same CPU changes nothing.
    pub fn store_cpu_topology(&self, cpu: usize, mpidr: u32, midr: u32) -> TopologyResult<CpuIdentity> {
        if let Some(identity) = self.table.identity(cpu)? {
            return Ok(identity);
        }

        let identity = self.table.discover(cpu, mpidr, midr)?;
        self.capacities
            .apply(&self.capacity, cpu, mpidr & MPIDR_HWID_BITMASK)?;
        Ok(identity)
    }

    pub fn cpu_identity(&self, cpu: usize) -> TopologyResult<Option<CpuIdentity>> {
        self.table.identity(cpu)
    }

    pub fn capacity_of(&self, cpu: usize) -> TopologyResult<u64> {
        self.capacity.get(cpu)
    }

    pub fn core_siblings_of(&self, cpu: usize) -> TopologyResult<Cpumask> {
        self.table.core_siblings(cpu)
    }

    pub fn thread_siblings_of(&self, cpu: usize) -> TopologyResult<Cpumask> {
        self.table.thread_siblings(cpu)
    }

    /// CPUs the scheduler groups with `cpu` at the multi-core level
    pub fn coregroup_mask(&self, cpu: usize) -> TopologyResult<Cpumask> {
        self.core_siblings_of(cpu)
    }

    /// Whether sibling domains should pack tasks asymmetrically
    pub fn sd_asym_packing(&self) -> bool {
        self.policy.asym_packing()
    }

    pub fn mask_generation(&self) -> u64 {
        self.table.generation()
    }

    /// Called before the scheduler rebuilds its domains. Rebuilds the
    /// sibling masks and notifies observers if the power-saving policy
    /// changed since the last call. Returns true if it did. The rebuild and
    /// the observers use the level recorded by this check.
    pub fn on_policy_maybe_changed(&self) -> bool {
        let Some(mc_power_savings) = self.policy.need_update() else {
            return false;
        };

        info!(
            "Power-saving policy changed (mc {}, smt {}), rebuilding sibling masks",
            mc_power_savings,
            self.policy.smt_power_savings()
        );

        self.table.rebuild_siblings(mc_power_savings.is_enabled());
        self.notifier.notify(mc_power_savings);
        true
    }

    /// Override the capacity of one CPU
    pub fn set_capacity(&self, cpu: usize, capacity: u64) -> TopologyResult<()> {
        self.capacity.set(cpu, capacity)
    }

    pub fn read_capacity_text(&self, cpu: usize) -> TopologyResult<String> {
        self.capacity.read_text(cpu)
    }

    pub fn write_capacity_text(&self, cpu: usize, input: &str) -> TopologyResult<usize> {
        self.capacity.write_text(cpu, input)
    }

    pub fn register_observer(&self, observer: Arc<dyn TopologyObserver>) -> TopologyResult<()> {
        self.notifier.register(observer)
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn TopologyObserver>) -> TopologyResult<()> {
        self.notifier.unregister(observer)
    }

    /// Per-CPU view of the current state
    pub fn report(&self) -> TopologyResult<Vec<CpuReport>> {
        (0..self.nr_cpus())
            .map(|cpu| {
                let masks = self.table.masks(cpu)?;
                Ok(CpuReport {
                    cpu,
                    identity: self.table.identity(cpu)?,
                    capacity: self.capacity.get(cpu)?,
                    core_siblings: masks.core.clone(),
                    thread_siblings: masks.thread.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::SCHED_POWER_SCALE;
    use crate::policy::PowerSavings;
    use crate::provider::{CpuNode, PROP_CLOCK_FREQUENCY, PROP_REG};
    use crate::topology::MPIDR_SMP_VALUE;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CORTEX_A9: u32 = 0x410F_C090;

    fn quad_a9() -> TopologyTracker {
        let tracker = TopologyTracker::new(4);
        for cpu in 0..4u32 {
            tracker
                .store_cpu_topology(cpu as usize, MPIDR_SMP_VALUE | cpu, CORTEX_A9)
                .unwrap();
        }
        tracker
    }

    #[test]
    fn test_policy_change_rebuilds_and_notifies() {
        let tracker = quad_a9();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        tracker
            .register_observer(Arc::new(move |level: PowerSavings| {
                assert_eq!(level, PowerSavings::Basic);
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(!tracker.on_policy_maybe_changed());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tracker.policy().set_mc_power_savings(PowerSavings::Basic);
        assert!(tracker.on_policy_maybe_changed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.core_siblings_of(0).unwrap().to_string(), "0,2");
        assert!(tracker.sd_asym_packing());

        assert!(!tracker.on_policy_maybe_changed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rebuild_and_observers_share_one_level() {
        let tracker = Arc::new(quad_a9());
        let weak = Arc::downgrade(&tracker);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = seen.clone();

        tracker
            .register_observer(Arc::new(move |level: PowerSavings| {
                let Some(tracker) = weak.upgrade() else {
                    return;
                };
                let weight = tracker.core_siblings_of(0).unwrap().weight();
                log.lock().unwrap().push((level, weight));
                // Policy written while observers run
                tracker.policy().set_mc_power_savings(PowerSavings::None);
            }))
            .unwrap();

        tracker.policy().set_mc_power_savings(PowerSavings::Basic);
        assert!(tracker.on_policy_maybe_changed());
        assert_eq!(*seen.lock().unwrap(), vec![(PowerSavings::Basic, 2)]);

        // The late write is picked up by the next check
        assert!(tracker.on_policy_maybe_changed());
        assert_eq!(seen.lock().unwrap()[1], (PowerSavings::None, 4));
        assert!(!tracker.on_policy_maybe_changed());
    }

    #[test]
    fn test_store_applies_capacity() {
        let nodes = vec![
            CpuNode::new("/cpus/cpu@0", vec!["arm,cortex-a15".to_string()])
                .with_u32(PROP_CLOCK_FREQUENCY, 1_000_000_000)
                .with_u32(PROP_REG, 0x0),
            CpuNode::new("/cpus/cpu@100", vec!["arm,cortex-a7".to_string()])
                .with_u32(PROP_CLOCK_FREQUENCY, 1_000_000_000)
                .with_u32(PROP_REG, 0x100),
        ];
        let tracker = TopologyTracker::from_provider(2, &nodes, &EfficiencyTable::builtin());

        tracker.store_cpu_topology(0, MPIDR_SMP_VALUE, 0x412F_C0F0).unwrap();
        tracker
            .store_cpu_topology(1, MPIDR_SMP_VALUE | 0x100, 0x410F_C070)
            .unwrap();

        assert!(tracker.capacity_of(0).unwrap() > SCHED_POWER_SCALE);
        assert!(tracker.capacity_of(1).unwrap() < SCHED_POWER_SCALE);

        // Different clusters, different sockets
        assert_eq!(tracker.core_siblings_of(0).unwrap().to_string(), "0");
    }

    #[test]
    fn test_report() {
        let tracker = quad_a9();
        tracker.write_capacity_text(2, "900").unwrap();

        let report = tracker.report().unwrap();
        assert_eq!(report.len(), 4);
        assert_eq!(report[2].capacity, 900);
        assert_eq!(report[3].identity.map(|id| id.core_id), Some(3));
        assert_eq!(report[0].core_siblings.weight(), 4);
    }
}
