// SPDX-License-Identifier: GPL-2.0
//
// cputopo - CPU topology tracker
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

pub mod capacity;
pub mod config;
pub mod control;
pub mod cpumask;
pub mod efficiency;
pub mod error;
pub mod notifier;
pub mod policy;
pub mod provider;
pub mod siblings;
pub mod topology;
pub mod tracker;

pub use crate::capacity::{CapacityStore, CapacityTable, SCHED_POWER_SCALE};
pub use crate::cpumask::Cpumask;
pub use crate::error::{TopologyError, TopologyResult};
pub use crate::notifier::TopologyObserver;
pub use crate::policy::PowerSavings;
pub use crate::provider::{CpuNode, HardwareProvider, MachineDescription};
pub use crate::topology::{CpuIdentity, MaskStrategy};
pub use crate::tracker::{CpuReport, TopologyTracker};
