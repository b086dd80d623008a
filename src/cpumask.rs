// SPDX-License-Identifier: GPL-2.0
//
// cputopo - CPU masks
//
// A Cpumask is a BitVec of u64 words sized to the number of possible CPUs.
// It is the set<CpuId> type used for core and thread sibling masks.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use crate::error::{TopologyError, TopologyResult};
use bitvec::prelude::*;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Eq, Clone, Hash, PartialEq)]
pub struct Cpumask {
    mask: BitVec<u64, Lsb0>,
}

impl Cpumask {
    /// Build a new empty Cpumask spanning `nr_cpus` possible CPUs.
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            mask: bitvec![u64, Lsb0; 0; nr_cpus],
        }
    }

    /// Build a Cpumask from an iterator of CPU ids. Ids outside the mask are
    /// rejected.
    pub fn from_cpus<I>(nr_cpus: usize, cpus: I) -> TopologyResult<Self>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut mask = Self::new(nr_cpus);
        for cpu in cpus {
            mask.set_cpu(cpu)?;
        }
        Ok(mask)
    }

    fn check_cpu(&self, cpu: usize) -> TopologyResult<()> {
        if cpu >= self.mask.len() {
            return Err(TopologyError::InvalidCpu {
                cpu,
                nr_cpus: self.mask.len(),
            });
        }
        Ok(())
    }

    /// Set a CPU in the mask.
    pub fn set_cpu(&mut self, cpu: usize) -> TopologyResult<()> {
        self.check_cpu(cpu)?;
        self.mask.set(cpu, true);
        Ok(())
    }

    /// Set a CPU, returning false if it is outside the mask.
    pub fn insert(&mut self, cpu: usize) -> bool {
        if cpu >= self.mask.len() {
            return false;
        }
        self.mask.set(cpu, true);
        true
    }

    /// Test whether a CPU is in the mask. Out of range CPUs are never set.
    pub fn test_cpu(&self, cpu: usize) -> bool {
        self.mask.get(cpu).is_some_and(|bit| *bit)
    }

    /// Number of CPUs set in the mask.
    pub fn weight(&self) -> usize {
        self.mask.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.not_any()
    }

    /// True if every CPU of `self` is also in `other`.
    pub fn is_subset(&self, other: &Cpumask) -> bool {
        self.iter().all(|cpu| other.test_cpu(cpu))
    }

    /// Iterate over the CPUs set in the mask in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask.iter_ones()
    }
}

impl fmt::Display for Cpumask {
    /// Format as a cpulist, e.g. "0-3,8".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut cpus = self.iter().peekable();

        while let Some(start) = cpus.next() {
            let mut end = start;
            while cpus.peek() == Some(&(end + 1)) {
                end += 1;
                cpus.next();
            }

            if !first {
                write!(f, ",")?;
            }
            first = false;

            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }

        Ok(())
    }
}

impl Serialize for Cpumask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}
