// SPDX-License-Identifier: GPL-2.0
//
// cputopo - Error types
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use thiserror::Error;

/// Recoverable errors reported by the topology tracker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("CPU {cpu} is out of range ({nr_cpus} possible CPUs)")]
    InvalidCpu { cpu: usize, nr_cpus: usize },

    #[error("observer is already registered")]
    DuplicateObserver,

    #[error("observer is not registered")]
    ObserverNotFound,

    #[error("capacity override input too long ({len} bytes)")]
    InputTooLong { len: usize },

    #[error("invalid capacity value {input:?}")]
    InvalidCapacity { input: String },
}

pub type TopologyResult<T> = std::result::Result<T, TopologyError>;
