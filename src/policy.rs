// SPDX-License-Identifier: GPL-2.0
//
// cputopo - Power-saving policy state
//
// The scheduler's multi-core and multi-thread power-saving levels are set
// by an external configuration interface. The tracker keeps the last value
// it acted on so it can tell when a rebuild of the sibling masks is needed.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// Power-saving balance level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSavings {
    /// Balance for performance
    #[default]
    None,
    /// Pack tasks onto fewer packages
    Basic,
    /// Pack tasks and also bias wakeups
    Wakeup,
}

impl PowerSavings {
    pub fn as_raw(self) -> u8 {
        match self {
            PowerSavings::None => 0,
            PowerSavings::Basic => 1,
            PowerSavings::Wakeup => 2,
        }
    }

    /// Levels above the highest known one saturate to Wakeup
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => PowerSavings::None,
            1 => PowerSavings::Basic,
            _ => PowerSavings::Wakeup,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != PowerSavings::None
    }
}

impl FromStr for PowerSavings {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "none" | "off" => Ok(PowerSavings::None),
            "1" | "basic" => Ok(PowerSavings::Basic),
            "2" | "wakeup" => Ok(PowerSavings::Wakeup),
            other => Err(format!("unknown power savings level: {}", other)),
        }
    }
}

impl fmt::Display for PowerSavings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowerSavings::None => "none",
            PowerSavings::Basic => "basic",
            PowerSavings::Wakeup => "wakeup",
        };
        f.write_str(name)
    }
}

/// Current and last observed power-saving levels
#[derive(Debug, Default)]
pub struct PolicyState {
    mc_power_savings: AtomicU8,
    smt_power_savings: AtomicU8,
    prev_mc_power_savings: AtomicU8,
    prev_smt_power_savings: AtomicU8,
}

impl PolicyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mc_power_savings(&self) -> PowerSavings {
        PowerSavings::from_raw(self.mc_power_savings.load(Ordering::Relaxed))
    }

    pub fn smt_power_savings(&self) -> PowerSavings {
        PowerSavings::from_raw(self.smt_power_savings.load(Ordering::Relaxed))
    }

    pub fn set_mc_power_savings(&self, level: PowerSavings) {
        self.mc_power_savings.store(level.as_raw(), Ordering::Relaxed);
    }

    pub fn set_smt_power_savings(&self, level: PowerSavings) {
        self.smt_power_savings.store(level.as_raw(), Ordering::Relaxed);
    }

    /// True if tasks should be packed on lower numbered CPUs
    pub fn asym_packing(&self) -> bool {
        self.mc_power_savings().is_enabled() || self.smt_power_savings().is_enabled()
    }

    /// Compare the current levels with the ones seen last time and record
    /// the current ones. Returns the recorded multi-core level if either
    /// level changed, None otherwise.
    pub fn need_update(&self) -> Option<PowerSavings> {
        let mc = self.mc_power_savings.load(Ordering::Relaxed);
        let smt = self.smt_power_savings.load(Ordering::Relaxed);

        let prev_mc = self.prev_mc_power_savings.swap(mc, Ordering::Relaxed);
        let prev_smt = self.prev_smt_power_savings.swap(smt, Ordering::Relaxed);

        (prev_mc != mc || prev_smt != smt).then(|| PowerSavings::from_raw(mc))
    }
}
