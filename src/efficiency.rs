// SPDX-License-Identifier: GPL-2.0
//
// cputopo - Relative CPU efficiency table
//
// Maps a CPU model compatible string to a relative efficiency constant.
// Efficiency values must fit in 20 bits so that (MHz * efficiency) stays
// well inside a u64 and the scaled capacity stays below 3/2 of the
// baseline after normalization.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use crate::provider::CpuNode;
use serde::{Deserialize, Serialize};

/// Largest accepted efficiency value (20 bits)
pub const MAX_EFFICIENCY: u64 = (1 << 20) - 1;

/// Known CPU models and their relative efficiency
const BUILTIN_EFFICIENCY: &[(&str, u64)] = &[
    ("arm,cortex-a15", 3891),
    ("arm,cortex-a7", 2048),
];

/// One row of the efficiency table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuEfficiency {
    pub compatible: String,
    pub efficiency: u64,
}

/// Ordered efficiency table. The first row whose compatible string the node
/// advertises wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfficiencyTable {
    entries: Vec<CpuEfficiency>,
}

impl EfficiencyTable {
    /// The built-in table
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_EFFICIENCY
                .iter()
                .map(|&(compatible, efficiency)| CpuEfficiency {
                    compatible: compatible.to_string(),
                    efficiency,
                })
                .collect(),
        }
    }

    /// Built-in table followed by caller supplied rows. Rows with an
    /// efficiency of zero or wider than 20 bits are dropped.
    pub fn with_extra<I>(extra: I) -> Self
    where
        I: IntoIterator<Item = CpuEfficiency>,
    {
        let mut table = Self::builtin();
        for row in extra {
            if row.efficiency == 0 || row.efficiency > MAX_EFFICIENCY {
                log::warn!(
                    "Ignoring efficiency {} for {}: must be in 1..={}",
                    row.efficiency,
                    row.compatible,
                    MAX_EFFICIENCY
                );
                continue;
            }
            table.entries.push(row);
        }
        table
    }

    /// Efficiency for a CPU node, or None if its model is unknown
    pub fn lookup(&self, node: &CpuNode) -> Option<u64> {
        self.entries
            .iter()
            .find(|row| node.is_compatible(&row.compatible))
            .map(|row| row.efficiency)
    }

    pub fn entries(&self) -> &[CpuEfficiency] {
        &self.entries
    }
}

impl Default for EfficiencyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(compatible: &[&str]) -> CpuNode {
        CpuNode::new("cpu@0", compatible.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_builtin_lookup() {
        let table = EfficiencyTable::builtin();
        assert_eq!(table.lookup(&node(&["arm,cortex-a15"])), Some(3891));
        assert_eq!(table.lookup(&node(&["arm,cortex-a7"])), Some(2048));
        assert_eq!(table.lookup(&node(&["arm,cortex-a9"])), None);
    }

    #[test]
    fn test_lookup_any_compatible() {
        let table = EfficiencyTable::builtin();
        assert_eq!(
            table.lookup(&node(&["vendor,custom-core", "arm,cortex-a7"])),
            Some(2048)
        );
    }

    #[test]
    fn test_extra_rows() {
        let table = EfficiencyTable::with_extra([
            CpuEfficiency {
                compatible: "arm,cortex-a9".to_string(),
                efficiency: 2560,
            },
            CpuEfficiency {
                compatible: "bogus,zero".to_string(),
                efficiency: 0,
            },
            CpuEfficiency {
                compatible: "bogus,wide".to_string(),
                efficiency: 1 << 20,
            },
        ]);
        assert_eq!(table.entries().len(), 3);
        assert_eq!(table.lookup(&node(&["arm,cortex-a9"])), Some(2560));
        assert_eq!(table.lookup(&node(&["bogus,zero"])), None);
    }

    #[test]
    fn test_builtin_wins_over_extra() {
        let table = EfficiencyTable::with_extra([CpuEfficiency {
            compatible: "arm,cortex-a15".to_string(),
            efficiency: 100,
        }]);
        assert_eq!(table.lookup(&node(&["arm,cortex-a15"])), Some(3891));
    }
}
