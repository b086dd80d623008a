// SPDX-License-Identifier: GPL-2.0
//
// cputopo - Topology change notifier
//
// Observers are called once per topology change, in registration order,
// with the multi-core power-saving level that caused it. The list is read
// without locking while notifying; registration replaces the whole list.
//
// Copyright (C) 2025-2026 ghostkellz <ckelley@ghostkellz.sh>

use crate::error::{TopologyError, TopologyResult};
use crate::policy::PowerSavings;
use arc_swap::ArcSwap;
use log::debug;
use std::sync::Arc;

/// Receives topology change events
pub trait TopologyObserver: Send + Sync {
    /// Called after the sibling masks were rebuilt
    fn topology_changed(&self, mc_power_savings: PowerSavings);
}

impl<F> TopologyObserver for F
where
    F: Fn(PowerSavings) + Send + Sync,
{
    fn topology_changed(&self, mc_power_savings: PowerSavings) {
        self(mc_power_savings)
    }
}

type ObserverList = Vec<Arc<dyn TopologyObserver>>;

/// Ordered set of observers. An observer is identified by its allocation,
/// so the same `Arc` can only be registered once.
#[derive(Default)]
pub struct TopologyNotifier {
    observers: ArcSwap<ObserverList>,
}

impl TopologyNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn TopologyObserver>) -> TopologyResult<()> {
        let mut duplicate = false;
        self.observers.rcu(|current| {
            let mut next = ObserverList::clone(current);
            duplicate = next.iter().any(|o| Arc::ptr_eq(o, &observer));
            if !duplicate {
                next.push(observer.clone());
            }
            next
        });

        if duplicate {
            return Err(TopologyError::DuplicateObserver);
        }

        debug!("Registered topology observer ({} total)", self.len());
        Ok(())
    }

    pub fn unregister(&self, observer: &Arc<dyn TopologyObserver>) -> TopologyResult<()> {
        let mut found = false;
        self.observers.rcu(|current| {
            let mut next = ObserverList::clone(current);
            let index = next.iter().position(|o| Arc::ptr_eq(o, observer));
            found = index.is_some();
            if let Some(index) = index {
                next.remove(index);
            }
            next
        });

        if !found {
            return Err(TopologyError::ObserverNotFound);
        }

        debug!("Unregistered topology observer ({} left)", self.len());
        Ok(())
    }

    /// Call every observer in registration order
    pub fn notify(&self, mc_power_savings: PowerSavings) {
        for observer in self.observers.load().iter() {
            observer.topology_changed(mc_power_savings);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<(u32, PowerSavings)>>>, tag: u32) -> Arc<dyn TopologyObserver> {
        let log = log.clone();
        Arc::new(move |level: PowerSavings| log.lock().unwrap().push((tag, level)))
    }

    #[test]
    fn test_notify_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = TopologyNotifier::new();

        notifier.register(recorder(&log, 1)).unwrap();
        notifier.register(recorder(&log, 2)).unwrap();
        notifier.notify(PowerSavings::Basic);

        assert_eq!(
            *log.lock().unwrap(),
            vec![(1, PowerSavings::Basic), (2, PowerSavings::Basic)]
        );
    }

    #[test]
    fn test_duplicate_registration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = TopologyNotifier::new();
        let observer = recorder(&log, 1);

        notifier.register(observer.clone()).unwrap();
        assert_eq!(
            notifier.register(observer.clone()),
            Err(TopologyError::DuplicateObserver)
        );
        assert_eq!(notifier.len(), 1);

        notifier.notify(PowerSavings::None);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unregister() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = TopologyNotifier::new();
        let first = recorder(&log, 1);
        let second = recorder(&log, 2);

        notifier.register(first.clone()).unwrap();
        notifier.register(second.clone()).unwrap();
        notifier.unregister(&first).unwrap();
        assert_eq!(
            notifier.unregister(&first),
            Err(TopologyError::ObserverNotFound)
        );

        notifier.notify(PowerSavings::Wakeup);
        assert_eq!(*log.lock().unwrap(), vec![(2, PowerSavings::Wakeup)]);
        assert!(!notifier.is_empty());
    }
}
