//! Advisory exclusive resources shared between concurrently running nodes.
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{Mutex as ResourceMutex, OwnedMutexGuard};

/// One mutex per resource name, created on first use.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    resources: Mutex<HashMap<String, Arc<ResourceMutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn resource(&self, name: &str) -> Arc<ResourceMutex<()>> {
        let mut resources = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(resources.entry(name.to_string()).or_default())
    }

    /// Block until every name in `names` is free and take all of them.
    /// Names in `inherited` are already held by an ancestor and are skipped.
    ///
    /// Names are taken in sorted order, so two callers that hold nothing
    /// else can never wait on each other in a cycle. Must not be called from
    /// within an async context.
    pub fn acquire<'a, I>(&self, names: I, inherited: &HashSet<String>) -> LockGuard
    where
        I: IntoIterator<Item = &'a String>,
    {
        let wanted: BTreeSet<&String> = names
            .into_iter()
            .filter(|n| !inherited.contains(*n))
            .collect();
        if !wanted.is_empty() {
            tracing::trace!(?wanted, "acquiring exclusive resources");
        }
        let guards = wanted
            .into_iter()
            .map(|name| (name.clone(), self.resource(name).blocking_lock_owned()))
            .collect();
        LockGuard { guards }
    }
}

/// Releases its resources when dropped.
#[derive(Debug)]
pub struct LockGuard {
    guards: Vec<(String, OwnedMutexGuard<()>)>,
}

impl LockGuard {
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.guards.iter().map(|(name, _)| name)
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn second_holder_waits_for_release() {
        let locks = Arc::new(ResourceLocks::new());
        let names = vec!["db".to_string()];
        let guard = locks.acquire(&names, &HashSet::new());

        let log = Arc::new(Mutex::new(Vec::new()));
        let waiter = {
            let locks = Arc::clone(&locks);
            let log = Arc::clone(&log);
            let names = names.clone();
            thread::spawn(move || {
                let _g = locks.acquire(&names, &HashSet::new());
                log.lock().unwrap().push("second");
            })
        };
        thread::sleep(Duration::from_millis(50));
        log.lock().unwrap().push("first released");
        drop(guard);
        waiter.join().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first released", "second"]);
    }

    #[test]
    fn inherited_names_are_not_reacquired() {
        let locks = ResourceLocks::new();
        let names = vec!["db".to_string()];
        let outer = locks.acquire(&names, &HashSet::new());
        let inherited: HashSet<String> = outer.names().cloned().collect();
        // Would deadlock if "db" were taken again.
        let inner = locks.acquire(&names, &inherited);
        assert!(inner.is_empty());
    }

    #[test]
    fn opposite_declaration_orders_do_not_deadlock() {
        let locks = Arc::new(ResourceLocks::new());
        let workers: Vec<_> = [["x", "y"], ["y", "x"]]
            .into_iter()
            .map(|order| {
                let locks = Arc::clone(&locks);
                thread::spawn(move || {
                    let names: Vec<String> = order.iter().map(|n| n.to_string()).collect();
                    for _ in 0..50 {
                        let guard = locks.acquire(&names, &HashSet::new());
                        assert_eq!(guard.names().count(), 2);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    }
}
