//! Namespaced key/value storage scoped to an execution context.
//!
//! Lookups fall back to the parent context's store on a miss; writes always
//! land in the local store. Values implementing [CloseableResource] stored
//! with [NamespacedStore::put_resource] are closed, newest first, when the
//! owning context is released.
use crate::{errors::TestError, executor::ThrowableCollector};
use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

/// Partitions a store so extensions do not clash on keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(Vec<String>);

impl Namespace {
    /// The namespace shared by everyone.
    pub fn global() -> Self {
        Namespace(Vec::new())
    }

    pub fn create<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Namespace(parts.into_iter().map(Into::into).collect())
    }

    pub fn append(&self, part: impl Into<String>) -> Self {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Namespace(parts)
    }
}

/// A stored value released when its context closes.
pub trait CloseableResource: Send + Sync {
    fn close(&self) -> Result<(), TestError>;
}

type Stored = Arc<dyn Any + Send + Sync>;
type Key = (Namespace, String);

#[derive(Default)]
struct Entries {
    values: HashMap<Key, Stored>,
    resources: Vec<(Key, Arc<dyn CloseableResource>)>,
}

/// The store of one context.
pub struct Store {
    parent: Option<Arc<Store>>,
    entries: Mutex<Entries>,
}

impl Store {
    pub fn new(parent: Option<Arc<Store>>) -> Self {
        Store {
            parent,
            entries: Mutex::new(Entries::default()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &Key) -> Option<Stored> {
        let local = self.entries().values.get(key).cloned();
        local.or_else(|| self.parent.as_ref().and_then(|p| p.lookup(key)))
    }

    /// Close every resource stored locally, newest first. All resources are
    /// closed even if some fail.
    pub fn close(&self) -> Result<(), TestError> {
        let resources = std::mem::take(&mut self.entries().resources);
        let mut collector = ThrowableCollector::new();
        for ((_, key), resource) in resources.into_iter().rev() {
            tracing::trace!(key = %key, "closing stored resource");
            collector.execute(|| resource.close());
        }
        collector.into_result()
    }

    pub fn namespace(&self, namespace: Namespace) -> NamespacedStore<'_> {
        NamespacedStore {
            store: self,
            namespace,
        }
    }
}

/// A store seen through one namespace.
pub struct NamespacedStore<'a> {
    store: &'a Store,
    namespace: Namespace,
}

fn type_mismatch<T>(key: &str) -> TestError {
    TestError::configuration(format!(
        "Object stored under key [{}] is not of required type [{}]",
        key,
        std::any::type_name::<T>()
    ))
}

impl NamespacedStore<'_> {
    fn key(&self, key: &str) -> Key {
        (self.namespace.clone(), key.to_string())
    }

    /// The value for `key` in this store or the nearest ancestor store.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<T>>, TestError> {
        match self.store.lookup(&self.key(key)) {
            None => Ok(None),
            Some(value) => value
                .downcast::<T>()
                .map(Some)
                .map_err(|_| type_mismatch::<T>(key)),
        }
    }

    /// Store `value` locally, returning the previous local value.
    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: T) -> Option<Arc<dyn Any + Send + Sync>> {
        self.store
            .entries()
            .values
            .insert(self.key(key), Arc::new(value))
    }

    /// Store a resource that is closed when the owning context is released.
    pub fn put_resource<T>(&self, key: &str, value: T) -> Arc<T>
    where
        T: CloseableResource + Any + Send + Sync,
    {
        let value = Arc::new(value);
        let mut entries = self.store.entries();
        entries
            .values
            .insert(self.key(key), Arc::clone(&value) as Stored);
        entries
            .resources
            .push((self.key(key), Arc::clone(&value) as Arc<dyn CloseableResource>));
        value
    }

    /// Remove `key` from the local store only.
    pub fn remove(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        let key = self.key(key);
        let mut entries = self.store.entries();
        entries.resources.retain(|(k, _)| *k != key);
        entries.values.remove(&key)
    }

    /// The value for `key`, computing and storing it locally when neither
    /// this store nor an ancestor has one.
    pub fn get_or_compute<T, F>(&self, key: &str, compute: F) -> Result<Arc<T>, TestError>
    where
        T: Any + Send + Sync,
        F: FnOnce(&str) -> T,
    {
        if let Some(existing) = self.get::<T>(key)? {
            return Ok(existing);
        }
        let computed: Stored = Arc::new(compute(key));
        let stored = Arc::clone(
            self.store
                .entries()
                .values
                .entry(self.key(key))
                .or_insert(computed),
        );
        stored.downcast::<T>().map_err(|_| type_mismatch::<T>(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lookups_fall_back_to_parent_but_writes_stay_local() {
        let parent = Arc::new(Store::new(None));
        let child = Store::new(Some(Arc::clone(&parent)));
        let ns = Namespace::create(["timing"]);

        parent.namespace(ns.clone()).put("start", 10_u64);
        assert_eq!(*child.namespace(ns.clone()).get::<u64>("start").unwrap().unwrap(), 10);

        child.namespace(ns.clone()).put("start", 20_u64);
        assert_eq!(*child.namespace(ns.clone()).get::<u64>("start").unwrap().unwrap(), 20);
        assert_eq!(*parent.namespace(ns.clone()).get::<u64>("start").unwrap().unwrap(), 10);

        // Namespaces do not see each other.
        assert!(child.namespace(Namespace::global()).get::<u64>("start").unwrap().is_none());
    }

    #[test]
    fn wrong_type_is_an_error() {
        let store = Store::new(None);
        store.namespace(Namespace::global()).put("k", "text".to_string());
        let err = store.namespace(Namespace::global()).get::<u64>("k").unwrap_err();
        assert!(err.message().contains("[k]"));
    }

    #[test]
    fn compute_happens_once() {
        let store = Store::new(None);
        let calls = AtomicUsize::new(0);
        let ns = store.namespace(Namespace::global());
        for _ in 0..3 {
            let v = ns
                .get_or_compute("answer", |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    42_i64
                })
                .unwrap();
            assert_eq!(*v, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Tracked {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl CloseableResource for Tracked {
        fn close(&self) -> Result<(), TestError> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                Err(TestError::failure(format!("{} failed to close", self.name)))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn resources_close_newest_first_and_all_close() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = Store::new(None);
        let ns = store.namespace(Namespace::global());
        for (name, fail) in [("a", true), ("b", false), ("c", true)] {
            ns.put_resource(
                name,
                Tracked {
                    name,
                    log: Arc::clone(&log),
                    fail,
                },
            );
        }
        let err = store.close().unwrap_err();
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
        assert_eq!(err.message(), "c failed to close");
        assert_eq!(err.suppressed().len(), 1);
        // Closing twice is a no-op.
        assert!(store.close().is_ok());
    }
}
