use crate::{Entity, EntityMetadata, Result, Variant};
use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, LazyLock, Mutex, RwLock},
};

type Key = (TypeId, Variant);

/// Process wide cache of [`EntityMetadata`] keyed by entity type and variant.
///
/// Reads go through a shared lock. A miss takes the build lock of that key, so
/// concurrent first accesses run `Entity::describe` once and observe the same
/// `Arc`. Failed builds are not cached.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<Key, Arc<EntityMetadata>>>,
    building: Mutex<HashMap<Key, Arc<Mutex<()>>>>,
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::default);

impl Registry {
    pub fn global() -> &'static Registry {
        &REGISTRY
    }

    fn cached(&self, key: &Key) -> Option<Arc<EntityMetadata>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn get<E: Entity>(&self, variant: Variant) -> Result<Arc<EntityMetadata>> {
        let key = (TypeId::of::<E>(), variant);
        if let Some(metadata) = self.cached(&key) {
            return Ok(metadata);
        }
        let lock = self
            .building
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .clone();
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(metadata) = self.cached(&key) {
            return Ok(metadata);
        }
        let metadata = Arc::new(E::describe(variant)?);
        log::debug!(
            "Registered metadata of {} variant {}",
            metadata.entity,
            variant
        );
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, metadata.clone());
        Ok(metadata)
    }

    /// Whether the metadata of `E` for `variant` was already built.
    pub fn contains<E: Entity>(&self, variant: Variant) -> bool {
        self.cached(&(TypeId::of::<E>(), variant)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnDef, Value, entity_fields};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Counted {
        id: i32,
    }

    impl Entity for Counted {
        fn describe(variant: Variant) -> Result<EntityMetadata> {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            EntityMetadata::builder("Counted", variant)
                .table("counted")
                .column(ColumnDef::new("id", Value::Int32(None)).key())
                .build()
        }
        entity_fields!(id);
    }

    #[test]
    fn builds_once_under_concurrency() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Counted::metadata(0).expect("metadata")))
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(Registry::global().contains::<Counted>(0));
        assert!(!Registry::global().contains::<Counted>(7));
    }
}
