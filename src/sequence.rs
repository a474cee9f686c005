use std::sync::Arc;

use costreport_core::SequenceStore;

use crate::error::Error;

/// Scope name for a `(model, field)` pair, e.g. `cost.id`.
pub fn scope(model: &str, field: &str) -> String {
    format!("{}.{}", model.to_lowercase(), field.to_lowercase())
}

/// Hands out durable numeric ids, unique and increasing per scope.
///
/// Values may skip (an allocation whose caller later failed is never handed
/// out again) but never repeat, and they carry no ordering relative to the
/// order in which concurrent callers arrived.
#[derive(Clone)]
pub struct SequenceAllocator {
    store: Arc<dyn SequenceStore>,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self { store }
    }

    pub fn next(&self, scope: &str) -> Result<u64, Error> {
        if scope.trim().is_empty() {
            return Err(Error::Validation("sequence scope must not be empty".to_string()));
        }
        let value = self.store.next_value(scope)?;
        metrics::increment_counter!("sequence_allocations_total");
        tracing::trace!(scope, value, "Sequence value allocated");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costreport_core::StorageError;
    use costreport_memory::InMemoryStorage;
    use std::collections::HashSet;

    struct DownStore;

    impl SequenceStore for DownStore {
        fn next_value(&self, _scope: &str) -> Result<u64, StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn test_scope_naming() {
        assert_eq!(scope("Cost", "id"), "cost.id");
    }

    #[test]
    fn test_first_value_is_one() {
        let allocator = SequenceAllocator::new(Arc::new(InMemoryStorage::new()));
        assert_eq!(allocator.next("cost.id").unwrap(), 1);
        assert_eq!(allocator.next("cost.id").unwrap(), 2);
        assert_eq!(allocator.next("user.id").unwrap(), 1);
    }

    #[test]
    fn test_empty_scope_rejected() {
        let allocator = SequenceAllocator::new(Arc::new(InMemoryStorage::new()));
        assert!(matches!(allocator.next("  "), Err(Error::Validation(_))));
    }

    #[test]
    fn test_store_failure_surfaces_as_unavailable() {
        let allocator = SequenceAllocator::new(Arc::new(DownStore));
        assert!(matches!(allocator.next("cost.id"), Err(Error::StoreUnavailable(_))));
    }

    #[test]
    fn test_concurrent_allocations_unique() {
        let allocator = SequenceAllocator::new(Arc::new(InMemoryStorage::new()));
        let values: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| (0..50).map(|_| allocator.next("cost.id").unwrap()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let distinct: HashSet<u64> = values.iter().copied().collect();
        assert_eq!(distinct.len(), 800);
        assert_eq!(values.iter().max(), Some(&800));
    }
}
