use std::sync::Arc;

use costreport_core::StorageBackend;

use crate::{
    clock::Clock, costs::CostService, report_cache::ReportCache, sequence::SequenceAllocator,
    users::UserService,
};

/// Every component wired to one storage backend.
pub struct Services {
    pub reports: ReportCache,
    pub costs: CostService,
    pub users: UserService,
    pub sequences: SequenceAllocator,
}

impl Services {
    pub fn new<S: StorageBackend + 'static>(storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let sequences = SequenceAllocator::new(storage.clone());
        Self {
            reports: ReportCache::new(storage.clone(), storage.clone(), clock.clone()),
            costs: CostService::new(storage.clone(), storage.clone(), sequences.clone(), clock),
            users: UserService::new(storage.clone(), storage),
            sequences,
        }
    }
}
