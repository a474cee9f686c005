use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{report::Report, CostRecord, ReportKey, User};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("report already exists: {0}")]
    KeyConflict(ReportKey),
    #[error("user already exists: {0}")]
    UserAlreadyExists(i64),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Read side of the cost collection.
pub trait CostSource: Send + Sync {
    /// Costs of one user in one calendar month, in store order.
    fn find_costs(&self, user_id: i64, year: i32, month: u8) -> Result<Vec<CostRecord>, StorageError>;
    fn total_for_user(&self, user_id: i64) -> Result<Decimal, StorageError>;
}

pub trait CostStore: CostSource {
    fn insert_cost(&self, cost: &CostRecord) -> Result<(), StorageError>;
}

/// Durable storage for materialized reports, unique per [`ReportKey`].
pub trait ReportStore: Send + Sync {
    fn find_report(&self, key: &ReportKey) -> Result<Option<Report>, StorageError>;

    /// Inserts `report` if no report exists under its key. An existing report
    /// is left untouched and the call fails with [`StorageError::KeyConflict`].
    /// The insert is all-or-nothing: a failed call stores nothing.
    fn insert_report(&self, report: &Report) -> Result<(), StorageError>;

    fn delete_report(&self, key: &ReportKey) -> Result<bool, StorageError>;
}

/// Named monotonically-increasing counters.
pub trait SequenceStore: Send + Sync {
    /// Increments the counter for `scope` and returns the new value as one
    /// atomic step. A missing counter starts at 0, so the first call returns 1.
    fn next_value(&self, scope: &str) -> Result<u64, StorageError>;
}

pub trait UserStore: Send + Sync {
    fn create_user(&self, user: &User) -> Result<(), StorageError>;
    fn find_user(&self, id: i64) -> Result<Option<User>, StorageError>;
    fn list_users(&self) -> Result<Vec<User>, StorageError>;
}

/// Everything a full backend provides.
pub trait StorageBackend: CostStore + ReportStore + SequenceStore + UserStore {}

impl<T: CostStore + ReportStore + SequenceStore + UserStore> StorageBackend for T {}
