//! Core types and traits for costreport storage backends.
//!
//! This crate provides the storage traits (`CostSource`, `ReportStore`,
//! `SequenceStore`, `UserStore`) and the models they exchange, enabling
//! pluggable storage implementations in separate crates.

pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{parse_integral, Category, CostRecord, InvalidCategory, InvalidKey, ReportKey, User};
pub use models::report::{CategoryCosts, CostItem, Report};
pub use models::write::{CreateCostCommand, CreateUserCommand};
pub use storage::{
    CostSource, CostStore, ReportStore, SequenceStore, StorageBackend, StorageError, UserStore,
};
