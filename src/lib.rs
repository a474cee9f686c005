pub mod api;
pub mod clock;
pub mod config;
pub mod costs;
pub mod error;
pub mod report_cache;
pub mod sequence;
pub mod services;
pub mod users;
