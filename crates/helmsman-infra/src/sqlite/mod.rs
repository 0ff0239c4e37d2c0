//! SQLite persistence for the scheduler.

pub mod context;
pub mod lease;
pub mod pool;

pub use context::SqliteContextRepository;
pub use lease::SqliteLeaseRepository;
pub use pool::DatabasePool;
