//! Repository trait definitions ("ports") implemented by the
//! infrastructure layer, plus in-memory implementations for tests and
//! single-process deployments.

pub mod context;
pub mod lease;
pub mod memory;

pub use context::ContextRepository;
pub use lease::LeaseRepository;
pub use memory::{InMemoryContextRepository, InMemoryLeaseRepository};
