//! Shared domain types for Helmsman.
//!
//! This crate contains the core domain types used across the Helmsman
//! workflow engine: schedule/worker/step identifiers, leases, service
//! lifecycle states, configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod id;
pub mod lease;
pub mod service;
