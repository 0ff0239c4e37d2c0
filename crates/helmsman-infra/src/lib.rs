//! Infrastructure layer for Helmsman.
//!
//! Contains implementations of the repository traits defined in
//! `helmsman-core`: SQLite persistence for step leases and workflow
//! contexts, plus configuration loading.

pub mod config;
pub mod sqlite;
