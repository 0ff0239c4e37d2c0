//! Workflow engine logic and repository trait definitions for Helmsman.
//!
//! This crate defines the "ports" (repository traits) that the
//! infrastructure layer implements. It depends only on `helmsman-types` --
//! never on `helmsman-infra` or any database/IO crate.

pub mod repository;
pub mod scheduler;
pub mod service;
pub mod workflow;
