//! Typed per-schedule key/value store shared by the steps of a workflow.
//!
//! Every scheduled run owns one `WorkflowContext`. Entries carry a tagged
//! value (`ContextValue`) and a scope: `Replicated` entries are persisted
//! after every step and restored on resume, `Local` entries hold
//! process-only handles and never leave memory. A small set of reserved
//! keys tracks the run's position in the workflow; user code cannot write
//! them directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::{BTreeMap, HashMap};

/// Reserved context keys, writable only through [`WorkflowContext::set_reserved`].
pub mod reserved {
    /// Name of the workflow this run executes. Fixed, always serialized.
    pub const WORKFLOW_NAME: &str = "workflow_name";
    /// Name of the action currently being executed. Fixed, always serialized.
    pub const ACTION_NAME: &str = "action_name";
    /// Index of the next step to run within the current action. Fixed,
    /// always serialized.
    pub const STEP_INDEX: &str = "step_index";
    /// Journal of `(action, step)` pairs completed so far, in execution
    /// order. Drives the backward walk on failure.
    pub const EXECUTED_STEPS: &str = "executed_steps";
    /// Set once a step failure flips the run into the revert phase.
    pub const REVERTING: &str = "reverting";
    /// Action that was executing when the failure occurred.
    pub const FAILED_ACTION: &str = "failed_action";
    /// Human-readable description of the most recent failure.
    pub const LAST_ERROR: &str = "last_error";
    /// Set by a cancellation request; evaluated at the next continuation.
    pub const CANCEL_REQUESTED: &str = "cancel_requested";
    /// Error action the run transitioned to after a revert. A run hops to
    /// an error action at most once; this marker enforces it.
    pub const ERROR_ACTION: &str = "error_action";
    /// Durable terminal marker: "success" or "failed".
    pub const TERMINAL: &str = "terminal";
    /// Local-scope slot for an in-process handle owned by the run.
    pub const OWNER_HANDLE: &str = "owner_handle";

    pub const ALL: &[&str] = &[
        WORKFLOW_NAME,
        ACTION_NAME,
        STEP_INDEX,
        EXECUTED_STEPS,
        REVERTING,
        FAILED_ACTION,
        LAST_ERROR,
        CANCEL_REQUESTED,
        ERROR_ACTION,
        TERMINAL,
        OWNER_HANDLE,
    ];
}

/// Whether `key` belongs to the reserved namespace.
pub fn is_reserved_key(key: &str) -> bool {
    reserved::ALL.contains(&key)
}

/// Tagged value stored in a workflow context.
///
/// The tag survives serialization, so a typed read after a crash-resume
/// sees exactly the kind that was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Json(serde_json::Value),
}

impl ContextValue {
    /// Name of the stored kind, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ContextValue::Text(_) => "text",
            ContextValue::Integer(_) => "integer",
            ContextValue::Float(_) => "float",
            ContextValue::Boolean(_) => "boolean",
            ContextValue::Json(_) => "json",
        }
    }
}

/// Conversion between Rust types and [`ContextValue`] variants.
///
/// Implemented for `String`, `i64`, `f64`, `bool`, and `serde_json::Value`.
pub trait ContextType: Sized {
    fn kind() -> &'static str;
    fn into_value(self) -> ContextValue;
    fn from_value(value: &ContextValue) -> Option<Self>;
}

impl ContextType for String {
    fn kind() -> &'static str {
        "text"
    }
    fn into_value(self) -> ContextValue {
        ContextValue::Text(self)
    }
    fn from_value(value: &ContextValue) -> Option<Self> {
        match value {
            ContextValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl ContextType for i64 {
    fn kind() -> &'static str {
        "integer"
    }
    fn into_value(self) -> ContextValue {
        ContextValue::Integer(self)
    }
    fn from_value(value: &ContextValue) -> Option<Self> {
        match value {
            ContextValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl ContextType for f64 {
    fn kind() -> &'static str {
        "float"
    }
    fn into_value(self) -> ContextValue {
        ContextValue::Float(self)
    }
    fn from_value(value: &ContextValue) -> Option<Self> {
        match value {
            ContextValue::Float(x) => Some(*x),
            _ => None,
        }
    }
}

impl ContextType for bool {
    fn kind() -> &'static str {
        "boolean"
    }
    fn into_value(self) -> ContextValue {
        ContextValue::Boolean(self)
    }
    fn from_value(value: &ContextValue) -> Option<Self> {
        match value {
            ContextValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl ContextType for serde_json::Value {
    fn kind() -> &'static str {
        "json"
    }
    fn into_value(self) -> ContextValue {
        ContextValue::Json(self)
    }
    fn from_value(value: &ContextValue) -> Option<Self> {
        match value {
            ContextValue::Json(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Scope of a context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueScope {
    /// Process-only. Never serialized, lost on crash.
    Local,
    /// Persisted after every step and restored on resume.
    Replicated,
}

/// Errors from context reads and writes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("key '{0}' not found in context")]
    NotInContext(String),

    #[error("type mismatch for key '{key}': requested {requested}, stored {stored}")]
    GetTypeMismatch {
        key: String,
        requested: &'static str,
        stored: &'static str,
    },

    #[error("key '{0}' is reserved and cannot be written by workflow code")]
    NotAllowedContextKey(String),
}

/// The persisted form of a context: its replicated entries, keyed by name.
pub type SerializedContext = BTreeMap<String, ContextValue>;

#[derive(Debug, Clone)]
struct ContextEntry {
    value: ContextValue,
    scope: ValueScope,
}

/// Typed key/value store for one scheduled workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    entries: HashMap<String, ContextEntry>,
}

impl WorkflowContext {
    /// Create a fresh context positioned at the first step of `entry_action`.
    ///
    /// Seeds the three fixed reserved keys, so every serialized context
    /// carries them.
    pub fn new(workflow_name: &str, entry_action: &str) -> Self {
        let mut ctx = Self {
            entries: HashMap::new(),
        };
        ctx.set_reserved(
            reserved::WORKFLOW_NAME,
            workflow_name.to_string(),
            ValueScope::Replicated,
        );
        ctx.set_reserved(
            reserved::ACTION_NAME,
            entry_action.to_string(),
            ValueScope::Replicated,
        );
        ctx.set_reserved(reserved::STEP_INDEX, 0i64, ValueScope::Replicated);
        ctx
    }

    /// Typed read.
    ///
    /// Returns `NotInContext` when the key is absent and `GetTypeMismatch`
    /// when the stored kind differs from the requested one.
    pub fn get<T: ContextType>(&self, key: &str) -> Result<T, ContextError> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| ContextError::NotInContext(key.to_string()))?;
        T::from_value(&entry.value).ok_or_else(|| ContextError::GetTypeMismatch {
            key: key.to_string(),
            requested: T::kind(),
            stored: entry.value.kind(),
        })
    }

    /// Typed write for workflow code. Always replicated.
    ///
    /// Writing a reserved key fails with `NotAllowedContextKey`.
    pub fn set<T: ContextType>(&mut self, key: &str, value: T) -> Result<(), ContextError> {
        if is_reserved_key(key) {
            return Err(ContextError::NotAllowedContextKey(key.to_string()));
        }
        self.entries.insert(
            key.to_string(),
            ContextEntry {
                value: value.into_value(),
                scope: ValueScope::Replicated,
            },
        );
        Ok(())
    }

    /// Untyped variant of [`set`] for callers that already hold a
    /// [`ContextValue`] (e.g. seeding a run from caller-provided entries).
    /// Reserved keys are rejected the same way.
    ///
    /// [`set`]: WorkflowContext::set
    pub fn set_value(&mut self, key: &str, value: ContextValue) -> Result<(), ContextError> {
        if is_reserved_key(key) {
            return Err(ContextError::NotAllowedContextKey(key.to_string()));
        }
        self.entries.insert(
            key.to_string(),
            ContextEntry {
                value,
                scope: ValueScope::Replicated,
            },
        );
        Ok(())
    }

    /// System write path for reserved keys, with an explicit scope.
    pub fn set_reserved<T: ContextType>(&mut self, key: &str, value: T, scope: ValueScope) {
        self.entries.insert(
            key.to_string(),
            ContextEntry {
                value: value.into_value(),
                scope,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove a non-reserved entry. Removing a missing key is a no-op.
    pub fn remove(&mut self, key: &str) -> Result<(), ContextError> {
        if is_reserved_key(key) {
            return Err(ContextError::NotAllowedContextKey(key.to_string()));
        }
        self.entries.remove(key);
        Ok(())
    }

    /// Drop a reserved entry (system bookkeeping cleanup).
    pub(crate) fn clear_reserved(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Snapshot of all replicated entries for persistence.
    ///
    /// The fixed reserved keys are always present; local entries never
    /// appear.
    pub fn get_serialized_context(&self) -> SerializedContext {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.scope == ValueScope::Replicated)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Rebuild a context from its persisted form.
    ///
    /// Round-trips exactly with [`get_serialized_context`]: every imported
    /// entry is replicated, reserved keys are recognized by name.
    ///
    /// [`get_serialized_context`]: WorkflowContext::get_serialized_context
    pub fn import_from_serialized_context(serialized: SerializedContext) -> Self {
        let entries = serialized
            .into_iter()
            .map(|(key, value)| {
                (
                    key,
                    ContextEntry {
                        value,
                        scope: ValueScope::Replicated,
                    },
                )
            })
            .collect();
        Self { entries }
    }
}
