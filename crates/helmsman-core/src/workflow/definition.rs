//! Workflow definitions: named actions holding ordered steps, linked into
//! a finite state machine by `next_action` / `on_error_action` edges.
//!
//! Workflows are built explicitly through `WorkflowBuilder` and validated
//! once at build time; after that they are immutable and shared. There is
//! no global registration, so two engines can hold different workflow sets.

use thiserror::Error;

use std::collections::HashMap;

use super::step::{BoxStep, Step};

/// Errors raised when a workflow definition fails validation.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow validation failed: {0}")]
    ValidationError(String),
}

/// A named state of the workflow FSM: an ordered list of steps plus the
/// transitions taken when the action completes or fails.
///
/// Steps run sequentially in declared order. Groups whose steps are
/// mutually order-independent still run sequentially; declaration order is
/// the only execution order.
pub struct Action {
    name: String,
    steps: Vec<BoxStep>,
    next_action: Option<String>,
    on_error_action: Option<String>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            next_action: None,
            on_error_action: None,
        }
    }

    /// Append a step. Declaration order is execution order.
    pub fn step<T: Step + 'static>(mut self, step: T) -> Self {
        self.steps.push(BoxStep::new(step));
        self
    }

    /// Action to transition to after all steps complete.
    /// None makes this a terminal success action.
    pub fn next_action(mut self, name: impl Into<String>) -> Self {
        self.next_action = Some(name.into());
        self
    }

    /// Action to transition to after a failure has been fully reverted.
    /// None makes a failure terminal.
    pub fn on_error_action(mut self, name: impl Into<String>) -> Self {
        self.on_error_action = Some(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[BoxStep] {
        &self.steps
    }

    /// Step lookup by name, used by the backward walk.
    pub fn find_step(&self, name: &str) -> Option<&BoxStep> {
        self.steps.iter().find(|s| s.name() == name)
    }

    pub fn next_action_name(&self) -> Option<&str> {
        self.next_action.as_deref()
    }

    pub fn on_error_action_name(&self) -> Option<&str> {
        self.on_error_action.as_deref()
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("next_action", &self.next_action)
            .field("on_error_action", &self.on_error_action)
            .finish()
    }
}

/// An immutable, validated workflow definition.
#[derive(Debug)]
pub struct Workflow {
    name: String,
    entry_action: String,
    actions: HashMap<String, Action>,
}

impl Workflow {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The action a fresh schedule starts in (the first one added).
    pub fn entry_action(&self) -> &str {
        &self.entry_action
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }
}

/// Builder for [`Workflow`]. The first action added becomes the entry
/// action; `build` validates the whole FSM.
pub struct WorkflowBuilder {
    name: String,
    actions: Vec<Action>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Validate and freeze the definition.
    ///
    /// Rejects empty workflows, actions without steps, duplicate action or
    /// step names, and `next_action` / `on_error_action` edges pointing at
    /// actions that do not exist.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "workflow name cannot be empty".to_string(),
            ));
        }
        let entry_action = match self.actions.first() {
            Some(action) => action.name.clone(),
            None => {
                return Err(WorkflowError::ValidationError(format!(
                    "workflow '{}' has no actions",
                    self.name
                )));
            }
        };

        let mut actions: HashMap<String, Action> = HashMap::new();
        for action in &self.actions {
            if action.steps.is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "action '{}' has no steps",
                    action.name
                )));
            }
            let mut seen_steps = std::collections::HashSet::new();
            for step in &action.steps {
                if !seen_steps.insert(step.name().to_string()) {
                    return Err(WorkflowError::ValidationError(format!(
                        "action '{}' declares step '{}' more than once",
                        action.name,
                        step.name()
                    )));
                }
            }
        }
        for action in self.actions {
            let name = action.name.clone();
            if actions.insert(name.clone(), action).is_some() {
                return Err(WorkflowError::ValidationError(format!(
                    "duplicate action name '{name}'"
                )));
            }
        }
        for action in actions.values() {
            for (edge, target) in [
                ("next_action", action.next_action.as_deref()),
                ("on_error_action", action.on_error_action.as_deref()),
            ] {
                if let Some(target) = target {
                    if !actions.contains_key(target) {
                        return Err(WorkflowError::ValidationError(format!(
                            "action '{}' has {edge} pointing at unknown action '{target}'",
                            action.name
                        )));
                    }
                }
            }
        }

        Ok(Workflow {
            name: self.name,
            entry_action,
            actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::WorkflowContext;
    use crate::workflow::step::StepError;

    struct Noop(&'static str);

    impl Step for Noop {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _ctx: &mut WorkflowContext) -> Result<(), StepError> {
            Ok(())
        }
    }

    #[test]
    fn build_links_actions_and_picks_entry() {
        let workflow = WorkflowBuilder::new("start_service")
            .action(Action::new("create").step(Noop("a")).next_action("monitor"))
            .action(Action::new("monitor").step(Noop("b")))
            .build()
            .unwrap();

        assert_eq!(workflow.name(), "start_service");
        assert_eq!(workflow.entry_action(), "create");
        assert_eq!(
            workflow.action("create").unwrap().next_action_name(),
            Some("monitor")
        );
        assert!(workflow.action("missing").is_none());
    }

    #[test]
    fn build_rejects_empty_workflow() {
        let err = WorkflowBuilder::new("empty").build().unwrap_err();
        assert!(err.to_string().contains("has no actions"));
    }

    #[test]
    fn build_rejects_action_without_steps() {
        let err = WorkflowBuilder::new("wf")
            .action(Action::new("hollow"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("'hollow' has no steps"));
    }

    #[test]
    fn build_rejects_duplicate_action_names() {
        let err = WorkflowBuilder::new("wf")
            .action(Action::new("twice").step(Noop("a")))
            .action(Action::new("twice").step(Noop("b")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate action name 'twice'"));
    }

    #[test]
    fn build_rejects_duplicate_step_names_within_action() {
        let err = WorkflowBuilder::new("wf")
            .action(Action::new("a").step(Noop("same")).step(Noop("same")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("step 'same' more than once"));
    }

    #[test]
    fn build_rejects_dangling_next_action() {
        let err = WorkflowBuilder::new("wf")
            .action(Action::new("a").step(Noop("s")).next_action("ghost"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown action 'ghost'"));
    }

    #[test]
    fn build_rejects_dangling_on_error_action() {
        let err = WorkflowBuilder::new("wf")
            .action(Action::new("a").step(Noop("s")).on_error_action("ghost"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("on_error_action"));
    }

    #[test]
    fn find_step_locates_by_name() {
        let workflow = WorkflowBuilder::new("wf")
            .action(Action::new("a").step(Noop("first")).step(Noop("second")))
            .build()
            .unwrap();
        let action = workflow.action("a").unwrap();
        assert_eq!(action.find_step("second").unwrap().name(), "second");
        assert!(action.find_step("third").is_none());
    }
}
