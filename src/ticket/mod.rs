//! Workflow platform ticket model
//!
//! Only the slice of the platform's ticket document that the integration reads
//! or writes is modelled here: steps, tasks, typed fields and comments.

pub mod access_request;
pub mod fields;
pub mod mock;
pub mod repository;

pub use access_request::{
    AccessRequest, CellServices, DesignerResults, DesignerSummary, DeviceSuggestion, GroupChange,
    GroupMember, Hyperlink, MatrixCellViolation, NetworkObject, RiskAnalysisResult,
    SecurityPolicyViolation, SecurityZoneMatrix, Target, VerifierResult, ViolationResource,
};
pub use fields::{render_fields, Field, FieldError, FieldKind, FieldValue};
pub use mock::{MockReassignment, MockTicketRepository};
pub use repository::{
    FieldRef, HistoryActivity, PollPolicy, RepositoryError, RestTicketRepository, TaskRef,
    TicketRepository,
};

use serde::{Deserialize, Serialize};

/// Marker the platform uses for an unassigned task's assignee and status
pub const NOT_AVAILABLE: &str = "N/A";

/// Task status values the integration cares about
pub mod task_status {
    pub const ASSIGNED: &str = "ASSIGNED";
    pub const WAITING_TO_BE_ASSIGNED: &str = "WAITING_TO_BE_ASSIGNED";
    pub const DONE: &str = "DONE";
}

const CLOSED_STATUS: &str = "Ticket Closed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: u64,
    pub subject: String,
    pub workflow: Workflow,
    #[serde(default)]
    pub requester: String,
    pub status: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// A field together with the step and task that own it
#[derive(Debug, Clone, Copy)]
pub struct FieldLocation<'a> {
    pub step: &'a Step,
    pub task: &'a Task,
    pub field: &'a Field,
}

impl FieldLocation<'_> {
    pub fn field_ref(&self, ticket_id: u64) -> FieldRef {
        FieldRef {
            task: TaskRef {
                ticket_id,
                step_id: self.step.id,
                task_id: self.task.id,
            },
            field_id: self.field.id,
        }
    }
}

impl Ticket {
    pub fn is_closed(&self) -> bool {
        self.status.eq_ignore_ascii_case(CLOSED_STATUS)
    }

    /// The step the ticket is currently in (the most recent one)
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// The step before the current one
    pub fn previous_step(&self) -> Option<&Step> {
        self.steps.len().checked_sub(2).map(|i| &self.steps[i])
    }

    /// Last task of the last step
    pub fn last_task(&self) -> Option<&Task> {
        self.last_step().and_then(Step::last_task)
    }

    pub fn step_by_name(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn has_no_pending_tasks(&self) -> bool {
        self.current_step()
            .map(|step| !step.tasks.iter().any(Task::is_pending))
            .unwrap_or(true)
    }

    /// Walk steps from the most recent to the oldest and return the first
    /// field of `kind` found on a step's last task.
    pub fn newest_field_of_kind(&self, kind: FieldKind) -> Option<FieldLocation<'_>> {
        self.newest_fields_of_kind(kind).next()
    }

    /// Per step, newest first, the first field of `kind` on the step's last task
    pub fn newest_fields_of_kind(
        &self,
        kind: FieldKind,
    ) -> impl Iterator<Item = FieldLocation<'_>> + '_ {
        self.steps.iter().rev().filter_map(move |step| {
            let task = step.last_task()?;
            let field = task.fields_of_kind(kind).into_iter().next()?;
            Some(FieldLocation { step, task, field })
        })
    }

    pub fn task_ref(&self, step: &Step, task: &Task) -> TaskRef {
        TaskRef {
            ticket_id: self.id,
            step_id: step.id,
            task_id: task.id,
        }
    }

    /// Reference to the last task of the last step
    pub fn last_task_ref(&self) -> Option<TaskRef> {
        let step = self.last_step()?;
        let task = step.last_task()?;
        Some(self.task_ref(step, task))
    }
}

impl Step {
    pub fn last_task(&self) -> Option<&Task> {
        self.tasks.last()
    }

    /// Fields named `name` (case-insensitive) across all tasks of the step
    pub fn fields_named(&self, name: &str) -> Vec<&Field> {
        self.tasks
            .iter()
            .flat_map(|task| task.fields_named(name))
            .collect()
    }
}

impl Task {
    pub fn fields_named(&self, name: &str) -> Vec<&Field> {
        let wanted = name.to_lowercase();
        self.fields
            .iter()
            .filter(|f| f.name.to_lowercase() == wanted)
            .collect()
    }

    pub fn field_named_mut(&mut self, name: &str) -> Option<&mut Field> {
        let wanted = name.to_lowercase();
        self.fields
            .iter_mut()
            .find(|f| f.name.to_lowercase() == wanted)
    }

    pub fn fields_of_kind(&self, kind: FieldKind) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.kind() == kind).collect()
    }

    pub fn is_waiting_to_be_assigned(&self) -> bool {
        self.status == task_status::WAITING_TO_BE_ASSIGNED
    }

    pub fn is_pending(&self) -> bool {
        self.status == task_status::ASSIGNED || self.status == task_status::WAITING_TO_BE_ASSIGNED
    }

    /// Whether the task has neither an assignee nor a status
    pub fn is_unattended(&self) -> bool {
        self.assignee == NOT_AVAILABLE && self.status == NOT_AVAILABLE
    }

    pub fn mark_as_done(&mut self) {
        self.status = task_status::DONE.to_string();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn text_field(id: u64, name: &str, text: &str) -> Field {
        Field {
            id,
            name: name.to_string(),
            value: FieldValue::Text {
                text: Some(text.to_string()),
            },
        }
    }

    pub(crate) fn task(id: u64, assignee: &str, status: &str, fields: Vec<Field>) -> Task {
        Task {
            id,
            name: "Default".to_string(),
            assignee: assignee.to_string(),
            status: status.to_string(),
            fields,
        }
    }

    pub(crate) fn step(id: u64, name: &str, tasks: Vec<Task>) -> Step {
        Step {
            id,
            name: name.to_string(),
            skipped: false,
            tasks,
        }
    }

    pub(crate) fn ticket(steps: Vec<Step>) -> Ticket {
        Ticket {
            id: 42,
            subject: "Open port 443 to web farm".to_string(),
            workflow: Workflow {
                id: 7,
                name: "Firewall Change".to_string(),
            },
            requester: "r.ortiz".to_string(),
            status: "In Progress".to_string(),
            steps,
            comments: vec![],
        }
    }

    #[test]
    fn test_fields_named_is_case_insensitive() {
        let t = task(1, "a", task_status::DONE, vec![text_field(1, "Business Owner", "x")]);
        assert_eq!(t.fields_named("business owner").len(), 1);
        assert_eq!(t.fields_named("BUSINESS OWNER").len(), 1);
        assert!(t.fields_named("owner").is_empty());
    }

    #[test]
    fn test_field_lookup_folds_non_ascii_case() {
        let mut t = task(1, "a", task_status::DONE, vec![text_field(1, "Bénéficiaire", "x")]);
        assert_eq!(t.fields_named("BÉNÉFICIAIRE").len(), 1);
        assert_eq!(t.field_named_mut("bÉnÉficiaire").map(|f| f.id), Some(1));
        assert!(t.fields_named("BENEFICIAIRE").is_empty());
    }

    #[test]
    fn test_previous_step_requires_two_steps() {
        let one = ticket(vec![step(1, "Submit", vec![])]);
        assert!(one.previous_step().is_none());

        let two = ticket(vec![step(1, "Submit", vec![]), step(2, "Review", vec![])]);
        assert_eq!(two.previous_step().unwrap().name, "Submit");
        assert_eq!(two.current_step().unwrap().name, "Review");
    }

    #[test]
    fn test_has_no_pending_tasks_checks_current_step_only() {
        let t = ticket(vec![
            step(1, "Submit", vec![task(1, "a", task_status::ASSIGNED, vec![])]),
            step(2, "Review", vec![task(2, "b", task_status::DONE, vec![])]),
        ]);
        assert!(t.has_no_pending_tasks());

        let pending = ticket(vec![step(
            1,
            "Submit",
            vec![task(1, "a", task_status::WAITING_TO_BE_ASSIGNED, vec![])],
        )]);
        assert!(!pending.has_no_pending_tasks());
    }

    #[test]
    fn test_newest_field_of_kind_prefers_latest_step() {
        let t = ticket(vec![
            step(1, "Submit", vec![task(1, "a", "DONE", vec![text_field(10, "A", "old")])]),
            step(2, "Review", vec![task(2, "b", "DONE", vec![text_field(20, "B", "new")])]),
        ]);
        let found = t.newest_field_of_kind(FieldKind::Text).unwrap();
        assert_eq!(found.field.id, 20);
        assert_eq!(found.step.name, "Review");
        assert_eq!(found.field_ref(t.id).task.step_id, 2);
    }

    #[test]
    fn test_unattended_task() {
        assert!(task(1, NOT_AVAILABLE, NOT_AVAILABLE, vec![]).is_unattended());
        assert!(!task(1, "jdoe", NOT_AVAILABLE, vec![]).is_unattended());
    }
}
