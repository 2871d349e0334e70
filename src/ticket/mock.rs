//! In-memory ticket repository for tests and dry runs

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::access_request::DesignerResults;
use super::repository::{FieldRef, HistoryActivity, RepositoryError, TaskRef, TicketRepository};
use super::{task_status, Field, Task, Ticket};

#[derive(Debug, Clone)]
pub struct MockReassignment {
    pub task: TaskRef,
    pub username: String,
    pub comment: String,
}

/// Ticket repository backed by in-memory snapshots
///
/// Each ticket id holds a queue of snapshots: `get_ticket` returns the front
/// snapshot and advances the queue while more than one remains, which lets a
/// test script how the ticket changes between fetches. Writes are applied to
/// every queued snapshot.
#[derive(Clone, Default)]
pub struct MockTicketRepository {
    hostname: String,
    tickets: Arc<Mutex<HashMap<u64, VecDeque<Ticket>>>>,
    get_calls: Arc<Mutex<usize>>,
    failing_get_call: Arc<Mutex<Option<usize>>>,
    pub field_writes: Arc<Mutex<Vec<(FieldRef, Field)>>>,
    pub task_writes: Arc<Mutex<Vec<(TaskRef, Task)>>>,
    pub reassignments: Arc<Mutex<Vec<MockReassignment>>>,
    pub cancelled: Arc<Mutex<Vec<u64>>>,
    participants: Arc<Mutex<HashMap<(u64, String, String), Vec<String>>>>,
    history: Arc<Mutex<HashMap<u64, Vec<HistoryActivity>>>>,
    designer_results: Arc<Mutex<Option<DesignerResults>>>,
    designer_commands: Arc<Mutex<HashMap<u64, String>>>,
}

impl MockTicketRepository {
    pub fn new() -> Self {
        Self {
            hostname: "workflow.example.com".to_string(),
            ..Self::default()
        }
    }

    pub fn insert_ticket(&self, ticket: Ticket) {
        self.push_ticket_sequence(vec![ticket]);
    }

    /// Replace the snapshots returned for a ticket id, in fetch order
    pub fn push_ticket_sequence(&self, snapshots: Vec<Ticket>) {
        if let Some(first) = snapshots.first() {
            let id = first.id;
            self.tickets
                .lock()
                .unwrap()
                .insert(id, snapshots.into_iter().collect());
        }
    }

    /// Make the `call`-th `get_ticket` (counting from 1) fail as unreachable
    pub fn fail_get_ticket_call(&self, call: usize) {
        *self.failing_get_call.lock().unwrap() = Some(call);
    }

    pub fn get_ticket_calls(&self) -> usize {
        *self.get_calls.lock().unwrap()
    }

    /// The snapshot the next `get_ticket` would return
    pub fn current_ticket(&self, ticket_id: u64) -> Option<Ticket> {
        self.tickets
            .lock()
            .unwrap()
            .get(&ticket_id)
            .and_then(|queue| queue.front().cloned())
    }

    pub fn set_participants(&self, workflow_id: u64, step: &str, task: &str, users: Vec<String>) {
        self.participants
            .lock()
            .unwrap()
            .insert((workflow_id, step.to_string(), task.to_string()), users);
    }

    pub fn set_history(&self, ticket_id: u64, history: Vec<HistoryActivity>) {
        self.history.lock().unwrap().insert(ticket_id, history);
    }

    pub fn set_designer_results(&self, results: DesignerResults) {
        *self.designer_results.lock().unwrap() = Some(results);
    }

    pub fn set_designer_commands(&self, management_id: u64, commands: &str) {
        self.designer_commands
            .lock()
            .unwrap()
            .insert(management_id, commands.to_string());
    }

    pub fn field_write_count(&self) -> usize {
        self.field_writes.lock().unwrap().len()
    }

    fn update_task(&self, task_ref: &TaskRef, update: impl Fn(&mut Task)) {
        let mut tickets = self.tickets.lock().unwrap();
        if let Some(queue) = tickets.get_mut(&task_ref.ticket_id) {
            for snapshot in queue.iter_mut() {
                let task = snapshot
                    .steps
                    .iter_mut()
                    .filter(|s| s.id == task_ref.step_id)
                    .flat_map(|s| s.tasks.iter_mut())
                    .find(|t| t.id == task_ref.task_id);
                if let Some(task) = task {
                    update(task);
                }
            }
        }
    }
}

impl TicketRepository for MockTicketRepository {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn get_ticket(&self, ticket_id: u64) -> Result<Ticket, RepositoryError> {
        let call = {
            let mut calls = self.get_calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if *self.failing_get_call.lock().unwrap() == Some(call) {
            return Err(RepositoryError::Network(format!("fetch {call} of ticket {ticket_id} refused")));
        }
        let mut tickets = self.tickets.lock().unwrap();
        let queue = tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("/tickets/{ticket_id}")))?;
        if queue.len() > 1 {
            queue
                .pop_front()
                .ok_or_else(|| RepositoryError::NotFound(format!("/tickets/{ticket_id}")))
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(format!("/tickets/{ticket_id}")))
        }
    }

    fn put_field(&self, field_ref: &FieldRef, field: &Field) -> Result<(), RepositoryError> {
        self.field_writes
            .lock()
            .unwrap()
            .push((*field_ref, field.clone()));
        self.update_task(&field_ref.task, |task| {
            if let Some(existing) = task.fields.iter_mut().find(|f| f.id == field_ref.field_id) {
                *existing = field.clone();
            }
        });
        Ok(())
    }

    fn put_task(&self, task_ref: &TaskRef, task: &Task) -> Result<(), RepositoryError> {
        self.task_writes
            .lock()
            .unwrap()
            .push((*task_ref, task.clone()));
        self.update_task(task_ref, |existing| *existing = task.clone());
        Ok(())
    }

    fn reassign_task(
        &self,
        task_ref: &TaskRef,
        username: &str,
        comment: &str,
    ) -> Result<(), RepositoryError> {
        self.reassignments.lock().unwrap().push(MockReassignment {
            task: *task_ref,
            username: username.to_string(),
            comment: comment.to_string(),
        });
        self.update_task(task_ref, |task| {
            task.assignee = username.to_string();
            task.status = task_status::ASSIGNED.to_string();
        });
        Ok(())
    }

    fn task_participants(
        &self,
        workflow_id: u64,
        step_name: &str,
        task_name: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .get(&(workflow_id, step_name.to_string(), task_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn ticket_history(&self, ticket_id: u64) -> Result<Vec<HistoryActivity>, RepositoryError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(&ticket_id)
            .cloned()
            .unwrap_or_default())
    }

    fn cancel_ticket(&self, ticket_id: u64) -> Result<(), RepositoryError> {
        self.cancelled.lock().unwrap().push(ticket_id);
        Ok(())
    }

    fn designer_results(
        &self,
        _field_ref: &FieldRef,
    ) -> Result<Option<DesignerResults>, RepositoryError> {
        Ok(self.designer_results.lock().unwrap().clone())
    }

    fn designer_results_json(
        &self,
        _field_ref: &FieldRef,
    ) -> Result<Option<String>, RepositoryError> {
        let results = self.designer_results.lock().unwrap().clone();
        results
            .map(|r| serde_json::to_string(&r).map_err(|e| RepositoryError::Decode(e.to_string())))
            .transpose()
    }

    fn designer_commands(
        &self,
        _field_ref: &FieldRef,
        management_id: u64,
    ) -> Result<String, RepositoryError> {
        self.designer_commands
            .lock()
            .unwrap()
            .get(&management_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("commands for {management_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::tests::{step, task, text_field, ticket};

    #[test]
    fn test_reassign_updates_stored_ticket() {
        let repo = MockTicketRepository::new();
        repo.insert_ticket(ticket(vec![step(
            1,
            "Review",
            vec![task(5, "N/A", task_status::WAITING_TO_BE_ASSIGNED, vec![])],
        )]));

        let task_ref = TaskRef {
            ticket_id: 42,
            step_id: 1,
            task_id: 5,
        };
        repo.reassign_task(&task_ref, "integration", "why").unwrap();

        let stored = repo.current_ticket(42).unwrap();
        let last = stored.last_task().unwrap();
        assert_eq!(last.assignee, "integration");
        assert_eq!(last.status, task_status::ASSIGNED);
        assert_eq!(repo.reassignments.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_put_field_replaces_field() {
        let repo = MockTicketRepository::new();
        repo.insert_ticket(ticket(vec![step(
            1,
            "Review",
            vec![task(5, "a", "DONE", vec![text_field(9, "Result", "")])],
        )]));

        let field_ref = FieldRef {
            task: TaskRef {
                ticket_id: 42,
                step_id: 1,
                task_id: 5,
            },
            field_id: 9,
        };
        repo.put_field(&field_ref, &text_field(9, "Result", "ok")).unwrap();

        let stored = repo.current_ticket(42).unwrap();
        assert_eq!(stored.last_task().unwrap().fields[0].render(), "ok");
    }

    #[test]
    fn test_scripted_fetch_failure_hits_one_call() {
        let repo = MockTicketRepository::new();
        repo.insert_ticket(ticket(vec![]));
        repo.fail_get_ticket_call(2);
        assert!(repo.get_ticket(42).is_ok());
        assert!(matches!(repo.get_ticket(42), Err(RepositoryError::Network(_))));
        assert!(repo.get_ticket(42).is_ok());
    }

    #[test]
    fn test_missing_ticket_is_not_found() {
        let repo = MockTicketRepository::new();
        assert!(matches!(
            repo.get_ticket(1),
            Err(RepositoryError::NotFound(_))
        ));
    }
}
