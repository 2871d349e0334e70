//! Workflow platform ticket repository
//!
//! [`TicketRepository`] is the read/write contract the integration needs from
//! the workflow platform. [`RestTicketRepository`] implements it against the
//! platform's JSON REST API with blocking calls.

use std::time::Duration;

use backon::{BlockingRetryable, ConstantBuilder};
use chrono::{DateTime, FixedOffset};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use super::access_request::DesignerResults;
use super::{Field, Task, Ticket};

const API_PATH: &str = "/securechangeworkflow/api/securechange";

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("workflow platform returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("workflow platform unreachable: {0}")]
    Network(String),

    #[error("failed to decode workflow platform response: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no workflow platform user named '{0}'")]
    UserNotFound(String),

    #[error("ticket {ticket_id} did not reach the expected state after {attempts} attempts")]
    PredicateUnmet { ticket_id: u64, attempts: usize },
}

/// Address of a task inside a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRef {
    pub ticket_id: u64,
    pub step_id: u64,
    pub task_id: u64,
}

/// Address of a field inside a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub task: TaskRef,
    pub field_id: u64,
}

impl TaskRef {
    fn path(&self) -> String {
        format!(
            "/tickets/{}/steps/{}/tasks/{}",
            self.ticket_id, self.step_id, self.task_id
        )
    }
}

impl FieldRef {
    fn path(&self) -> String {
        format!("{}/fields/{}", self.task.path(), self.field_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryActivity {
    pub date: DateTime<FixedOffset>,
    #[serde(default)]
    pub description: String,
}

/// How long to wait for a ticket to reach a state
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub attempts: usize,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            attempts: 60,
        }
    }
}

pub trait TicketRepository: Send + Sync {
    /// Host name of the workflow platform, used for ticket links
    fn hostname(&self) -> &str;

    fn get_ticket(&self, ticket_id: u64) -> Result<Ticket, RepositoryError>;

    fn put_field(&self, field_ref: &FieldRef, field: &Field) -> Result<(), RepositoryError>;

    fn put_task(&self, task_ref: &TaskRef, task: &Task) -> Result<(), RepositoryError>;

    fn reassign_task(
        &self,
        task_ref: &TaskRef,
        username: &str,
        comment: &str,
    ) -> Result<(), RepositoryError>;

    /// Users allowed to handle a task of a workflow step
    fn task_participants(
        &self,
        workflow_id: u64,
        step_name: &str,
        task_name: &str,
    ) -> Result<Vec<String>, RepositoryError>;

    /// Ticket history, oldest activity first
    fn ticket_history(&self, ticket_id: u64) -> Result<Vec<HistoryActivity>, RepositoryError>;

    fn cancel_ticket(&self, ticket_id: u64) -> Result<(), RepositoryError>;

    fn designer_results(
        &self,
        field_ref: &FieldRef,
    ) -> Result<Option<DesignerResults>, RepositoryError>;

    /// Designer results as the raw JSON document the platform returns
    fn designer_results_json(&self, field_ref: &FieldRef)
        -> Result<Option<String>, RepositoryError>;

    fn designer_commands(
        &self,
        field_ref: &FieldRef,
        management_id: u64,
    ) -> Result<String, RepositoryError>;

    /// Re-fetch the ticket until `predicate` holds or the policy runs out
    fn get_ticket_when(
        &self,
        ticket_id: u64,
        predicate: &dyn Fn(&Ticket) -> bool,
        policy: &PollPolicy,
    ) -> Result<Ticket, RepositoryError> {
        let fetch = || {
            let ticket = self.get_ticket(ticket_id)?;
            if predicate(&ticket) {
                Ok(ticket)
            } else {
                Err(RepositoryError::PredicateUnmet {
                    ticket_id,
                    attempts: policy.attempts,
                })
            }
        };

        fetch
            .retry(
                ConstantBuilder::default()
                    .with_delay(policy.interval)
                    .with_max_times(policy.attempts),
            )
            .sleep(std::thread::sleep)
            .when(|e| matches!(e, RepositoryError::PredicateUnmet { .. }))
            .notify(|_, dur| {
                debug!(ticket_id, "Ticket not ready, polling again in {:?}", dur);
            })
            .call()
    }
}

#[derive(Debug, Deserialize)]
struct TicketEnvelope {
    ticket: Ticket,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<PlatformUser>,
}

#[derive(Debug, Deserialize)]
struct PlatformUser {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ParticipantsResponse {
    #[serde(default)]
    participants: Vec<PlatformUser>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryActivity>,
}

/// Blocking REST client for the workflow platform
pub struct RestTicketRepository {
    host: String,
    username: String,
    password: String,
    client: Client,
}

impl RestTicketRepository {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        verify_ssl: bool,
    ) -> Result<Self, RepositoryError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| RepositoryError::Network(e.to_string()))?;

        Ok(Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("https://{}{}{}", self.host, API_PATH, path)
    }

    fn check(path: &str, response: Response) -> Result<Response, RepositoryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        match status.as_u16() {
            404 => Err(RepositoryError::NotFound(path.to_string())),
            code => Err(RepositoryError::Http {
                status: code,
                message: body,
            }),
        }
    }

    fn get_response(&self, path: &str, query: &[(&str, &str)]) -> Result<Response, RepositoryError> {
        let url = self.url(path);
        debug!("Workflow platform GET: {}", url);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .map_err(|e| RepositoryError::Network(e.to_string()))?;

        Self::check(path, response)
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, RepositoryError> {
        self.get_response(path, query)?
            .json()
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    }

    fn get_text(&self, path: &str) -> Result<String, RepositoryError> {
        self.get_response(path, &[])?
            .text()
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    }

    fn put(&self, path: &str, body: &serde_json::Value) -> Result<(), RepositoryError> {
        let url = self.url(path);
        debug!("Workflow platform PUT: {}", url);

        let response = self
            .client
            .put(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .map_err(|e| RepositoryError::Network(e.to_string()))?;

        Self::check(path, response).map(|_| ())
    }

    fn user_id(&self, username: &str) -> Result<u64, RepositoryError> {
        let response: UsersResponse = self.get("/users", &[("user_name", username)])?;
        response
            .users
            .into_iter()
            .find(|u| u.name.eq_ignore_ascii_case(username))
            .map(|u| u.id)
            .ok_or_else(|| RepositoryError::UserNotFound(username.to_string()))
    }
}

impl TicketRepository for RestTicketRepository {
    fn hostname(&self) -> &str {
        &self.host
    }

    fn get_ticket(&self, ticket_id: u64) -> Result<Ticket, RepositoryError> {
        let envelope: TicketEnvelope = self.get(&format!("/tickets/{ticket_id}"), &[])?;
        Ok(envelope.ticket)
    }

    fn put_field(&self, field_ref: &FieldRef, field: &Field) -> Result<(), RepositoryError> {
        self.put(&field_ref.path(), &json!({ "field": field }))
    }

    fn put_task(&self, task_ref: &TaskRef, task: &Task) -> Result<(), RepositoryError> {
        self.put(&task_ref.path(), &json!({ "task": task }))
    }

    fn reassign_task(
        &self,
        task_ref: &TaskRef,
        username: &str,
        comment: &str,
    ) -> Result<(), RepositoryError> {
        let user_id = self.user_id(username)?;
        let path = format!("{}/reassign/{}", task_ref.path(), user_id);
        self.put(&path, &json!({ "reassign_task_comment": { "comment": comment } }))
    }

    fn task_participants(
        &self,
        workflow_id: u64,
        step_name: &str,
        task_name: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        let path = format!("/workflows/{workflow_id}/participants");
        let response: ParticipantsResponse = self.get(
            &path,
            &[("step_name", step_name), ("task_name", task_name)],
        )?;
        Ok(response.participants.into_iter().map(|p| p.name).collect())
    }

    fn ticket_history(&self, ticket_id: u64) -> Result<Vec<HistoryActivity>, RepositoryError> {
        let response: HistoryResponse = self.get(&format!("/tickets/{ticket_id}/history"), &[])?;
        let mut history = response.history;
        history.sort_by_key(|h| h.date);
        Ok(history)
    }

    fn cancel_ticket(&self, ticket_id: u64) -> Result<(), RepositoryError> {
        self.put(&format!("/tickets/{ticket_id}/cancel"), &json!({}))
    }

    fn designer_results(
        &self,
        field_ref: &FieldRef,
    ) -> Result<Option<DesignerResults>, RepositoryError> {
        match self.get(&format!("{}/designer", field_ref.path()), &[]) {
            Ok(results) => Ok(Some(results)),
            Err(RepositoryError::NotFound(path)) => {
                warn!("No designer results at {}", path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn designer_results_json(
        &self,
        field_ref: &FieldRef,
    ) -> Result<Option<String>, RepositoryError> {
        match self.get_text(&format!("{}/designer", field_ref.path())) {
            Ok(body) if body.trim().is_empty() => Ok(None),
            Ok(body) => Ok(Some(body)),
            Err(RepositoryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn designer_commands(
        &self,
        field_ref: &FieldRef,
        management_id: u64,
    ) -> Result<String, RepositoryError> {
        let path = format!(
            "{}/designer/device/{}/commands",
            field_ref.path(),
            management_id
        );
        self.get_text(&path)
    }
}
