//! Placeholders derived from ticket metadata, comments and history

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::warn;

use super::Invocation;
use crate::ticket::{FieldKind, Target, Ticket, NOT_AVAILABLE};

const HISTORY_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";
const AUTOMATIC_STEP_FAILED: &str = "Automatic step failed";

/// Firewalls targeted by the newest access requests, keyed by request order
///
/// Returns `"Any"` as soon as one request targets any device.
pub fn firewall_list(ticket: &Ticket) -> Option<Value> {
    let Some(location) = ticket.newest_field_of_kind(FieldKind::MultiAccessRequest) else {
        warn!(
            ticket_id = ticket.id,
            "No access request field found in any step of the ticket"
        );
        return None;
    };

    let mut targets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for ar in location.field.value.access_requests().unwrap_or_default() {
        for target in &ar.targets {
            if matches!(target, Target::Any) {
                return Some(json!("Any"));
            }
            targets
                .entry(ar.order.clone())
                .or_default()
                .push(target.display_name());
        }
    }
    Some(json!(targets))
}

/// Assignee of the current task, falling back to the newest assigned task
pub fn assignee(ticket: &Ticket) -> String {
    let current = ticket
        .last_task()
        .map(|t| t.assignee.as_str())
        .unwrap_or_default();
    if !current.is_empty() && current != NOT_AVAILABLE {
        return current.to_string();
    }

    ticket
        .steps
        .iter()
        .rev()
        .filter_map(|s| s.last_task())
        .find(|t| t.assignee != NOT_AVAILABLE)
        .map(|t| t.assignee.clone())
        .unwrap_or_else(|| current.to_string())
}

/// Content of the newest comment
pub fn last_comment(ticket: &Ticket) -> String {
    match ticket.comments.last() {
        Some(comment) => comment.content.clone(),
        None => {
            warn!(ticket_id = ticket.id, "No comment in the ticket");
            String::new()
        }
    }
}

pub fn ticket_link(hostname: &str, ticket_id: u64) -> String {
    format!(
        "https://{hostname}/securechangeworkflow/pages/myRequest/myRequestsMain.seam?ticketId={ticket_id}"
    )
}

pub fn step_handler(ticket: &Ticket) -> String {
    match ticket.current_step() {
        Some(step) => step
            .tasks
            .iter()
            .map(|t| t.assignee.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        None => {
            warn!(ticket_id = ticket.id, "Ticket has no current step");
            String::new()
        }
    }
}

pub fn step_name(ticket: &Ticket) -> String {
    match ticket.current_step() {
        Some(step) => step.name.clone(),
        None => {
            warn!(ticket_id = ticket.id, "Ticket has no current step");
            String::new()
        }
    }
}

pub fn ticket_start_time(inv: &Invocation<'_>) -> Result<String> {
    let history = inv.services.tickets.ticket_history(inv.ticket.id)?;
    history
        .first()
        .map(|h| h.date.format(HISTORY_TIME_FORMAT).to_string())
        .ok_or_else(|| anyhow!("ticket {} has no history", inv.ticket.id))
}

pub fn ticket_end_time(inv: &Invocation<'_>) -> Result<String> {
    let history = inv.services.tickets.ticket_history(inv.ticket.id)?;
    history
        .last()
        .map(|h| h.date.format(HISTORY_TIME_FORMAT).to_string())
        .ok_or_else(|| anyhow!("ticket {} has no history", inv.ticket.id))
}

/// Description of the newest automatic step failure in the ticket history
pub fn automatic_step_failure_reason(inv: &Invocation<'_>) -> Result<String> {
    let history = inv.services.tickets.ticket_history(inv.ticket.id)?;
    Ok(history
        .iter()
        .rev()
        .find(|h| h.description.contains(AUTOMATIC_STEP_FAILED))
        .map(|h| h.description.clone())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    use crate::functions::tests::services_with;
    use crate::functions::FunctionArgs;
    use crate::ticket::tests::{step, task, ticket};
    use crate::ticket::{
        AccessRequest, Comment, Field, FieldValue, HistoryActivity, MockTicketRepository,
        RiskAnalysisResult,
    };

    fn ar_field(targets: Vec<Target>) -> Field {
        Field {
            id: 5,
            name: "Access Requests".to_string(),
            value: FieldValue::MultiAccessRequest {
                access_requests: vec![AccessRequest {
                    order: "AR1".to_string(),
                    targets,
                    sources: vec![],
                    destinations: vec![],
                    services: vec![],
                    action: None,
                    risk_analysis_result: RiskAnalysisResult::default(),
                    verifier_result: None,
                }],
                designer_result: None,
            },
        }
    }

    #[test]
    fn test_firewall_list() {
        let t = ticket(vec![step(
            1,
            "Submit",
            vec![task(
                1,
                "a",
                "DONE",
                vec![ar_field(vec![
                    Target::Object {
                        management_name: Some("fw1".to_string()),
                        object_name: "fw1".to_string(),
                    },
                    Target::Object {
                        management_name: Some("cma".to_string()),
                        object_name: "fw2".to_string(),
                    },
                ])],
            )],
        )]);
        assert_eq!(firewall_list(&t), Some(json!({"AR1": ["fw1", "cma/fw2"]})));

        let any = ticket(vec![step(
            1,
            "Submit",
            vec![task(1, "a", "DONE", vec![ar_field(vec![Target::Any])])],
        )]);
        assert_eq!(firewall_list(&any), Some(json!("Any")));

        assert_eq!(firewall_list(&ticket(vec![])), None);
    }

    #[test]
    fn test_assignee_falls_back_to_assigned_task() {
        let t = ticket(vec![
            step(1, "Submit", vec![task(1, "r.ortiz", "DONE", vec![])]),
            step(2, "Review", vec![task(2, NOT_AVAILABLE, NOT_AVAILABLE, vec![])]),
        ]);
        assert_eq!(assignee(&t), "r.ortiz");
    }

    #[test]
    fn test_last_comment() {
        let mut t = ticket(vec![]);
        assert_eq!(last_comment(&t), "");
        t.comments.push(Comment {
            user: None,
            content: "please redo".to_string(),
        });
        assert_eq!(last_comment(&t), "please redo");
    }

    #[test]
    fn test_step_handler_and_name() {
        let t = ticket(vec![step(
            1,
            "Review",
            vec![task(1, "a", "DONE", vec![]), task(2, "b", "DONE", vec![])],
        )]);
        assert_eq!(step_handler(&t), "a, b");
        assert_eq!(step_name(&t), "Review");
        assert_eq!(step_name(&ticket(vec![])), "");
    }

    #[test]
    fn test_history_placeholders() {
        let repo = MockTicketRepository::new();
        repo.set_history(
            42,
            vec![
                HistoryActivity {
                    date: DateTime::parse_from_rfc3339("2024-01-02T03:04:05+00:00").unwrap(),
                    description: "Ticket created".to_string(),
                },
                HistoryActivity {
                    date: DateTime::parse_from_rfc3339("2024-01-03T10:00:00+00:00").unwrap(),
                    description: "Automatic step failed: timeout".to_string(),
                },
            ],
        );
        let services = services_with(repo);
        let t = ticket(vec![]);
        let args = FunctionArgs::new();
        let inv = Invocation {
            services: &services,
            ticket: &t,
            value: None,
            args: &args,
        };

        assert_eq!(ticket_start_time(&inv).unwrap(), "2024/01/02 03:04:05");
        assert_eq!(ticket_end_time(&inv).unwrap(), "2024/01/03 10:00:00");
        assert_eq!(
            automatic_step_failure_reason(&inv).unwrap(),
            "Automatic step failed: timeout"
        );
    }

    #[test]
    fn test_ticket_link() {
        assert_eq!(
            ticket_link("sc.example.com", 9),
            "https://sc.example.com/securechangeworkflow/pages/myRequest/myRequestsMain.seam?ticketId=9"
        );
    }
}
