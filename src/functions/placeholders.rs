//! Built-in placeholder functions

use anyhow::Result;
use chrono::Local;
use serde_json::{json, Value};
use tracing::warn;

use super::{designer, risk, ticket_data, BuiltinFn, Invocation};
use crate::ticket::{FieldKind, FieldValue};

pub const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("current_time", current_time),
    ("date_only", date_only),
    ("firewall_list", firewall_list),
    ("ticket_id", ticket_id),
    ("ticket_subject", ticket_subject),
    ("workflow_name", workflow_name),
    ("ticket_requester", ticket_requester),
    ("assignee", assignee),
    ("ticket_link", ticket_link),
    ("redo_reason", last_comment),
    ("reject_reason", last_comment),
    ("approve_reject_reason", approve_reject_reason),
    ("approve_reject_status", approve_reject_status),
    ("selected_plus_options", selected_plus_options),
    ("step_handler", step_handler),
    ("step_name", step_name),
    ("risk_status", risk_status),
    ("risk_results", risk_results),
    ("verifier_status", verifier_status),
    ("ticket_start_time", ticket_start_time),
    ("ticket_end_time", ticket_end_time),
    ("designer_commands", designer::designer_commands),
    ("designer_status", designer::designer_status),
    ("designer_results_json", designer::designer_results_json),
    ("automatic_step_failure_reason", automatic_step_failure_reason),
];

fn current_time(_: &Invocation<'_>) -> Result<Value> {
    Ok(json!(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()))
}

fn date_only(_: &Invocation<'_>) -> Result<Value> {
    Ok(json!(Local::now().format("%Y-%m-%d").to_string()))
}

fn firewall_list(inv: &Invocation<'_>) -> Result<Value> {
    Ok(ticket_data::firewall_list(inv.ticket).unwrap_or(Value::Null))
}

fn ticket_id(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(inv.ticket.id))
}

fn ticket_subject(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(inv.ticket.subject))
}

fn workflow_name(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(inv.ticket.workflow.name))
}

fn ticket_requester(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(inv.ticket.requester))
}

fn assignee(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(ticket_data::assignee(inv.ticket)))
}

fn ticket_link(inv: &Invocation<'_>) -> Result<Value> {
    let host = inv.services.tickets.hostname();
    Ok(json!(ticket_data::ticket_link(host, inv.ticket.id)))
}

fn last_comment(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(ticket_data::last_comment(inv.ticket)))
}

fn approve_reject_reason(inv: &Invocation<'_>) -> Result<Value> {
    match inv.ticket.newest_field_of_kind(FieldKind::ApproveReject) {
        Some(location) => match &location.field.value {
            FieldValue::ApproveReject { reason, .. } => Ok(json!(reason)),
            _ => Ok(Value::Null),
        },
        None => {
            warn!(
                ticket_id = inv.ticket.id,
                "The approve-reject field has not been found in any step of the ticket"
            );
            Ok(Value::Null)
        }
    }
}

fn approve_reject_status(inv: &Invocation<'_>) -> Result<Value> {
    match inv.ticket.newest_field_of_kind(FieldKind::ApproveReject) {
        Some(location) => {
            let approved = matches!(
                location.field.value,
                FieldValue::ApproveReject {
                    approved: Some(true),
                    ..
                }
            );
            Ok(json!(if approved { "Approved" } else { "Rejected" }))
        }
        None => {
            warn!(
                ticket_id = inv.ticket.id,
                "The approve-reject field has not been found in any step of the ticket"
            );
            Ok(Value::Null)
        }
    }
}

/// `<selection> selected from [<options>]` for the newest drop-down field
fn selected_plus_options(inv: &Invocation<'_>) -> Result<Value> {
    match inv.ticket.newest_field_of_kind(FieldKind::DropDown) {
        Some(location) => match &location.field.value {
            FieldValue::DropDown { selection, options } => Ok(json!(format!(
                "{} selected from [{}]",
                selection.as_deref().unwrap_or_default(),
                options.join(", ")
            ))),
            _ => Ok(Value::Null),
        },
        None => {
            warn!(
                ticket_id = inv.ticket.id,
                "The drop down field has not been found in any step of the ticket"
            );
            Ok(Value::Null)
        }
    }
}

fn step_handler(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(ticket_data::step_handler(inv.ticket)))
}

fn step_name(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(ticket_data::step_name(inv.ticket)))
}

fn risk_status(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(risk::risk_status(inv.ticket)))
}

fn risk_results(inv: &Invocation<'_>) -> Result<Value> {
    Ok(risk::risk_results(inv.ticket))
}

fn verifier_status(inv: &Invocation<'_>) -> Result<Value> {
    Ok(json!(risk::verifier_status(inv.ticket)))
}

fn ticket_start_time(inv: &Invocation<'_>) -> Result<Value> {
    ticket_data::ticket_start_time(inv).map(Value::String)
}

fn ticket_end_time(inv: &Invocation<'_>) -> Result<Value> {
    ticket_data::ticket_end_time(inv).map(Value::String)
}

fn automatic_step_failure_reason(inv: &Invocation<'_>) -> Result<Value> {
    ticket_data::automatic_step_failure_reason(inv).map(Value::String)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::stringify;
    use crate::functions::tests::{invoke, services_with};
    use crate::ticket::tests::{step, task, ticket};
    use crate::ticket::{Field, MockTicketRepository};

    fn lookup(name: &str) -> BuiltinFn {
        BUILTINS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| *f)
            .unwrap()
    }

    #[test]
    fn test_ticket_metadata_placeholders() {
        let services = services_with(MockTicketRepository::new());
        let t = ticket(vec![]);
        assert_eq!(stringify(&invoke(lookup("ticket_id"), &services, &t).unwrap()), "42");
        assert_eq!(
            stringify(&invoke(lookup("workflow_name"), &services, &t).unwrap()),
            "Firewall Change"
        );
        assert_eq!(
            stringify(&invoke(lookup("ticket_requester"), &services, &t).unwrap()),
            "r.ortiz"
        );
        assert!(stringify(&invoke(lookup("ticket_link"), &services, &t).unwrap())
            .ends_with("ticketId=42"));
    }

    #[test]
    fn test_current_time_format() {
        let services = services_with(MockTicketRepository::new());
        let t = ticket(vec![]);
        let now = stringify(&invoke(lookup("current_time"), &services, &t).unwrap());
        assert_eq!(now.len(), "2024-01-01 00:00:00".len());
        let today = stringify(&invoke(lookup("date_only"), &services, &t).unwrap());
        assert_eq!(today.len(), "2024-01-01".len());
    }

    #[test]
    fn test_approve_reject_placeholders_use_newest_step() {
        let services = services_with(MockTicketRepository::new());
        let approve = |id, approved, reason: &str| Field {
            id,
            name: "Approve".to_string(),
            value: FieldValue::ApproveReject {
                approved: Some(approved),
                reason: Some(reason.to_string()),
            },
        };
        let t = ticket(vec![
            step(1, "First", vec![task(1, "a", "DONE", vec![approve(1, true, "old")])]),
            step(2, "Second", vec![task(2, "b", "DONE", vec![approve(2, false, "too risky")])]),
        ]);
        assert_eq!(
            invoke(lookup("approve_reject_status"), &services, &t).unwrap(),
            json!("Rejected")
        );
        assert_eq!(
            invoke(lookup("approve_reject_reason"), &services, &t).unwrap(),
            json!("too risky")
        );
        assert_eq!(
            invoke(lookup("approve_reject_status"), &services, &ticket(vec![])).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_selected_plus_options() {
        let services = services_with(MockTicketRepository::new());
        let t = ticket(vec![step(
            1,
            "Submit",
            vec![task(
                1,
                "a",
                "DONE",
                vec![Field {
                    id: 1,
                    name: "Env".to_string(),
                    value: FieldValue::DropDown {
                        selection: Some("prod".to_string()),
                        options: vec!["dev".to_string(), "prod".to_string()],
                    },
                }],
            )],
        )]);
        assert_eq!(
            invoke(lookup("selected_plus_options"), &services, &t).unwrap(),
            json!("prod selected from [dev, prod]")
        );
    }
}
