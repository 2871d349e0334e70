//! Built-in pre/post action functions
//!
//! Actions run around the outbound request of a section. A truthy result from
//! a `pre` action means "do not send the request".

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::{risk, BuiltinFn, Invocation};
use crate::ticket::{Field, FieldKind, FieldLocation, FieldValue, Step, Task, Ticket};

pub const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("advance", advance),
    ("advance_if_fully_implemented", advance_if_fully_implemented),
    ("approve_reject", approve_reject),
    ("approve_reject_on_critical", approve_reject_on_critical),
    ("approve_reject_on_high", approve_reject_on_high),
    ("cancel_ticket", cancel_ticket),
    (
        "do_not_send_request_if_the_previous_step_skipped",
        do_not_send_request_if_the_previous_step_skipped,
    ),
    (
        "do_not_send_request_if_skip_checkbox_checked",
        do_not_send_request_if_skip_checkbox_checked,
    ),
];

const APPROVED_BY_SCRIPT: &str = "The ticket has been approved by the script";
const REJECTED_BY_SCRIPT: &str = "The ticket has been rejected by the script";

/// Fill mandatory fields of the current task, mark it done and save it
pub fn advance(inv: &Invocation<'_>) -> Result<Value> {
    let ticket = inv.ticket;
    debug!(ticket_id = ticket.id, "Executing advance");

    let step = ticket
        .current_step()
        .ok_or_else(|| anyhow!("ticket {} has no current step", ticket.id))?;
    let current = step
        .last_task()
        .ok_or_else(|| anyhow!("step '{}' has no task", step.name))?;
    debug!(ticket_id = ticket.id, step = %step.name, "Advancing step");

    let mut task = current.clone();
    let mut filled = false;
    for field in &mut task.fields {
        match &mut field.value {
            FieldValue::ApproveReject { approved, reason }
                if !approved.unwrap_or(false) && reason.as_deref().map_or(true, str::is_empty) =>
            {
                *approved = Some(true);
                *reason = Some("Approved by integration script".to_string());
                filled = true;
            }
            FieldValue::Text { text } | FieldValue::TextArea { text }
                if text.as_deref().map_or(true, str::is_empty) =>
            {
                *text = Some("Set by integration script".to_string());
                filled = true;
            }
            _ => {}
        }
    }

    if !filled {
        task.fields.clear();
    }
    task.mark_as_done();

    inv.services
        .tickets
        .put_task(&ticket.task_ref(step, current), &task)
        .context("Failed to advance step")?;
    Ok(Value::Null)
}

/// Advance once the designer reports every device change implemented
pub fn advance_if_fully_implemented(inv: &Invocation<'_>) -> Result<Value> {
    let ticket = inv.ticket;
    debug!(ticket_id = ticket.id, "Executing advance if fully implemented");

    let Some(location) = ticket.newest_field_of_kind(FieldKind::MultiAccessRequest) else {
        return Ok(Value::Null);
    };

    match inv
        .services
        .tickets
        .designer_results(&location.field_ref(ticket.id))
    {
        Ok(Some(results)) if results.is_implemented() => advance(inv),
        Ok(_) => Ok(Value::Null),
        Err(e) => {
            error!(ticket_id = ticket.id, "Failed to get designer results: {}", e);
            Ok(Value::Null)
        }
    }
}

/// Reject when the newest access requests carry risk, approve otherwise
pub fn approve_reject(inv: &Invocation<'_>) -> Result<Value> {
    let ticket = inv.ticket;
    debug!(ticket_id = ticket.id, "Executing approve_reject");

    let risky = risk::risk_status(ticket).is_some_and(|s| s.eq_ignore_ascii_case("yes"));
    let decision = if risky {
        (false, REJECTED_BY_SCRIPT.to_string())
    } else {
        (true, APPROVED_BY_SCRIPT.to_string())
    };
    put_decision(inv, decision)
}

pub fn approve_reject_on_critical(inv: &Invocation<'_>) -> Result<Value> {
    approve_reject_on_severity(inv, "critical")
}

pub fn approve_reject_on_high(inv: &Invocation<'_>) -> Result<Value> {
    approve_reject_on_severity(inv, "high")
}

fn approve_reject_on_severity(inv: &Invocation<'_>, severity: &str) -> Result<Value> {
    let ticket = inv.ticket;
    debug!(ticket_id = ticket.id, severity, "Executing approve_reject on severity");

    if ticket
        .newest_field_of_kind(FieldKind::MultiAccessRequest)
        .is_none()
    {
        return Ok(Value::Null);
    }

    let decision = match risk::first_violation_with_severity(ticket, severity) {
        Some(found) => (
            false,
            format!("{REJECTED_BY_SCRIPT}. The severity was {found}."),
        ),
        None => (true, APPROVED_BY_SCRIPT.to_string()),
    };
    put_decision(inv, decision)
}

/// Write an approve/reject decision into the current task's approve field
fn put_decision(inv: &Invocation<'_>, (approve, text): (bool, String)) -> Result<Value> {
    let ticket = inv.ticket;
    let (step, task, field) = current_approve_field(ticket)?;

    let mut updated = field.clone();
    updated.value = FieldValue::ApproveReject {
        approved: Some(approve),
        reason: Some(text),
    };

    let field_ref = FieldLocation { step, task, field }.field_ref(ticket.id);
    inv.services.tickets.put_field(&field_ref, &updated)?;
    Ok(Value::Null)
}

fn current_approve_field(ticket: &Ticket) -> Result<(&Step, &Task, &Field)> {
    let step = ticket
        .current_step()
        .ok_or_else(|| anyhow!("ticket {} has no current step", ticket.id))?;
    let task = step
        .last_task()
        .ok_or_else(|| anyhow!("step '{}' has no task", step.name))?;
    let field = task
        .fields_of_kind(FieldKind::ApproveReject)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("step '{}' has no approve/reject field", step.name))?;
    Ok((step, task, field))
}

pub fn cancel_ticket(inv: &Invocation<'_>) -> Result<Value> {
    info!(ticket_id = inv.ticket.id, "Canceling ticket");
    if let Err(e) = inv.services.tickets.cancel_ticket(inv.ticket.id) {
        error!(ticket_id = inv.ticket.id, "Failed to cancel ticket: {}", e);
    }
    Ok(Value::Null)
}

pub fn do_not_send_request_if_the_previous_step_skipped(inv: &Invocation<'_>) -> Result<Value> {
    info!(ticket_id = inv.ticket.id, "Checking if previous step skipped");
    match inv.ticket.previous_step() {
        Some(step) => Ok(json!(step.skipped)),
        None => {
            error!(
                ticket_id = inv.ticket.id,
                "Failed to check if previous step skipped: no previous step"
            );
            Ok(Value::Null)
        }
    }
}

pub fn do_not_send_request_if_skip_checkbox_checked(inv: &Invocation<'_>) -> Result<Value> {
    info!(ticket_id = inv.ticket.id, "Checking the skip checkbox of the previous step");
    let checked = inv
        .ticket
        .previous_step()
        .and_then(|step| step.last_task())
        .and_then(|task| task.fields_named("skip").into_iter().next())
        .and_then(|field| match field.value {
            FieldValue::Checkbox { checked } => Some(checked),
            _ => None,
        });

    match checked {
        Some(checked) => Ok(json!(checked)),
        None => {
            error!(
                ticket_id = inv.ticket.id,
                "Failed to check the skip checkbox: no checkbox named 'skip' in the previous step"
            );
            Ok(Value::Null)
        }
    }
}
