//! Designer placeholders backed by the workflow platform's designer API

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::info;

use super::Invocation;
use crate::ticket::FieldKind;

const DESIGNER_PROBLEM: &str = "Error: Problem with Designer";

/// Designer commands per management device, for the newest access requests
pub fn designer_commands(inv: &Invocation<'_>) -> Result<Value> {
    let ticket = inv.ticket;
    let Some(location) = ticket.newest_field_of_kind(FieldKind::MultiAccessRequest) else {
        return Ok(Value::Null);
    };
    let field_ref = location.field_ref(ticket.id);

    let Some(results) = inv.services.tickets.designer_results(&field_ref)? else {
        return Ok(json!(""));
    };

    let mut per_device = BTreeMap::new();
    for suggestion in &results.device_suggestions {
        match inv
            .services
            .tickets
            .designer_commands(&field_ref, suggestion.management_id)
        {
            Ok(commands) => {
                per_device.insert(suggestion.management_id.to_string(), commands);
            }
            Err(e) => {
                info!(
                    ticket_id = ticket.id,
                    management_id = suggestion.management_id,
                    "No designer commands: {}",
                    e
                );
            }
        }
    }

    if per_device.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(json!(per_device))
    }
}

/// Error text when the designer could not compute a suggestion, else empty
pub fn designer_status(inv: &Invocation<'_>) -> Result<Value> {
    let status = inv
        .ticket
        .newest_fields_of_kind(FieldKind::MultiAccessRequest)
        .find_map(|location| location.field.value.designer_summary())
        .map(|summary| {
            if summary.cannot_compute() {
                DESIGNER_PROBLEM
            } else {
                ""
            }
        })
        .unwrap_or_default();
    Ok(json!(status))
}

/// Raw designer results document for the newest computed designer run
pub fn designer_results_json(inv: &Invocation<'_>) -> Result<Value> {
    let ticket = inv.ticket;
    for location in ticket.newest_fields_of_kind(FieldKind::MultiAccessRequest) {
        let computed = location
            .field
            .value
            .designer_summary()
            .is_some_and(|s| !s.cannot_compute());
        if !computed {
            continue;
        }
        if let Some(body) = inv
            .services
            .tickets
            .designer_results_json(&location.field_ref(ticket.id))?
        {
            return Ok(json!(body));
        }
    }
    Ok(json!(""))
}
