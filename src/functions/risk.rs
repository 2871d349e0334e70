//! Risk analysis and verifier placeholders

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::ticket::access_request::NO_RISK;
use crate::ticket::{FieldKind, Ticket, ViolationResource};

/// `"YES"` when any of the newest access requests carries risk
pub fn risk_status(ticket: &Ticket) -> Option<&'static str> {
    let Some(location) = ticket.newest_field_of_kind(FieldKind::MultiAccessRequest) else {
        warn!(
            ticket_id = ticket.id,
            "Risk status has not been found in any step of the ticket"
        );
        return None;
    };

    let risky = location
        .field
        .value
        .access_requests()
        .unwrap_or_default()
        .iter()
        .any(|ar| ar.risk_analysis_result.has_risk());
    Some(if risky { "YES" } else { "NO" })
}

/// Violations of the newest access requests, keyed by request order
pub fn risk_results(ticket: &Ticket) -> Value {
    let mut per_request = Map::new();
    let Some(location) = ticket.newest_field_of_kind(FieldKind::MultiAccessRequest) else {
        warn!(
            ticket_id = ticket.id,
            "No risk results have been found in any step of the ticket"
        );
        return Value::Object(per_request);
    };

    for ar in location.field.value.access_requests().unwrap_or_default() {
        if ar.risk_analysis_result.is_no_risk() {
            per_request.insert(ar.order.clone(), json!(NO_RISK));
            continue;
        }

        let violations: Vec<Value> = ar
            .risk_analysis_result
            .security_policy_violations
            .iter()
            .map(|violation| {
                let cell = &violation.matrix_cell_violation;
                let (allowed_services, violating_services) = cell.services.describe();
                json!({
                    "severity": violation.severity,
                    "violations": {
                        "sources": ViolationResource::join(&cell.sources),
                        "destinations": ViolationResource::join(&cell.destinations),
                        "violating_services": violating_services,
                    },
                    "security_requirements": {
                        "policy": violation.security_zone_matrix.name,
                        "from_zone": cell.from_zone,
                        "to_zone": cell.to_zone,
                        "allowed_services": allowed_services,
                    }
                })
            })
            .collect();
        per_request.insert(ar.order.clone(), Value::Array(violations));
    }
    Value::Object(per_request)
}

/// Whether every newest access request was verified as implemented
pub fn verifier_status(ticket: &Ticket) -> &'static str {
    debug!(
        ticket_id = ticket.id,
        "Validating if access requests are already implemented"
    );
    match ticket.newest_field_of_kind(FieldKind::MultiAccessRequest) {
        Some(location) => {
            let all_implemented = location
                .field
                .value
                .access_requests()
                .unwrap_or_default()
                .iter()
                .all(|ar| ar.is_verified_implemented());
            if all_implemented {
                "Fully implemented"
            } else {
                "Not implemented"
            }
        }
        None => {
            warn!(
                ticket_id = ticket.id,
                "No verifier status has been found in any step of the ticket"
            );
            "Not Implemented"
        }
    }
}

/// Whether any newest access request has a violation of `severity`
pub fn first_violation_with_severity(ticket: &Ticket, severity: &str) -> Option<String> {
    let location = ticket.newest_field_of_kind(FieldKind::MultiAccessRequest)?;
    location
        .field
        .value
        .access_requests()
        .unwrap_or_default()
        .iter()
        .flat_map(|ar| &ar.risk_analysis_result.security_policy_violations)
        .find(|v| v.severity.eq_ignore_ascii_case(severity))
        .map(|v| v.severity.clone())
}
