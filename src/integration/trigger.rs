//! Trigger payloads sent by the workflow platform

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("empty trigger payload")]
    Empty,

    #[error("invalid trigger payload: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Lifecycle events the platform can fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Advance,
    Create,
    Resubmit,
    Close,
    /// `CLOSE` on a ticket whose last task was never worked on
    AutoClose,
    Cancel,
    Reject,
    Redo,
    Reopen,
    PreAssignmentScript,
    AutomationFailed,
}

/// How a trigger is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// The ticket moved between steps
    Step,
    /// Something happened to the ticket as a whole
    Action,
}

impl Trigger {
    pub const ALL: [Trigger; 11] = [
        Trigger::Advance,
        Trigger::Create,
        Trigger::Resubmit,
        Trigger::Close,
        Trigger::AutoClose,
        Trigger::Cancel,
        Trigger::Reject,
        Trigger::Redo,
        Trigger::Reopen,
        Trigger::PreAssignmentScript,
        Trigger::AutomationFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Advance => "ADVANCE",
            Trigger::Create => "CREATE",
            Trigger::Resubmit => "RESUBMIT",
            Trigger::Close => "CLOSE",
            Trigger::AutoClose => "AUTOCLOSE",
            Trigger::Cancel => "CANCEL",
            Trigger::Reject => "REJECT",
            Trigger::Redo => "REDO",
            Trigger::Reopen => "REOPEN",
            Trigger::PreAssignmentScript => "PRE_ASSIGNMENT_SCRIPT",
            Trigger::AutomationFailed => "AUTOMATION_FAILED",
        }
    }

    pub fn kind(self) -> TriggerKind {
        match self {
            Trigger::Advance | Trigger::Create | Trigger::Resubmit => TriggerKind::Step,
            _ => TriggerKind::Action,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Trigger::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown trigger '{wanted}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TicketInfo {
    pub id: u64,
    /// Step the ticket was in when the platform fired the trigger
    #[serde(default)]
    pub current_stage_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TriggerPayload {
    pub ticket_info: TicketInfo,
    pub event: String,
}

impl TriggerPayload {
    pub fn parse(input: &str) -> Result<Self, TriggerError> {
        if input.trim().is_empty() {
            return Err(TriggerError::Empty);
        }
        Ok(serde_json::from_str(input)?)
    }

    /// The event as a known trigger, if it is one
    pub fn trigger(&self) -> Option<Trigger> {
        self.event.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        let payload = TriggerPayload::parse(
            r#"{"ticket_info": {"id": 42, "current_stage_name": "Review"}, "event": "advance"}"#,
        )
        .unwrap();
        assert_eq!(payload.ticket_info.id, 42);
        assert_eq!(payload.ticket_info.current_stage_name.as_deref(), Some("Review"));
        assert_eq!(payload.trigger(), Some(Trigger::Advance));
        assert_eq!(Trigger::Advance.kind(), TriggerKind::Step);
    }

    #[test]
    fn test_empty_and_invalid_payloads() {
        assert!(matches!(TriggerPayload::parse("  \n"), Err(TriggerError::Empty)));
        assert!(matches!(
            TriggerPayload::parse("<ticket_info/>"),
            Err(TriggerError::Invalid(_))
        ));
    }

    #[test]
    fn test_trigger_names_round_trip() {
        for trigger in Trigger::ALL {
            assert_eq!(trigger.as_str().parse::<Trigger>().unwrap(), trigger);
        }
        assert_eq!(
            "pre_assignment_script".parse::<Trigger>().unwrap(),
            Trigger::PreAssignmentScript
        );
        assert_eq!(Trigger::Close.kind(), TriggerKind::Action);
        assert!("TELEPORT".parse::<Trigger>().is_err());
    }
}
