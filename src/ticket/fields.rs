//! Typed task fields and their rendering into template text

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::access_request::{AccessRequest, DesignerSummary, GroupChange, Hyperlink, NetworkObject};

const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum FieldError {
    #[error("field '{0}' of type {1} cannot be set from a response value")]
    Unsupported(String, FieldKind),

    #[error("field '{name}' expects {expected}, got '{value}'")]
    InvalidValue {
        name: String,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: u64,
    pub name: String,
    #[serde(flatten)]
    pub value: FieldValue,
}

/// Field value keyed by the platform's field type tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldValue {
    ApproveReject {
        #[serde(default)]
        approved: Option<bool>,
        #[serde(default)]
        reason: Option<String>,
    },
    Text {
        #[serde(default)]
        text: Option<String>,
    },
    TextArea {
        #[serde(default)]
        text: Option<String>,
    },
    Date {
        #[serde(default)]
        value: Option<NaiveDate>,
    },
    Time {
        #[serde(default)]
        value: Option<String>,
    },
    Checkbox {
        #[serde(default)]
        checked: bool,
    },
    Hyperlink {
        #[serde(default)]
        url: Option<String>,
    },
    DropDown {
        #[serde(default)]
        selection: Option<String>,
        #[serde(default)]
        options: Vec<String>,
    },
    MultipleSelection {
        #[serde(default)]
        selected: Vec<String>,
        #[serde(default)]
        options: Vec<String>,
    },
    MultiHyperlink {
        #[serde(default)]
        hyperlinks: Vec<Hyperlink>,
    },
    MultiNetworkObject {
        #[serde(default)]
        network_objects: Vec<NetworkObject>,
    },
    MultiGroupChange {
        #[serde(default)]
        group_changes: Vec<GroupChange>,
    },
    MultiAccessRequest {
        #[serde(default)]
        access_requests: Vec<AccessRequest>,
        #[serde(default)]
        designer_result: Option<DesignerSummary>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    ApproveReject,
    Text,
    TextArea,
    Date,
    Time,
    Checkbox,
    Hyperlink,
    DropDown,
    MultipleSelection,
    MultiHyperlink,
    MultiNetworkObject,
    MultiGroupChange,
    MultiAccessRequest,
    Unsupported,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::ApproveReject => "approve_reject",
            FieldKind::Text => "text",
            FieldKind::TextArea => "text_area",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Hyperlink => "hyperlink",
            FieldKind::DropDown => "drop_down",
            FieldKind::MultipleSelection => "multiple_selection",
            FieldKind::MultiHyperlink => "multi_hyperlink",
            FieldKind::MultiNetworkObject => "multi_network_object",
            FieldKind::MultiGroupChange => "multi_group_change",
            FieldKind::MultiAccessRequest => "multi_access_request",
            FieldKind::Unsupported => "unsupported",
        }
    }

    /// Parse a type tag; accepts `-` as well as `_` separators
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_ascii_lowercase().replace('-', "_");
        [
            FieldKind::ApproveReject,
            FieldKind::Text,
            FieldKind::TextArea,
            FieldKind::Date,
            FieldKind::Time,
            FieldKind::Checkbox,
            FieldKind::Hyperlink,
            FieldKind::DropDown,
            FieldKind::MultipleSelection,
            FieldKind::MultiHyperlink,
            FieldKind::MultiNetworkObject,
            FieldKind::MultiGroupChange,
            FieldKind::MultiAccessRequest,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == normalized)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        self.value.kind()
    }

    /// Render the field the way templates see it
    pub fn render(&self) -> String {
        self.value.render()
    }

    /// Overwrite the field value from a JSON response value
    pub fn set_from_json(&mut self, value: &Value) -> Result<(), FieldError> {
        let invalid = |expected: &'static str| FieldError::InvalidValue {
            name: self.name.clone(),
            expected,
            value: value.to_string(),
        };

        match &mut self.value {
            FieldValue::Text { text } | FieldValue::TextArea { text } => {
                *text = Some(plain_string(value));
            }
            FieldValue::Time { value: time } => *time = Some(plain_string(value)),
            FieldValue::Hyperlink { url } => *url = Some(plain_string(value)),
            FieldValue::DropDown { selection, .. } => *selection = Some(plain_string(value)),
            FieldValue::Date { value: date } => {
                let parsed = NaiveDate::parse_from_str(&plain_string(value), "%Y-%m-%d")
                    .map_err(|_| invalid("a YYYY-MM-DD date"))?;
                *date = Some(parsed);
            }
            FieldValue::Checkbox { checked } => {
                *checked = json_truthy(value).ok_or_else(|| invalid("a boolean"))?;
            }
            FieldValue::ApproveReject { approved, reason } => match value {
                Value::Object(map) => {
                    *approved = map.get("approved").and_then(json_truthy);
                    *reason = map.get("reason").map(plain_string);
                }
                other => *approved = Some(json_truthy(other).ok_or_else(|| invalid("a boolean"))?),
            },
            FieldValue::MultipleSelection { selected, .. } => {
                *selected = match value {
                    Value::Array(items) => items.iter().map(plain_string).collect(),
                    other => vec![plain_string(other)],
                };
            }
            other => return Err(FieldError::Unsupported(self.name.clone(), other.kind())),
        }
        Ok(())
    }
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::ApproveReject { .. } => FieldKind::ApproveReject,
            FieldValue::Text { .. } => FieldKind::Text,
            FieldValue::TextArea { .. } => FieldKind::TextArea,
            FieldValue::Date { .. } => FieldKind::Date,
            FieldValue::Time { .. } => FieldKind::Time,
            FieldValue::Checkbox { .. } => FieldKind::Checkbox,
            FieldValue::Hyperlink { .. } => FieldKind::Hyperlink,
            FieldValue::DropDown { .. } => FieldKind::DropDown,
            FieldValue::MultipleSelection { .. } => FieldKind::MultipleSelection,
            FieldValue::MultiHyperlink { .. } => FieldKind::MultiHyperlink,
            FieldValue::MultiNetworkObject { .. } => FieldKind::MultiNetworkObject,
            FieldValue::MultiGroupChange { .. } => FieldKind::MultiGroupChange,
            FieldValue::MultiAccessRequest { .. } => FieldKind::MultiAccessRequest,
            FieldValue::Unsupported => FieldKind::Unsupported,
        }
    }

    pub fn render(&self) -> String {
        match self {
            FieldValue::ApproveReject { approved, reason } => {
                let status = if approved.unwrap_or(false) {
                    "Approved"
                } else {
                    "Rejected"
                };
                format!(
                    "Status: {}; Reason: {}",
                    status,
                    reason.as_deref().unwrap_or_default()
                )
            }
            // The platform's own rendering: X marks an unchecked box
            FieldValue::Checkbox { checked } => {
                format!("[{}]", if *checked { "X" } else { "V" })
            }
            FieldValue::Date { value } => value
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.format(DATE_FORMAT).to_string())
                .unwrap_or_default(),
            FieldValue::Text { text } | FieldValue::TextArea { text } => {
                text.clone().unwrap_or_default()
            }
            FieldValue::Time { value } => value.clone().unwrap_or_default(),
            FieldValue::Hyperlink { url } => url.clone().unwrap_or_default(),
            FieldValue::DropDown { selection, .. } => selection.clone().unwrap_or_default(),
            FieldValue::MultipleSelection { selected, .. } => selected.join(", "),
            FieldValue::MultiHyperlink { hyperlinks } => hyperlinks
                .iter()
                .map(|h| h.url.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            FieldValue::MultiNetworkObject { network_objects } => network_objects
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            FieldValue::MultiGroupChange { group_changes } => group_changes
                .iter()
                .map(GroupChange::to_pretty_string)
                .collect::<Vec<_>>()
                .join("\n"),
            FieldValue::MultiAccessRequest {
                access_requests, ..
            } => access_requests
                .iter()
                .map(AccessRequest::to_pretty_string)
                .collect::<Vec<_>>()
                .join("\n"),
            FieldValue::Unsupported => String::new(),
        }
    }

    pub fn access_requests(&self) -> Option<&[AccessRequest]> {
        match self {
            FieldValue::MultiAccessRequest {
                access_requests, ..
            } => Some(access_requests),
            _ => None,
        }
    }

    pub fn designer_summary(&self) -> Option<&DesignerSummary> {
        match self {
            FieldValue::MultiAccessRequest {
                designer_result, ..
            } => designer_result.as_ref(),
            _ => None,
        }
    }

    pub fn is_empty_text(&self) -> bool {
        match self {
            FieldValue::Text { text } | FieldValue::TextArea { text } => {
                text.as_deref().map_or(true, str::is_empty)
            }
            _ => false,
        }
    }
}

/// Render several fields into a single comma separated string
pub fn render_fields(fields: &[&Field]) -> String {
    fields
        .iter()
        .map(|f| f.render())
        .collect::<Vec<_>>()
        .join(", ")
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
