//! Typed view of an `[integration."<workflow>-<name>"]` section

use serde_json::{Map, Value};
use tracing::warn;

use super::client::{ExpectedStatusCodes, HttpMethod};
use super::error::DispatchError;

/// When a step section runs relative to the step change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timing {
    /// Run when the ticket enters the step
    #[default]
    Enter,
    /// Run when the ticket leaves the step
    Leave,
}

impl Timing {
    /// Anything but `leave` runs on enter
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("" | "enter") => Timing::Enter,
            Some("leave") => Timing::Leave,
            Some(other) => {
                warn!(timing = other, "Unknown timing, running the section on enter");
                Timing::Enter
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionConfig {
    pub request_template_name: Option<String>,
    pub endpoint: Option<String>,
    pub http_method: HttpMethod,
    pub expected_status_codes: ExpectedStatusCodes,
    pub response_template_name: Option<String>,
    /// Restricts field lookups to one step
    pub step_name: Option<String>,
    pub pre: Vec<String>,
    pub post: Vec<String>,
    pub timing: Timing,
    /// The whole section, handed to pre/post functions and connection settings
    pub args: Map<String, Value>,
}

impl ActionConfig {
    pub fn from_section(section: &Map<String, Value>) -> Result<Self, DispatchError> {
        let text = |key: &str| -> Option<String> {
            match section.get(key)? {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::String(_) | Value::Null => None,
                other => Some(other.to_string()),
            }
        };

        let config = Self {
            request_template_name: text("request_template_name"),
            endpoint: text("endpoint"),
            http_method: HttpMethod::parse(text("http_method").as_deref())?,
            expected_status_codes: ExpectedStatusCodes::from_value(
                section.get("expected_status_codes"),
            )?,
            response_template_name: text("response_template_name"),
            step_name: text("step_name"),
            pre: function_list(section.get("pre")),
            post: function_list(section.get("post")),
            timing: Timing::parse(text("timing").as_deref()),
            args: section.clone(),
        };

        if config.request_template_name.is_some() && config.endpoint.is_none() {
            return Err(DispatchError::configuration(
                "a section with a request_template_name must also set an endpoint",
            ));
        }
        Ok(config)
    }
}

/// Function names from `"a, b"` or `["a", "b"]`; spaces are ignored
pub fn function_list(value: Option<&Value>) -> Vec<String> {
    let names: Vec<String> = match value {
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    names
        .into_iter()
        .map(|name| name.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|name| !name.is_empty())
        .collect()
}
