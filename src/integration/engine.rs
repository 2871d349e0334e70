//! JSON template engine: placeholder substitution, outbound requests and
//! mapping responses back into ticket fields

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::action::ActionConfig;
use super::client::{send_checked, ConnectionSettings, Credentials, OutboundRequest};
use super::error::DispatchError;
use super::placeholder::{Placeholder, PlaceholderPattern};
use super::template::TemplateError;
use crate::config::SetupConfig;
use crate::functions::{is_truthy, stringify, FunctionArgs, FunctionRegistry, Invocation};
use crate::plugins::PluginRegistry;
use crate::services::Services;
use crate::ticket::{render_fields, Field, FieldRef, Task, TaskRef, Ticket};

pub const REASSIGN_COMMENT: &str = "Reassigned by integration script";

/// Which hook list of a section is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Pre => "pre",
            Phase::Post => "post",
        }
    }
}

/// A task temporarily taken over by the integration user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reassignment {
    pub task: TaskRef,
}

pub struct TemplateEngine {
    services: Services,
    setup: SetupConfig,
    integration_user: String,
    pattern: PlaceholderPattern,
    placeholders: FunctionRegistry,
    actions: FunctionRegistry,
}

impl TemplateEngine {
    pub fn new(
        services: Services,
        setup: SetupConfig,
        plugins: &PluginRegistry,
        integration_user: impl Into<String>,
    ) -> Result<Self, DispatchError> {
        let pattern = PlaceholderPattern::new(&setup.specifier).map_err(|e| {
            DispatchError::configuration(format!("invalid specifier '{}': {e}", setup.specifier))
        })?;

        Ok(Self {
            services,
            setup,
            integration_user: integration_user.into(),
            pattern,
            placeholders: FunctionRegistry::placeholders(plugins),
            actions: FunctionRegistry::actions(plugins),
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn pattern(&self) -> &PlaceholderPattern {
        &self.pattern
    }

    pub fn get_template(&self, name: &str) -> Result<Value, TemplateError> {
        self.services.templates.load(name)
    }

    /// Value for one token, or `None` when nothing resolves it
    pub fn resolve_placeholder(
        &self,
        ticket_id: u64,
        step_name: Option<&str>,
        token: &str,
        args: &FunctionArgs,
    ) -> Result<Option<String>, DispatchError> {
        let ticket = self.services.tickets.get_ticket(ticket_id)?;
        let placeholder = self.pattern.parse(token);
        Ok(self.resolve_parsed(&ticket, step_name, &placeholder, args))
    }

    fn resolve_parsed(
        &self,
        ticket: &Ticket,
        step_name: Option<&str>,
        placeholder: &Placeholder,
        args: &FunctionArgs,
    ) -> Option<String> {
        let name = placeholder.name.as_str();

        let value = if let Some(function) = self.placeholders.get(name) {
            debug!(
                ticket_id = ticket.id,
                function = name,
                plugin = function.is_plugin(),
                "Resolving placeholder with function"
            );
            let invocation = Invocation {
                services: &self.services,
                ticket,
                value: None,
                args,
            };
            match function.call(&invocation) {
                Ok(value) => stringify(&value),
                Err(e) => {
                    error!(
                        ticket_id = ticket.id,
                        function = name,
                        "Placeholder function failed: {:#}",
                        e
                    );
                    return None;
                }
            }
        } else {
            self.field_value(ticket, step_name, name)?
        };

        Some(match &placeholder.post_function {
            Some(post) => self.apply_post_function(ticket, post, value, args),
            None => value,
        })
    }

    /// Rendered value of the fields named `name`
    fn field_value(&self, ticket: &Ticket, step_name: Option<&str>, name: &str) -> Option<String> {
        let fields: Vec<&Field> = match step_name {
            Some(step_name) => {
                let Some(step) = ticket.step_by_name(step_name) else {
                    error!(
                        ticket_id = ticket.id,
                        step = step_name,
                        field = name,
                        "Step for placeholder lookup not found"
                    );
                    return None;
                };
                step.fields_named(name)
            }
            None => ticket
                .steps
                .iter()
                .rev()
                .map(|step| step.fields_named(name))
                .find(|fields| !fields.is_empty())
                .unwrap_or_default(),
        };

        if fields.is_empty() {
            error!(
                ticket_id = ticket.id,
                placeholder = name,
                "No function or field found for placeholder"
            );
            return None;
        }
        Some(render_fields(&fields))
    }

    fn apply_post_function(
        &self,
        ticket: &Ticket,
        post: &str,
        value: String,
        args: &FunctionArgs,
    ) -> String {
        let Some(function) = self.placeholders.get(post) else {
            error!(
                ticket_id = ticket.id,
                function = post,
                "Unknown post function, value left unchanged"
            );
            return value;
        };

        let invocation = Invocation {
            services: &self.services,
            ticket,
            value: Some(&value),
            args,
        };
        match function.call(&invocation) {
            Ok(result) => stringify(&result),
            Err(e) => {
                error!(
                    ticket_id = ticket.id,
                    function = post,
                    "Post function failed, value left unchanged: {:#}",
                    e
                );
                value
            }
        }
    }

    /// Copy of `document` with every token in every string replaced
    pub fn substitute(
        &self,
        ticket_id: u64,
        step_name: Option<&str>,
        document: &Value,
        args: &FunctionArgs,
    ) -> Result<Value, DispatchError> {
        Ok(match document {
            Value::String(text) => Value::String(self.substitute_str(ticket_id, step_name, text, args)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.substitute(ticket_id, step_name, item, args))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        Ok((key.clone(), self.substitute(ticket_id, step_name, value, args)?))
                    })
                    .collect::<Result<_, DispatchError>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Replace every token occurring in `text`
    pub fn substitute_str(
        &self,
        ticket_id: u64,
        step_name: Option<&str>,
        text: &str,
        args: &FunctionArgs,
    ) -> Result<String, DispatchError> {
        let mut tokens = self.pattern.find_all(text);
        if tokens.is_empty() {
            return Ok(text.to_string());
        }
        tokens.dedup();

        let mut result = text.to_string();
        for token in tokens {
            if let Some(value) = self.resolve_placeholder(ticket_id, step_name, token, args)? {
                result = result.replace(token, &value);
            }
        }
        Ok(result)
    }

    /// Send `body` to `endpoint` with the section's connection settings
    pub fn send(
        &self,
        config: &ActionConfig,
        endpoint: &str,
        body: &Value,
    ) -> Result<Value, DispatchError> {
        let settings = ConnectionSettings::resolve(&self.setup, &config.args)?;
        let credentials =
            Credentials::resolve(self.services.credentials.as_ref(), settings.auth_method)?;
        let request = OutboundRequest::new(
            &settings,
            credentials,
            config.http_method,
            endpoint,
            body.clone(),
        );
        let response = send_checked(
            self.services.http.as_ref(),
            &request,
            &config.expected_status_codes,
        )?;
        debug!(endpoint, "Endpoint response: {}", response);
        Ok(response)
    }

    /// Endpoints to call after resolving placeholders in `endpoint`
    ///
    /// A resolved value holding several comma-separated ids fans out: the
    /// first entry is used as-is and every further id is appended to the part
    /// of the configured endpoint before its first placeholder.
    pub fn endpoints(
        &self,
        ticket_id: u64,
        step_name: Option<&str>,
        endpoint: &str,
        args: &FunctionArgs,
    ) -> Result<Vec<String>, DispatchError> {
        let resolved = self.substitute_str(ticket_id, step_name, endpoint, args)?;
        let compact: String = resolved.chars().filter(|c| *c != ' ').collect();
        let mut parts = compact.split(',');

        let mut endpoints: Vec<String> = parts.next().map(str::to_string).into_iter().collect();
        let base = self.pattern.prefix(endpoint);
        endpoints.extend(parts.map(|id| format!("{base}{id}")));
        Ok(endpoints)
    }

    /// Walk `response` and `template` together and write the response values
    /// into the fields the template names
    ///
    /// Returns the number of fields written.
    pub fn map_response(
        &self,
        ticket_id: u64,
        response: &Value,
        template: &Value,
    ) -> Result<usize, DispatchError> {
        let ticket = self.services.tickets.get_ticket(ticket_id)?;
        Ok(self.map_value(&ticket, response, template, ""))
    }

    fn map_value(&self, ticket: &Ticket, response: &Value, template: &Value, path: &str) -> usize {
        match (response, template) {
            (Value::Object(response), Value::Object(template)) => response
                .iter()
                .map(|(key, value)| {
                    let path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    match template.get(key) {
                        Some(template) => self.map_value(ticket, value, template, &path),
                        None => {
                            debug!(ticket_id = ticket.id, key = %path, "Response key not in template");
                            0
                        }
                    }
                })
                .sum(),
            (Value::Array(response), Value::Array(template)) => response
                .iter()
                .zip(template)
                .enumerate()
                .map(|(i, (value, template))| {
                    self.map_value(ticket, value, template, &format!("{path}[{i}]"))
                })
                .sum(),
            (value, template) => {
                let placeholders = match template {
                    Value::String(text) => self.pattern.placeholders(text),
                    _ => Vec::new(),
                };
                if placeholders.is_empty() {
                    warn!(
                        ticket_id = ticket.id,
                        key = %path,
                        "No placeholders in response template value"
                    );
                    return 0;
                }
                placeholders
                    .iter()
                    .filter(|p| self.write_field(ticket, &p.name, value))
                    .count()
            }
        }
    }

    /// Set a field on the ticket's last task; failures are logged
    fn write_field(&self, ticket: &Ticket, name: &str, value: &Value) -> bool {
        let Some(step) = ticket.last_step() else {
            error!(ticket_id = ticket.id, "Ticket has no steps to write into");
            return false;
        };
        let Some(task) = step.last_task() else {
            error!(ticket_id = ticket.id, step = %step.name, "Step has no task to write into");
            return false;
        };
        let Some(existing) = task.fields_named(name).into_iter().next() else {
            error!(ticket_id = ticket.id, field = name, "Field not found on the last task");
            return false;
        };

        let mut field = existing.clone();
        if let Err(e) = field.set_from_json(value) {
            error!(ticket_id = ticket.id, field = name, "Cannot set field: {}", e);
            return false;
        }

        let field_ref = FieldRef {
            task: ticket.task_ref(step, task),
            field_id: field.id,
        };
        match self.services.tickets.put_field(&field_ref, &field) {
            Ok(()) => {
                info!(ticket_id = ticket.id, field = name, "Field updated from response");
                true
            }
            Err(e) => {
                error!(ticket_id = ticket.id, field = name, "Failed to update field: {}", e);
                false
            }
        }
    }

    /// Take over the last task when nobody is assigned to it
    ///
    /// Returns the re-fetched ticket and the reassignment to undo, if any.
    pub fn reassign(&self, ticket_id: u64) -> Result<(Ticket, Option<Reassignment>), DispatchError> {
        let ticket = self.services.tickets.get_ticket(ticket_id)?;
        let waiting = ticket
            .last_task()
            .is_some_and(Task::is_waiting_to_be_assigned);
        let Some(task_ref) = ticket.last_task_ref().filter(|_| waiting) else {
            return Ok((ticket, None));
        };

        info!(
            ticket_id,
            task_id = task_ref.task_id,
            user = %self.integration_user,
            "Reassigning waiting task to the integration user"
        );
        self.services
            .tickets
            .reassign_task(&task_ref, &self.integration_user, REASSIGN_COMMENT)?;
        let ticket = self.services.tickets.get_ticket(ticket_id)?;
        Ok((ticket, Some(Reassignment { task: task_ref })))
    }

    /// Hand a task taken over by [`reassign`](Self::reassign) back to its step's participant
    ///
    /// Skipped when the ticket moved on to another task in the meantime.
    pub fn restore(&self, reassignment: Option<Reassignment>) -> Result<(), DispatchError> {
        let Some(reassignment) = reassignment else {
            return Ok(());
        };
        let ticket_id = reassignment.task.ticket_id;
        let ticket = self.services.tickets.get_ticket(ticket_id)?;
        let Some(step) = ticket.last_step() else {
            return Ok(());
        };
        let Some(task) = step.last_task() else {
            return Ok(());
        };
        if task.id != reassignment.task.task_id {
            debug!(ticket_id, "Last task changed since reassignment, not restoring");
            return Ok(());
        }

        let participants = self.services.tickets.task_participants(
            ticket.workflow.id,
            &step.name,
            &task.name,
        )?;
        let Some(participant) = participants.first() else {
            warn!(
                ticket_id,
                step = %step.name,
                task = %task.name,
                "No participant to hand the task back to"
            );
            return Ok(());
        };

        info!(ticket_id, user = %participant, "Handing task back");
        self.services
            .tickets
            .reassign_task(&ticket.task_ref(step, task), participant, REASSIGN_COMMENT)?;
        Ok(())
    }

    /// Run a section's pre or post functions inside a reassign/restore pair
    ///
    /// Returns whether any function returned a truthy result. An unknown
    /// function name stops the remaining functions of the phase.
    pub fn run_functions(
        &self,
        ticket_id: u64,
        phase: Phase,
        names: &[String],
        args: &FunctionArgs,
    ) -> Result<bool, DispatchError> {
        if names.is_empty() {
            return Ok(false);
        }

        let (ticket, reassignment) = self.reassign(ticket_id)?;
        let outcome = self.call_actions(&ticket, phase, names, args);
        self.restore(reassignment)?;
        outcome
    }

    fn call_actions(
        &self,
        ticket: &Ticket,
        phase: Phase,
        names: &[String],
        args: &FunctionArgs,
    ) -> Result<bool, DispatchError> {
        let mut any_truthy = false;
        for name in names {
            info!(ticket_id = ticket.id, phase = phase.as_str(), function = %name, "Executing function");
            let Some(function) = self.actions.get(name) else {
                error!(
                    ticket_id = ticket.id,
                    phase = phase.as_str(),
                    function = %name,
                    "Cannot find function, skipping the remaining functions"
                );
                break;
            };

            let invocation = Invocation {
                services: &self.services,
                ticket,
                value: None,
                args,
            };
            let result = function
                .call(&invocation)
                .map_err(|e| DispatchError::function(name.clone(), e))?;
            any_truthy |= is_truthy(&result);
        }
        Ok(any_truthy)
    }

    /// Execute a section against a ticket
    pub fn run(&self, ticket_id: u64, config: &ActionConfig) -> Result<(), DispatchError> {
        let skip_request = self.run_functions(ticket_id, Phase::Pre, &config.pre, &config.args)?;

        if skip_request {
            info!(ticket_id, "A pre function asked not to send the request");
        } else {
            self.send_request(ticket_id, config)?;
        }

        self.run_functions(ticket_id, Phase::Post, &config.post, &config.args)?;
        Ok(())
    }

    fn send_request(&self, ticket_id: u64, config: &ActionConfig) -> Result<(), DispatchError> {
        let Some(template_name) = config.request_template_name.as_deref() else {
            info!(ticket_id, "No request template configured, nothing to send");
            return Ok(());
        };
        let template = match self.get_template(template_name) {
            Ok(template) => template,
            Err(e) => {
                warn!(ticket_id, template = template_name, "Cannot get template: {}", e);
                return Ok(());
            }
        };
        let Some(endpoint) = config.endpoint.as_deref() else {
            return Err(DispatchError::configuration("the 'endpoint' parameter must be set"));
        };

        let step_name = config.step_name.as_deref();
        let body = self.substitute(ticket_id, step_name, &template, &config.args)?;

        let mut last_response = Value::Null;
        for endpoint in self.endpoints(ticket_id, step_name, endpoint, &config.args)? {
            last_response = self.send(config, &endpoint, &body)?;
        }

        if let Some(response_template) = config.response_template_name.as_deref() {
            let (_, reassignment) = self.reassign(ticket_id)?;
            let mapped = match self.get_template(response_template) {
                Ok(template) => self
                    .map_response(ticket_id, &last_response, &template)
                    .map(|written| debug!(ticket_id, written, "Response mapped into ticket fields")),
                Err(e) => {
                    error!(
                        ticket_id,
                        template = response_template,
                        "Cannot get response template: {}",
                        e
                    );
                    Ok(())
                }
            };
            // The task goes back to its participant even when mapping failed.
            self.restore(reassignment)?;
            mapped?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Map};

    use super::*;
    use crate::integration::client::{MockTransport, REST_INTEGRATION_KEY};
    use crate::integration::template::MemoryTemplateStore;
    use crate::secrets::StaticCredentials;
    use crate::ticket::tests::{step, task, text_field, ticket};
    use crate::ticket::{task_status, MockTicketRepository};

    struct Harness {
        repo: MockTicketRepository,
        http: MockTransport,
        templates: Arc<MemoryTemplateStore>,
        engine: TemplateEngine,
    }

    fn harness(ticket: Ticket) -> Harness {
        let repo = MockTicketRepository::new();
        repo.insert_ticket(ticket);
        let http = MockTransport::new();
        let templates = Arc::new(MemoryTemplateStore::new());
        let services = Services {
            tickets: Arc::new(repo.clone()),
            credentials: Arc::new(
                StaticCredentials::new().with_pair(REST_INTEGRATION_KEY, "svc", "pw"),
            ),
            templates: templates.clone(),
            http: Arc::new(http.clone()),
        };
        let setup = SetupConfig {
            hostname: Some("vuln.example.com".to_string()),
            ..SetupConfig::default()
        };
        let engine =
            TemplateEngine::new(services, setup, &PluginRegistry::empty(), "integration").unwrap();
        Harness {
            repo,
            http,
            templates,
            engine,
        }
    }

    fn two_step_ticket() -> Ticket {
        ticket(vec![
            step(
                1,
                "Request",
                vec![task(10, "r.ortiz", "DONE", vec![text_field(100, "Business Owner", "old")])],
            ),
            step(
                2,
                "Review",
                vec![task(
                    20,
                    "a.chen",
                    "ASSIGNED",
                    vec![
                        text_field(200, "Business Owner", "new"),
                        text_field(201, "External Id", ""),
                    ],
                )],
            ),
        ])
    }

    fn config(value: Value) -> ActionConfig {
        match value {
            Value::Object(map) => ActionConfig::from_section(&map).unwrap(),
            _ => panic!("section must be an object"),
        }
    }

    #[test]
    fn test_substitute_without_tokens_is_identity() {
        let h = harness(two_step_ticket());
        let doc = json!({"a": [1, "plain", null, {"b": true}], "c": 2.5});
        let out = h.engine.substitute(42, None, &doc, &Map::new()).unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn test_function_and_field_tokens() {
        let h = harness(two_step_ticket());
        let doc = json!({
            "id": "#ticket_id#",
            "owner": "#business owner#",
            "first": "#Business Owner#",
            "nested": ["Ticket #ticket_id# for #ticket_id#"],
        });
        let out = h.engine.substitute(42, None, &doc, &Map::new()).unwrap();
        assert_eq!(out["id"], "42");
        assert_eq!(out["owner"], "new");
        assert_eq!(out["nested"][0], "Ticket 42 for 42");
    }

    #[test]
    fn test_step_name_scopes_field_lookup() {
        let h = harness(two_step_ticket());
        let out = h
            .engine
            .substitute_str(42, Some("Request"), "#Business Owner#", &Map::new())
            .unwrap();
        assert_eq!(out, "old");

        let missing = h
            .engine
            .substitute_str(42, Some("Nope"), "#Business Owner#", &Map::new())
            .unwrap();
        assert_eq!(missing, "#Business Owner#");
    }

    #[test]
    fn test_unresolved_token_is_kept() {
        let h = harness(two_step_ticket());
        let out = h
            .engine
            .substitute_str(42, None, "x #Unknown Field# y #ticket_id#", &Map::new())
            .unwrap();
        assert_eq!(out, "x #Unknown Field# y 42");
    }

    #[test]
    fn test_unknown_post_function_leaves_value() {
        let h = harness(two_step_ticket());
        let out = h
            .engine
            .substitute_str(42, None, "#ticket_id|no_such_filter#", &Map::new())
            .unwrap();
        assert_eq!(out, "42");
    }

    #[test]
    fn test_map_response_writes_shared_keys_only() {
        let h = harness(ticket(vec![step(
            1,
            "Review",
            vec![task(
                5,
                "a.chen",
                "ASSIGNED",
                vec![text_field(9, "Field A", ""), text_field(10, "Field B", "")],
            )],
        )]));

        let written = h
            .engine
            .map_response(42, &json!({"a": 1, "b": 2}), &json!({"a": "#Field A#"}))
            .unwrap();
        assert_eq!(written, 1);

        let writes = h.repo.field_writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0.field_id, 9);
        assert_eq!(writes[0].1.render(), "1");
    }

    #[test]
    fn test_map_response_recurses_into_objects() {
        let h = harness(two_step_ticket());
        let written = h
            .engine
            .map_response(
                42,
                &json!({"data": {"id": "EXT-9", "extra": true}}),
                &json!({"data": {"id": "#External Id#"}, "unused": "#Business Owner#"}),
            )
            .unwrap();
        assert_eq!(written, 1);
        let stored = h.repo.current_ticket(42).unwrap();
        assert_eq!(stored.last_task().unwrap().fields[1].render(), "EXT-9");
    }

    #[test]
    fn test_endpoint_fan_out() {
        let h = harness(ticket(vec![step(
            1,
            "Review",
            vec![task(
                5,
                "a.chen",
                "ASSIGNED",
                vec![text_field(9, "Item Ids", "1, 2, 3")],
            )],
        )]));
        h.templates.insert("req.json", &json!({"id": "#ticket_id#"}));
        let config = config(json!({
            "request_template_name": "req.json",
            "endpoint": "/api/items/#Item Ids#?notify=true",
        }));

        h.engine.run(42, &config).unwrap();
        assert_eq!(
            h.http.urls(),
            vec![
                "https://vuln.example.com/api/items/1",
                "https://vuln.example.com/api/items/2",
                "https://vuln.example.com/api/items/3?notify=true",
            ]
        );
    }

    #[test]
    fn test_single_endpoint_is_not_split() {
        let h = harness(two_step_ticket());
        let endpoints = h
            .engine
            .endpoints(42, None, "/api/items/#ticket_id#", &Map::new())
            .unwrap();
        assert_eq!(endpoints, vec!["/api/items/42"]);
    }

    #[test]
    fn test_run_sends_substituted_body_and_maps_response() {
        let h = harness(two_step_ticket());
        h.templates
            .insert("create.json", &json!({"summary": "Ticket #ticket_id#"}));
        h.templates.insert("create_response.json", &json!({"key": "#External Id#"}));
        h.http.push_response(201, r#"{"key": "SEC-1"}"#);

        let config = config(json!({
            "request_template_name": "create.json",
            "response_template_name": "create_response.json",
            "endpoint": "/rest/api/issue",
            "expected_status_codes": "200, 201,204",
        }));
        h.engine.run(42, &config).unwrap();

        let request = h.http.last_request().unwrap();
        assert_eq!(request.body, json!({"summary": "Ticket 42"}));
        assert_eq!(request.url, "https://vuln.example.com/rest/api/issue");
        let stored = h.repo.current_ticket(42).unwrap();
        assert_eq!(stored.last_task().unwrap().fields[1].render(), "SEC-1");
    }

    #[test]
    fn test_unexpected_status_is_an_error() {
        let h = harness(two_step_ticket());
        h.templates.insert("create.json", &json!({}));
        h.http.push_response(400, "nope");
        let config = config(json!({
            "request_template_name": "create.json",
            "endpoint": "/x",
        }));
        assert!(matches!(
            h.engine.run(42, &config),
            Err(DispatchError::Http { status: 400, .. })
        ));
    }

    #[test]
    fn test_missing_template_skips_request_but_runs_post() {
        let h = harness(two_step_ticket());
        let config = config(json!({
            "request_template_name": "missing.json",
            "endpoint": "/x",
            "post": "cancel_ticket",
        }));
        h.engine.run(42, &config).unwrap();
        assert_eq!(h.http.request_count(), 0);
        assert_eq!(*h.repo.cancelled.lock().unwrap(), vec![42]);
    }

    #[test]
    fn test_reassign_and_restore_waiting_task() {
        let h = harness(ticket(vec![step(
            1,
            "Review",
            vec![task(5, "N/A", task_status::WAITING_TO_BE_ASSIGNED, vec![])],
        )]));
        h.repo.set_participants(7, "Review", "Default", vec!["a.chen".to_string()]);

        let (ticket, reassignment) = h.engine.reassign(42).unwrap();
        assert!(reassignment.is_some());
        assert_eq!(ticket.last_task().unwrap().assignee, "integration");

        h.engine.restore(reassignment).unwrap();
        let reassignments = h.repo.reassignments.lock().unwrap();
        assert_eq!(reassignments.len(), 2);
        assert_eq!(reassignments[1].username, "a.chen");
        assert_eq!(reassignments[1].comment, REASSIGN_COMMENT);
    }

    #[test]
    fn test_failed_response_mapping_still_restores_task() {
        let h = harness(ticket(vec![step(
            1,
            "Review",
            vec![task(
                5,
                "N/A",
                task_status::WAITING_TO_BE_ASSIGNED,
                vec![text_field(50, "External Id", "")],
            )],
        )]));
        h.repo.set_participants(7, "Review", "Default", vec!["a.chen".to_string()]);
        h.templates.insert("create.json", &json!({"summary": "plain"}));
        h.templates.insert("create_response.json", &json!({"key": "#External Id#"}));
        h.http.push_response(201, r#"{"key": "SEC-1"}"#);
        // reassign fetches twice, then the fetch for mapping the response fails
        h.repo.fail_get_ticket_call(3);

        let config = config(json!({
            "request_template_name": "create.json",
            "response_template_name": "create_response.json",
            "endpoint": "/rest/api/issue",
        }));
        assert!(matches!(
            h.engine.run(42, &config),
            Err(DispatchError::Repository(_))
        ));

        let reassignments = h.repo.reassignments.lock().unwrap();
        assert_eq!(reassignments.len(), 2);
        assert_eq!(reassignments[0].username, "integration");
        assert_eq!(reassignments[1].username, "a.chen");
    }

    #[test]
    fn test_restore_skipped_when_last_task_changed() {
        let waiting = ticket(vec![step(
            1,
            "Review",
            vec![task(5, "N/A", task_status::WAITING_TO_BE_ASSIGNED, vec![])],
        )]);
        let mut moved_on = waiting.clone();
        moved_on.steps.push(step(2, "Approve", vec![task(6, "b.lee", "ASSIGNED", vec![])]));

        let h = harness(waiting.clone());
        // reassign fetches twice, restore fetches once more
        h.repo
            .push_ticket_sequence(vec![waiting.clone(), waiting, moved_on]);

        let (_, reassignment) = h.engine.reassign(42).unwrap();
        h.engine.restore(reassignment).unwrap();
        assert_eq!(h.repo.reassignments.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_function_stops_phase() {
        let h = harness(two_step_ticket());
        let names = vec!["no_such_action".to_string(), "cancel_ticket".to_string()];
        let truthy = h
            .engine
            .run_functions(42, Phase::Post, &names, &Map::new())
            .unwrap();
        assert!(!truthy);
        assert!(h.repo.cancelled.lock().unwrap().is_empty());
    }
}
