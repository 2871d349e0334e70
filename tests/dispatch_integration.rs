//! Dispatch Integration Tests
//!
//! Drives the template engine and dispatcher through the public API with
//! in-memory tickets, templates and HTTP transport.

use std::fs;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use orca::config::{Config, SetupConfig};
use orca::integration::client::REST_INTEGRATION_KEY;
use orca::integration::{
    ActionDispatcher, DispatchError, MemoryTemplateStore, MockTransport, TemplateEngine, Trigger,
};
use orca::plugins::PluginRegistry;
use orca::secrets::StaticCredentials;
use orca::services::Services;
use orca::ticket::{MockTicketRepository, Ticket};

struct Fixture {
    repo: MockTicketRepository,
    http: MockTransport,
    templates: Arc<MemoryTemplateStore>,
    config: Config,
}

impl Fixture {
    fn new(ticket: Ticket) -> Self {
        let repo = MockTicketRepository::new();
        repo.insert_ticket(ticket);

        let mut config = Config::default();
        config.setup = SetupConfig {
            hostname: Some("itsm.example.com".to_string()),
            ..SetupConfig::default()
        };

        Self {
            repo,
            http: MockTransport::new(),
            templates: Arc::new(MemoryTemplateStore::new()),
            config,
        }
    }

    fn section(&mut self, name: &str, section: Value) {
        if let Value::Object(map) = section {
            self.config.integration.insert(name.to_string(), map);
        }
    }

    fn services(&self) -> Services {
        Services {
            tickets: Arc::new(self.repo.clone()),
            credentials: Arc::new(
                StaticCredentials::new().with_pair(REST_INTEGRATION_KEY, "svc", "pw"),
            ),
            templates: self.templates.clone(),
            http: Arc::new(self.http.clone()),
        }
    }

    fn engine_with(&self, plugins: &PluginRegistry) -> TemplateEngine {
        TemplateEngine::new(self.services(), self.config.setup.clone(), plugins, "integration")
            .unwrap()
    }

    fn engine(&self) -> TemplateEngine {
        self.engine_with(&PluginRegistry::empty())
    }

    fn dispatcher_with(&self, plugins: &PluginRegistry) -> ActionDispatcher {
        ActionDispatcher::new(self.engine_with(plugins), &self.config)
    }

    fn dispatcher(&self) -> ActionDispatcher {
        self.dispatcher_with(&PluginRegistry::empty())
    }
}

fn text(id: u64, name: &str, value: &str) -> Value {
    json!({"id": id, "name": name, "type": "text", "text": value})
}

fn firewall_ticket(steps: Value) -> Ticket {
    serde_json::from_value(json!({
        "id": 42,
        "subject": "Open port 443 to web farm",
        "workflow": {"id": 7, "name": "Firewall Change"},
        "requester": "r.ortiz",
        "status": "In Progress",
        "steps": steps,
    }))
    .unwrap()
}

fn review_ticket() -> Ticket {
    firewall_ticket(json!([
        {
            "id": 1,
            "name": "Request",
            "tasks": [{
                "id": 10,
                "name": "Default",
                "assignee": "r.ortiz",
                "status": "DONE",
                "fields": [text(100, "Business Justification", "older"), text(101, "id1", "1")],
            }],
        },
        {
            "id": 2,
            "name": "Review",
            "tasks": [{
                "id": 20,
                "name": "Default",
                "assignee": "a.chen",
                "status": "ASSIGNED",
                "fields": [
                    text(200, "Business Justification", "newest"),
                    text(201, "id2", "2"),
                    text(202, "Field A", ""),
                ],
            }],
        },
    ]))
}

#[test]
fn test_document_without_placeholders_is_unchanged() {
    let fixture = Fixture::new(review_ticket());
    let document = json!({
        "summary": "no tokens here",
        "count": 3,
        "flags": [true, false, null],
        "nested": {"ratio": 0.5},
    });

    let out = fixture
        .engine()
        .substitute(42, None, &document, &Map::new())
        .unwrap();
    assert_eq!(out, document);
}

#[test]
fn test_builtin_function_placeholder() {
    let fixture = Fixture::new(review_ticket());
    let out = fixture
        .engine()
        .substitute_str(42, None, "#ticket_id#", &Map::new())
        .unwrap();
    assert_eq!(out, "42");
}

#[test]
fn test_plugin_function_shadows_builtin() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("Acme_Custom_Functions.toml"),
        r#"
[functions.ticket_id]
description = "Fixed id"
template = "PLUGIN"
"#,
    )
    .unwrap();

    let fixture = Fixture::new(review_ticket());
    let plugins = PluginRegistry::discover(dir.path());
    let out = fixture
        .engine_with(&plugins)
        .substitute_str(42, None, "#ticket_id#", &Map::new())
        .unwrap();
    assert_eq!(out, "PLUGIN");
}

#[test]
fn test_field_lookup_prefers_newest_step_and_ignores_case() {
    let fixture = Fixture::new(review_ticket());
    let out = fixture
        .engine()
        .substitute_str(42, None, "#business justification#", &Map::new())
        .unwrap();
    assert_eq!(out, "newest");
}

#[test]
fn test_map_response_writes_only_shared_keys() {
    let fixture = Fixture::new(review_ticket());
    let written = fixture
        .engine()
        .map_response(42, &json!({"a": 1, "b": 2}), &json!({"a": "#Field A#"}))
        .unwrap();

    assert_eq!(written, 1);
    let writes = fixture.repo.field_writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0.field_id, 202);
    assert_eq!(writes[0].1.render(), "1");
}

#[test]
fn test_close_is_rerouted_to_autoclose_for_untouched_task() {
    let untouched = firewall_ticket(json!([{
        "id": 1,
        "name": "Review",
        "tasks": [{"id": 5, "assignee": "N/A", "status": "N/A"}],
    }]));
    let mut fixture = Fixture::new(untouched.clone());
    fixture.section(
        "Firewall Change-AUTOCLOSE",
        json!({"request_template_name": "close.json", "endpoint": "/api/autoclose"}),
    );
    fixture.templates.insert("close.json", &json!({"id": "#ticket_id#"}));

    let routed = fixture
        .dispatcher()
        .handle_action(&untouched, Trigger::Close)
        .unwrap();
    assert_eq!(routed, Trigger::AutoClose);
    assert_eq!(
        fixture.http.urls(),
        vec!["https://itsm.example.com/api/autoclose"]
    );

    let worked = review_ticket();
    let routed = fixture.dispatcher().handle_action(&worked, Trigger::Close).unwrap();
    assert_eq!(routed, Trigger::Close);
}

#[test]
fn test_endpoint_fan_out_over_resolved_ids() {
    let mut fixture = Fixture::new(review_ticket());
    fixture.section(
        "Firewall Change-REDO",
        json!({
            "request_template_name": "redo.json",
            "endpoint": "/api/items/#id1#,#id2#",
            "http_method": "PUT",
        }),
    );
    fixture.templates.insert("redo.json", &json!({"state": "redo"}));

    let ticket = review_ticket();
    fixture
        .dispatcher()
        .handle_action(&ticket, Trigger::Redo)
        .unwrap();

    assert_eq!(
        fixture.http.urls(),
        vec![
            "https://itsm.example.com/api/items/1",
            "https://itsm.example.com/api/items/2",
        ]
    );
}

#[test]
fn test_expected_status_codes_accept_and_reject() {
    let mut fixture = Fixture::new(review_ticket());
    fixture.section(
        "Firewall Change-REJECT",
        json!({
            "request_template_name": "reject.json",
            "endpoint": "/api/reject",
            "expected_status_codes": "200, 201,204",
        }),
    );
    fixture.templates.insert("reject.json", &json!({}));
    fixture.http.push_response(201, "{}");
    fixture.http.push_response(400, r#"{"error": "bad"}"#);

    let ticket = review_ticket();
    let dispatcher = fixture.dispatcher();
    dispatcher.handle_action(&ticket, Trigger::Reject).unwrap();

    let err = dispatcher
        .handle_action(&ticket, Trigger::Reject)
        .unwrap_err();
    assert!(matches!(err, DispatchError::Http { status: 400, .. }));
}

#[test]
fn test_pre_function_can_stop_the_request() {
    let mut fixture = Fixture::new(firewall_ticket(json!([
        {
            "id": 1,
            "name": "Request",
            "skipped": true,
            "tasks": [{"id": 10, "assignee": "r.ortiz", "status": "DONE"}],
        },
        {
            "id": 2,
            "name": "Review",
            "tasks": [{"id": 20, "assignee": "a.chen", "status": "ASSIGNED"}],
        },
    ])));
    fixture.section(
        "Firewall Change-REOPEN",
        json!({
            "request_template_name": "reopen.json",
            "endpoint": "/api/reopen",
            "pre": "do_not_send_request_if_the_previous_step_skipped",
        }),
    );
    fixture.templates.insert("reopen.json", &json!({}));

    let ticket = fixture.repo.current_ticket(42).unwrap();
    fixture
        .dispatcher()
        .handle_action(&ticket, Trigger::Reopen)
        .unwrap();
    assert_eq!(fixture.http.request_count(), 0);
}

#[test]
fn test_plugin_action_shadows_builtin_action() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("acme_custom_functions.toml"),
        r#"
[functions.cancel_ticket]
description = "Hold the request instead of cancelling"
template = "true"
"#,
    )
    .unwrap();

    let mut fixture = Fixture::new(review_ticket());
    fixture.section(
        "Firewall Change-REJECT",
        json!({
            "request_template_name": "reject.json",
            "endpoint": "/api/reject",
            "pre": "cancel_ticket",
        }),
    );
    fixture.templates.insert("reject.json", &json!({"id": "#ticket_id#"}));

    let plugins = PluginRegistry::discover(dir.path());
    let ticket = fixture.repo.current_ticket(42).unwrap();
    fixture
        .dispatcher_with(&plugins)
        .handle_action(&ticket, Trigger::Reject)
        .unwrap();

    assert!(fixture.repo.cancelled.lock().unwrap().is_empty());
    assert_eq!(fixture.http.request_count(), 0);
}

#[test]
fn test_restore_skipped_when_ticket_moved_on() {
    let waiting = firewall_ticket(json!([{
        "id": 1,
        "name": "Review",
        "tasks": [{"id": 5, "name": "Default", "assignee": "N/A", "status": "WAITING_TO_BE_ASSIGNED"}],
    }]));
    let moved_on = firewall_ticket(json!([
        {"id": 1, "name": "Review", "tasks": [{"id": 5, "assignee": "integration", "status": "DONE"}]},
        {"id": 2, "name": "Approve", "tasks": [{"id": 6, "assignee": "b.lee", "status": "ASSIGNED"}]},
    ]));

    let fixture = Fixture::new(waiting.clone());
    fixture
        .repo
        .set_participants(7, "Review", "Default", vec!["a.chen".to_string()]);
    fixture
        .repo
        .push_ticket_sequence(vec![waiting.clone(), waiting, moved_on]);

    let engine = fixture.engine();
    let (_, reassignment) = engine.reassign(42).unwrap();
    assert!(reassignment.is_some());
    engine.restore(reassignment).unwrap();

    let reassignments = fixture.repo.reassignments.lock().unwrap();
    assert_eq!(reassignments.len(), 1);
    assert_eq!(reassignments[0].username, "integration");
}
