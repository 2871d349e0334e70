//! Routes workflow triggers to configured sections

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::action::{ActionConfig, Timing};
use super::engine::TemplateEngine;
use super::error::DispatchError;
use super::trigger::{Trigger, TriggerKind, TriggerPayload};
use crate::config::{section_name, Config};
use crate::ticket::{PollPolicy, Task, Ticket};

pub struct ActionDispatcher {
    engine: TemplateEngine,
    sections: HashMap<String, Map<String, Value>>,
    poll_policy: PollPolicy,
}

impl ActionDispatcher {
    pub fn new(engine: TemplateEngine, config: &Config) -> Self {
        let sections = config
            .integration
            .iter()
            .map(|(key, section)| (key.to_lowercase(), section.clone()))
            .collect();
        Self {
            engine,
            sections,
            poll_policy: config.workflow_platform.poll_policy(),
        }
    }

    pub fn with_poll_policy(mut self, poll_policy: PollPolicy) -> Self {
        self.poll_policy = poll_policy;
        self
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    fn section(&self, workflow: &str, name: &str) -> Option<&Map<String, Value>> {
        self.sections
            .get(&format!("{workflow}-{name}").to_lowercase())
    }

    /// Parsed section, or `None` when the workflow has none for `name`
    fn action_config(&self, workflow: &str, name: &str) -> Result<Option<ActionConfig>, DispatchError> {
        match self.section(workflow, name) {
            Some(section) => ActionConfig::from_section(section).map(Some),
            None => {
                info!(section = %section_name(workflow, name), "No section configured");
                Ok(None)
            }
        }
    }

    /// Fetch the ticket named by a trigger payload and route the event
    pub fn dispatch(&self, payload: &TriggerPayload) -> Result<(), DispatchError> {
        let ticket_id = payload.ticket_info.id;
        let Some(trigger) = payload.trigger() else {
            info!(ticket_id, event = %payload.event, "Event is not handled");
            return Ok(());
        };

        info!(ticket_id, trigger = %trigger, "Script called for ticket");
        let ticket = self.engine.services().tickets.get_ticket(ticket_id)?;

        match trigger.kind() {
            TriggerKind::Step => {
                let prev_step_name = payload
                    .ticket_info
                    .current_stage_name
                    .as_deref()
                    .unwrap_or_default();
                self.handle_step(&ticket, prev_step_name)
            }
            TriggerKind::Action => self.handle_action(&ticket, trigger).map(|_| ()),
        }
    }

    /// Run the section configured for an action trigger
    ///
    /// Returns the trigger the section was looked up for, which is
    /// [`Trigger::AutoClose`] for a `CLOSE` on an untouched last task.
    pub fn handle_action(&self, ticket: &Ticket, action: Trigger) -> Result<Trigger, DispatchError> {
        info!(ticket_id = ticket.id, action = %action, "Handling action");

        let action = match action {
            Trigger::Close if ticket.last_task().is_some_and(Task::is_unattended) => {
                Trigger::AutoClose
            }
            other => other,
        };

        if let Some(config) = self.action_config(&ticket.workflow.name, action.as_str())? {
            self.engine.run(ticket.id, &config)?;
        }
        Ok(action)
    }

    /// Run the sections of the steps around a step change
    pub fn handle_step(&self, ticket: &Ticket, prev_step_name: &str) -> Result<(), DispatchError> {
        debug!(ticket_id = ticket.id, status = %ticket.status, "Handling step");

        if ticket.is_closed() {
            debug!(ticket_id = ticket.id, "Ticket is closed");
            return Ok(());
        }

        // A ticket still in its first step has no previous one; the trigger then
        // names the step being entered.
        let previous = ticket.previous_step().or_else(|| ticket.current_step());
        if previous.map(|s| s.name.as_str()) != Some(prev_step_name) {
            debug!(ticket_id = ticket.id, prev_step_name, "A skipped step");
            return Ok(());
        }

        let Some(expected_step) = ticket.current_step().map(|s| s.name.clone()) else {
            warn!(ticket_id = ticket.id, "No current step name");
            return Ok(());
        };

        let ticket = self.engine.services().tickets.get_ticket_when(
            ticket.id,
            &|t: &Ticket| t.has_no_pending_tasks(),
            &self.poll_policy,
        )?;

        let Some(current_step) = ticket.current_step() else {
            warn!(ticket_id = ticket.id, "No current step name");
            return Ok(());
        };
        if current_step.name != expected_step {
            debug!(
                ticket_id = ticket.id,
                current = %current_step.name,
                expected = %expected_step,
                "Skipping, the ticket is in another step"
            );
            return Ok(());
        }

        let workflow = ticket.workflow.name.as_str();
        if let Some(config) = self.action_config(workflow, &current_step.name)? {
            if config.timing == Timing::Enter {
                self.engine.run(ticket.id, &config)?;
            }
        }

        match ticket.previous_step() {
            Some(previous) => {
                if let Some(config) = self.action_config(workflow, &previous.name)? {
                    if config.timing == Timing::Leave {
                        self.engine.run(ticket.id, &config)?;
                    }
                }
            }
            None => warn!(ticket_id = ticket.id, "No previous step name"),
        }
        Ok(())
    }
}
