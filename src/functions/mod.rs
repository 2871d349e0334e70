//! Named functions callable from templates and section hooks
//!
//! Two registries exist per engine: placeholder functions (resolving
//! `#name#` tokens and `|postfunc` filters) and action functions (the `pre`
//! and `post` hooks of a section). Both are layered the same way: plugin
//! functions first, then built-ins for names no plugin defines.

pub mod actions;
pub mod designer;
pub mod placeholders;
pub mod risk;
pub mod ticket_data;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::plugins::{PluginFunction, PluginRegistry};
use crate::services::Services;
use crate::ticket::Ticket;

/// Section parameters handed to action functions
pub type FunctionArgs = Map<String, Value>;

/// Everything a function can see when it runs
pub struct Invocation<'a> {
    pub services: &'a Services,
    pub ticket: &'a Ticket,
    /// Input string when the function is used as a post-function filter
    pub value: Option<&'a str>,
    pub args: &'a FunctionArgs,
}

pub type BuiltinFn = fn(&Invocation<'_>) -> anyhow::Result<Value>;

#[derive(Clone)]
pub enum Function {
    Builtin(BuiltinFn),
    Plugin(Arc<PluginFunction>),
}

impl Function {
    pub fn call(&self, invocation: &Invocation<'_>) -> anyhow::Result<Value> {
        match self {
            Function::Builtin(f) => f(invocation),
            Function::Plugin(plugin) => plugin.call(invocation),
        }
    }

    pub fn is_plugin(&self) -> bool {
        matches!(self, Function::Plugin(_))
    }
}

/// Name to function map; names are matched case-insensitively
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl FunctionRegistry {
    /// Plugin functions first, built-ins only for names still free
    pub fn layered(plugins: &PluginRegistry, builtins: &[(&str, BuiltinFn)]) -> Self {
        let mut functions: HashMap<String, Function> = plugins
            .functions()
            .map(|(name, f)| (name.to_lowercase(), Function::Plugin(Arc::clone(f))))
            .collect();

        for (name, f) in builtins {
            functions
                .entry(name.to_lowercase())
                .or_insert(Function::Builtin(*f));
        }

        Self { functions }
    }

    /// Registry of placeholder functions
    pub fn placeholders(plugins: &PluginRegistry) -> Self {
        Self::layered(plugins, placeholders::BUILTINS)
    }

    /// Registry of pre/post action functions
    pub fn actions(plugins: &PluginRegistry) -> Self {
        Self::layered(plugins, actions::BUILTINS)
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(&name.trim().to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Text form of a function result as substituted into templates
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether an action result asks the caller to stop
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
