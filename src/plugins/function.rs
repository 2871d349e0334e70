//! A single plugin-defined function

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{bail, Context, Result};
use handlebars::Handlebars;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::functions::Invocation;

/// Function entry as written in a plugin file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginFunctionSpec {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum PluginKind {
    /// Handlebars template rendered against the invocation context
    Template(String),
    /// External program fed the invocation context as JSON on stdin
    Command { program: String, args: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct PluginFunction {
    pub name: String,
    pub source: PathBuf,
    pub kind: PluginKind,
}

impl PluginFunction {
    pub fn from_spec(name: &str, spec: PluginFunctionSpec, source: &Path) -> Result<Self> {
        let kind = match (spec.template, spec.command) {
            (Some(template), None) => {
                handlebars::Template::compile(&template)
                    .with_context(|| format!("Invalid template for function '{name}'"))?;
                PluginKind::Template(template)
            }
            (None, Some(program)) => PluginKind::Command {
                program,
                args: spec.args,
            },
            (Some(_), Some(_)) => {
                bail!("Function '{name}' defines both a template and a command")
            }
            (None, None) => bail!("Function '{name}' defines neither a template nor a command"),
        };

        Ok(Self {
            name: name.to_string(),
            source: source.to_path_buf(),
            kind,
        })
    }

    pub fn call(&self, inv: &Invocation<'_>) -> Result<Value> {
        let context = json!({
            "ticket": inv.ticket,
            "value": inv.value,
            "args": inv.args,
        });

        let output = match &self.kind {
            PluginKind::Template(template) => {
                let mut handlebars = Handlebars::new();
                handlebars.set_strict_mode(false);
                handlebars.register_escape_fn(handlebars::no_escape);
                handlebars
                    .render_template(template, &context)
                    .with_context(|| format!("Failed to render plugin function '{}'", self.name))?
            }
            PluginKind::Command { program, args } => self.run_command(program, args, &context)?,
        };

        Ok(parse_output(&output))
    }

    fn run_command(&self, program: &str, args: &[String], context: &Value) -> Result<String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start '{}' for function '{}'", program, self.name))?;

        // Commands may exit without reading their input; a closed pipe is not a failure.
        let input = context.to_string();
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> io::Result<()> {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(input.as_bytes()) {
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        });

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for function '{}'", self.name))?;

        match writer.join() {
            Ok(written) => written
                .with_context(|| format!("Failed to write input of function '{}'", self.name))?,
            Err(_) => bail!("Input writer of function '{}' panicked", self.name),
        }

        if !output.status.success() {
            bail!(
                "Function '{}' exited with {}: {}",
                self.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Function output: booleans and empty output keep their meaning
fn parse_output(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Value::Null
    } else if trimmed.eq_ignore_ascii_case("true") {
        Value::Bool(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Value::Bool(false)
    } else {
        Value::String(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::tests::services_with;
    use crate::functions::FunctionArgs;
    use crate::ticket::tests::{step, task, text_field, ticket};
    use crate::ticket::MockTicketRepository;

    fn spec(template: Option<&str>, command: Option<&str>) -> PluginFunctionSpec {
        PluginFunctionSpec {
            description: None,
            template: template.map(str::to_string),
            command: command.map(str::to_string),
            args: vec![],
        }
    }

    #[test]
    fn test_template_function_sees_ticket_value_and_args() {
        let f = PluginFunction::from_spec(
            "label",
            spec(
                Some("{{ticket.id}}-{{value}}-{{args.endpoint}}"),
                None,
            ),
            Path::new("a_custom_functions.toml"),
        )
        .unwrap();

        let services = services_with(MockTicketRepository::new());
        let t = ticket(vec![]);
        let mut args = FunctionArgs::new();
        args.insert("endpoint".to_string(), json!("/api/x"));
        let value = f
            .call(&Invocation {
                services: &services,
                ticket: &t,
                value: Some("a&b"),
                args: &args,
            })
            .unwrap();
        assert_eq!(value, json!("42-a&b-/api/x"));
    }

    #[test]
    fn test_spec_must_define_one_body() {
        let path = Path::new("x");
        assert!(PluginFunction::from_spec("f", spec(None, None), path).is_err());
        assert!(PluginFunction::from_spec("f", spec(Some("a"), Some("b")), path).is_err());
        assert!(PluginFunction::from_spec("f", spec(Some("{{#if}}"), None), path).is_err());
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(parse_output(" TRUE\n"), Value::Bool(true));
        assert_eq!(parse_output("false"), Value::Bool(false));
        assert_eq!(parse_output("\n"), Value::Null);
        assert_eq!(parse_output("hello \n"), json!("hello"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_function_reads_context_from_stdin() {
        let f = PluginFunction {
            name: "echo_ctx".to_string(),
            source: PathBuf::from("x"),
            kind: PluginKind::Command {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "cat >/dev/null; echo PLUGIN".to_string()],
            },
        };
        let services = services_with(MockTicketRepository::new());
        let t = ticket(vec![]);
        let args = FunctionArgs::new();
        let value = f
            .call(&Invocation {
                services: &services,
                ticket: &t,
                value: None,
                args: &args,
            })
            .unwrap();
        assert_eq!(value, json!("PLUGIN"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_function_ignores_unread_large_input() {
        let f = PluginFunction {
            name: "no_stdin".to_string(),
            source: PathBuf::from("x"),
            kind: PluginKind::Command {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo PLUGIN".to_string()],
            },
        };
        let services = services_with(MockTicketRepository::new());
        let fields = (0..3000)
            .map(|i| text_field(i, &format!("Field {}", i), &"x".repeat(64)))
            .collect();
        let t = ticket(vec![step(1, "Review", vec![task(1, "a.chen", "WAITING", fields)])]);
        let args = FunctionArgs::new();
        for _ in 0..5 {
            let value = f
                .call(&Invocation {
                    services: &services,
                    ticket: &t,
                    value: None,
                    args: &args,
                })
                .unwrap();
            assert_eq!(value, json!("PLUGIN"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_command_failure_is_error() {
        let f = PluginFunction {
            name: "fails".to_string(),
            source: PathBuf::from("x"),
            kind: PluginKind::Command {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "cat >/dev/null; exit 3".to_string()],
            },
        };
        let services = services_with(MockTicketRepository::new());
        let t = ticket(vec![]);
        let args = FunctionArgs::new();
        assert!(f
            .call(&Invocation {
                services: &services,
                ticket: &t,
                value: None,
                args: &args,
            })
            .is_err());
    }
}
