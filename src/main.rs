use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Map;

use orca::config::Config;
use orca::integration::client::REST_INTEGRATION_KEY;
use orca::integration::{ActionDispatcher, TemplateEngine, TriggerPayload};
use orca::logging;
use orca::plugins::PluginRegistry;
use orca::secrets::{SecretError, SecretStore, USERNAME_SUFFIX};
use orca::services::Services;

#[derive(Parser)]
#[command(name = "orca")]
#[command(about = "Workflow ticket REST integration")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log at debug level to stderr
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a workflow trigger read from stdin (the default)
    Trigger,

    /// Manage stored credentials
    Secrets {
        #[command(subcommand)]
        command: SecretsCommand,
    },

    /// Print a request template filled from a ticket without sending it
    Render {
        /// Ticket id
        #[arg(short, long)]
        ticket: u64,

        /// Template file name under the templates directory
        #[arg(long)]
        template: String,

        /// Restrict field lookups to this step
        #[arg(long)]
        step: Option<String>,
    },
}

#[derive(Subcommand)]
enum SecretsCommand {
    /// Show stored keys and their usernames
    View,

    /// Prompt for credentials (default: the platform login and rest_integration)
    Set {
        /// Prompt again for values that are already stored
        #[arg(short, long)]
        overwrite: bool,

        /// Credential keys to set
        items: Vec<String>,
    },

    /// Delete a key's username and password
    Delete {
        key: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    let interactive = !matches!(cli.command, None | Some(Commands::Trigger));
    let _logging_handle = logging::init_logging(&config, interactive, cli.debug)?;

    match cli.command {
        None | Some(Commands::Trigger) => cmd_trigger(&config),
        Some(Commands::Secrets { command }) => cmd_secrets(&config, command),
        Some(Commands::Render {
            ticket,
            template,
            step,
        }) => cmd_render(&config, ticket, &template, step.as_deref()),
    }
}

fn build_engine(config: &Config) -> Result<TemplateEngine> {
    let connection = Services::connect(config)?;
    let plugins = PluginRegistry::discover(&config.setup.plugins_root_dir);
    TemplateEngine::new(
        connection.services,
        config.setup.clone(),
        &plugins,
        connection.integration_user,
    )
    .context("Failed to create template engine")
}

fn cmd_trigger(config: &Config) -> Result<()> {
    tracing::info!("Reading ticket info");
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read trigger payload from stdin")?;

    let payload = match TriggerPayload::parse(&input) {
        Ok(payload) => payload,
        Err(e) => {
            // The platform calls the script without a ticket to test it
            tracing::info!("Testing call: {}", e);
            return Ok(());
        }
    };
    tracing::info!(ticket_id = payload.ticket_info.id, event = %payload.event, "Script is called for ticket");

    let engine = build_engine(config).inspect_err(|e| tracing::error!("{:#}", e))?;
    let dispatcher = ActionDispatcher::new(engine, config);
    dispatcher.dispatch(&payload).map_err(|e| {
        tracing::error!(ticket_id = payload.ticket_info.id, "Dispatch failed: {}", e);
        anyhow::Error::new(e).context(format!("ticket {}", payload.ticket_info.id))
    })
}

fn cmd_render(config: &Config, ticket_id: u64, template: &str, step: Option<&str>) -> Result<()> {
    let engine = build_engine(config)?;
    let document = engine
        .get_template(template)
        .with_context(|| format!("Failed to load template '{template}'"))?;
    let rendered = engine
        .substitute(ticket_id, step, &document, &Map::new())
        .with_context(|| format!("Failed to fill template for ticket {ticket_id}"))?;
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

fn cmd_secrets(config: &Config, command: SecretsCommand) -> Result<()> {
    let mut store = SecretStore::open(&config.secrets.dir).with_context(|| {
        format!("Failed to open secret store in {}", config.secrets.dir.display())
    })?;

    match command {
        SecretsCommand::View => {
            let keys = store.keys();
            if keys.is_empty() {
                println!("No credentials stored");
            }
            for key in keys {
                let username = store
                    .get(&format!("{key}{USERNAME_SUFFIX}"))
                    .unwrap_or_default();
                println!("Configured {key} username: {username}");
            }
            Ok(())
        }
        SecretsCommand::Set { overwrite, items } => {
            // Naming keys explicitly means setting them
            let overwrite = overwrite || !items.is_empty();
            let items = if items.is_empty() {
                vec![
                    config.workflow_platform.credentials_key.clone(),
                    REST_INTEGRATION_KEY.to_string(),
                ]
            } else {
                items
                    .iter()
                    .flat_map(|item| item.split(','))
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect()
            };

            println!("Securely storing credentials. Press Ctrl+C to abort.");
            for item in &items {
                set_credentials(&mut store, item, overwrite)?;
            }
            Ok(())
        }
        SecretsCommand::Delete { key, yes } => {
            if !yes {
                let confirm = dialoguer::Confirm::new()
                    .with_prompt(format!("Delete the credentials for key {key}?"))
                    .default(false)
                    .interact()
                    .unwrap_or(false);
                if !confirm {
                    println!("Key {key} wasn't deleted");
                    return Ok(());
                }
            }

            match store.delete_section(&key) {
                Ok(()) => println!("Credentials for the key '{key}' were deleted"),
                Err(SecretError::Empty | SecretError::NotFound(_)) => {
                    println!("Failed to delete credentials for key '{key}' in secure DB");
                }
                Err(e) => return Err(e.into()),
            }
            Ok(())
        }
    }
}

fn set_credentials(store: &mut SecretStore, item: &str, overwrite: bool) -> Result<()> {
    use orca::secrets::CredentialProvider;

    if store.username(item).is_none() || overwrite {
        let username: String = dialoguer::Input::new()
            .with_prompt(format!("Username for {item}"))
            .interact_text()?;
        store.set_username(item, &username)?;
        println!("Username for {item} set.");
    } else {
        println!("Username for {item} already set, skipping.");
    }

    if store.password(item).is_none() || overwrite {
        let password = dialoguer::Password::new()
            .with_prompt(format!("Password for {item}"))
            .with_confirmation(
                format!("Confirm the password for {item}"),
                format!("The passwords for {item} do not match."),
            )
            .interact()?;
        store.set_password(item, &password)?;
        println!("Password for {item} set.");
    } else {
        println!("Password for {item} already set, skipping.");
    }
    Ok(())
}
