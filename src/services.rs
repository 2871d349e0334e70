//! Collaborators shared by the engine and the functions it calls

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::integration::client::{HttpTransport, ReqwestTransport};
use crate::integration::template::{DirTemplateStore, TemplateStore};
use crate::secrets::{CredentialProvider, SecretStore};
use crate::ticket::{RestTicketRepository, TicketRepository};

#[derive(Clone)]
pub struct Services {
    pub tickets: Arc<dyn TicketRepository>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub templates: Arc<dyn TemplateStore>,
    pub http: Arc<dyn HttpTransport>,
}

/// Services wired to the real workflow platform, plus the platform login
pub struct Connection {
    pub services: Services,
    /// User that waiting tasks are reassigned to while an integration runs
    pub integration_user: String,
}

impl Services {
    /// Open the secret store and connect to the workflow platform
    pub fn connect(config: &Config) -> Result<Connection> {
        let store = SecretStore::open(&config.secrets.dir).with_context(|| {
            format!("Failed to open secret store in {}", config.secrets.dir.display())
        })?;

        let platform = &config.workflow_platform;
        if platform.host.trim().is_empty() {
            anyhow::bail!("workflow_platform.host is not configured");
        }
        let (username, password) = store.pair(&platform.credentials_key).with_context(|| {
            format!(
                "No credentials stored under '{}' for the workflow platform",
                platform.credentials_key
            )
        })?;

        let tickets =
            RestTicketRepository::new(&platform.host, &username, password, platform.verify_ssl)
                .context("Failed to create workflow platform client")?;

        let integration_user = config
            .setup
            .integration_user
            .clone()
            .unwrap_or(username);

        Ok(Connection {
            services: Services {
                tickets: Arc::new(tickets),
                credentials: Arc::new(store),
                templates: Arc::new(DirTemplateStore::new(&config.setup.templates_root_dir)),
                http: Arc::new(ReqwestTransport::new()),
            },
            integration_user,
        })
    }
}
