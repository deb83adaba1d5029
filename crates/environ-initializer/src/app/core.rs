use std::sync::Arc;

use anyhow::Result;
use kube::Client;

use crate::app::tasks::Tasks;
use crate::catalog::EnvironmentCatalog;
use crate::config::InitializerConfig;

/// Application core structure with explicit dependencies
pub struct Application {
    client: Client,
    catalog: Arc<EnvironmentCatalog>,
    config: Arc<InitializerConfig>,
}

impl Application {
    pub fn new(client: Client, catalog: Arc<EnvironmentCatalog>, config: Arc<InitializerConfig>) -> Self {
        Self {
            client,
            catalog,
            config,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn catalog(&self) -> &Arc<EnvironmentCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &Arc<InitializerConfig> {
        &self.config
    }

    /// Run application, start all watchers and wait until shutdown
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();

        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion(self.config.shutdown_timeout).await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}
