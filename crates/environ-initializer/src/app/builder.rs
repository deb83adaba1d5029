use std::sync::Arc;

use anyhow::bail;
use anyhow::Result;

use crate::app::Application;
use crate::catalog::EnvironmentCatalog;
use crate::config::InitializerConfig;
use crate::k8s::init_kube_client;

/// Application builder
pub struct ApplicationBuilder {
    config: InitializerConfig,
}

impl ApplicationBuilder {
    pub fn new(config: InitializerConfig) -> Self {
        Self { config }
    }

    /// Connect to the cluster and load the environment catalog.
    ///
    /// Fails when there is nothing to watch, no client can be built or the
    /// catalog ConfigMap cannot be read.
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        if self.config.resources.is_empty() {
            bail!("No workload kinds configured to watch");
        }

        let client = init_kube_client(self.config.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;

        let catalog = EnvironmentCatalog::load(
            client.clone(),
            &self.config.configmap_namespace,
            &self.config.configmap_name,
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load environment catalog: {e:?}"))?;

        Ok(Application::new(client, Arc::new(catalog), Arc::new(self.config)))
    }
}
