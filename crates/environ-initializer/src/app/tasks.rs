use std::time::Duration;

use anyhow::Result;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::k8s::Workload;
use crate::k8s::WorkloadKind;
use crate::k8s::WorkloadWatcher;

/// Task manager, responsible for starting and stopping the watchers
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start one watcher per configured workload kind
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        for kind in &app.config().resources {
            let task = match kind {
                WorkloadKind::Deployments => self.spawn_watcher_task::<Deployment>(app),
                WorkloadKind::DaemonSets => self.spawn_watcher_task::<DaemonSet>(app),
                WorkloadKind::StatefulSets => self.spawn_watcher_task::<StatefulSet>(app),
            };
            self.tasks.push(task);
        }
    }

    /// Wait for a shutdown signal or for any task to end, then cancel the
    /// rest and give them `shutdown_timeout` to finish.
    pub async fn wait_for_completion(&mut self, shutdown_timeout: Duration) -> Result<()> {
        if self.tasks.is_empty() {
            return Ok(());
        }

        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
                        Err(e) => tracing::error!("Failed to listen for Ctrl+C: {e}"),
                    }
                })
            }
        };

        let finished = tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                None
            }
            (result, index, _) = futures::future::select_all(self.tasks.iter_mut()) => {
                Some((index, result))
            }
        };

        let failure = match finished {
            Some((index, result)) => {
                // already joined
                self.tasks.swap_remove(index);
                match result {
                    Ok(()) => {
                        tracing::warn!("Task completed unexpectedly, cancelling remaining tasks");
                        None
                    }
                    Err(e) => {
                        tracing::error!("Task completed with error: {e}");
                        Some(e)
                    }
                }
            }
            None => None,
        };

        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(shutdown_timeout).await;

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_watcher_task<K: Workload>(&self, app: &Application) -> JoinHandle<()> {
        let watcher = WorkloadWatcher::<K>::new(
            app.client().clone(),
            app.catalog().clone(),
            app.config().clone(),
        );
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting {} watcher task", K::KIND);
            if let Err(e) = watcher.run(token).await {
                tracing::error!("{} watcher failed: {e:?}", K::KIND);
            } else {
                tracing::info!("{} watcher completed", K::KIND);
            }
        })
    }
}
