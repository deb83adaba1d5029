use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use futures::StreamExt;
use kube::api::PatchParams;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::watcher::Event;
use kube::Api;
use kube::Client;
use kube::Resource;
use kube::ResourceExt;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::catalog::EnvironmentCatalog;
use crate::config::InitializerConfig;
use crate::k8s::types::KubernetesError;
use crate::k8s::Workload;
use crate::patch::DerivedPatch;
use crate::pipeline;
use crate::pipeline::Preparation;
use crate::pipeline::Stage;

const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Watches one workload kind across all namespaces and injects environment
/// variables into newly created, annotated workloads.
pub struct WorkloadWatcher<K> {
    client: Client,
    catalog: Arc<EnvironmentCatalog>,
    config: Arc<InitializerConfig>,
    kind: PhantomData<fn() -> K>,
}

impl<K: Workload> WorkloadWatcher<K> {
    pub fn new(client: Client, catalog: Arc<EnvironmentCatalog>, config: Arc<InitializerConfig>) -> Self {
        Self {
            client,
            catalog,
            config,
            kind: PhantomData,
        }
    }

    /// Watch until `cancellation_token` fires.
    ///
    /// Stream errors are logged and the watch is restarted after a delay.
    /// Cancellation only interrupts waiting for the next event, so a patch
    /// already in flight completes.
    ///
    /// # Errors
    ///
    /// Currently never fails; watch errors are handled by restarting.
    #[tracing::instrument(skip_all, fields(kind = %K::KIND))]
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<(), Report<KubernetesError>> {
        info!("Starting workload watcher");

        let mut tracker = CreationTracker::default();
        loop {
            match self.watch_workloads(&mut tracker, &cancellation_token).await {
                Ok(()) if cancellation_token.is_cancelled() => break,
                Ok(()) => {
                    warn!("Workload watch stream ended unexpectedly, restarting...");
                }
                Err(e) => {
                    error!("Workload watch failed: {e:?}");
                    select! {
                        _ = cancellation_token.cancelled() => break,
                        _ = tokio::time::sleep(RESTART_DELAY) => {}
                    }
                }
            }
        }

        info!("Workload watcher shutdown requested");
        Ok(())
    }

    /// # Errors
    ///
    /// - [`KubernetesError::WatchFailed`] if the watch stream yields an error
    async fn watch_workloads(
        &self,
        tracker: &mut CreationTracker,
        cancellation_token: &CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        let api: Api<K> = Api::all(self.client.clone());
        let mut stream = watcher(api, Config::default()).boxed();

        loop {
            let event = select! {
                biased;
                _ = cancellation_token.cancelled() => return Ok(()),
                event = stream.next() => event,
            };

            match event {
                Some(Ok(event)) => {
                    for workload in tracker.observe(event) {
                        self.handle_created(workload).await;
                    }
                }
                Some(Err(e)) => {
                    return Err(Report::new(KubernetesError::WatchFailed {
                        message: format!("Watch stream error: {e}"),
                    }));
                }
                None => return Ok(()),
            }
        }
    }

    /// Run the pipeline for a newly created workload. Failures are logged and
    /// the event is dropped.
    async fn handle_created(&self, workload: K) {
        let namespace = workload.namespace().unwrap_or_default();
        let name = workload.name_any();

        let patch = match pipeline::prepare(&workload, &self.catalog, &self.config) {
            Ok(Preparation::Ready(patch)) => patch,
            Ok(Preparation::NotAnnotated) => return,
            Ok(Preparation::AlreadyInjected) => {
                debug!(namespace = %namespace, name = %name, "Workload already injected, skipping");
                return;
            }
            Ok(Preparation::NoChanges) => {
                info!(namespace = %namespace, name = %name, "Trigger resolved to no variables, nothing to patch");
                return;
            }
            Err(e) => {
                error!(
                    namespace = %namespace,
                    name = %name,
                    stage = %e.current_context().stage,
                    "Failed to prepare workload patch: {e:?}"
                );
                return;
            }
        };

        match self.apply(&namespace, &name, &patch).await {
            Ok(()) => {
                info!(
                    namespace = %namespace,
                    name = %name,
                    strategy = %patch.strategy(),
                    "Injected environment variables"
                );
            }
            Err(e) => {
                error!(
                    namespace = %namespace,
                    name = %name,
                    stage = %Stage::Apply,
                    "Failed to apply workload patch: {e:?}"
                );
            }
        }
    }

    /// # Errors
    ///
    /// - [`KubernetesError::PatchFailed`] if the API server rejects the patch
    async fn apply(&self, namespace: &str, name: &str, patch: &DerivedPatch) -> Result<(), Report<KubernetesError>> {
        let failed = || KubernetesError::PatchFailed {
            kind: K::KIND.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        };

        let body = patch.to_bytes().change_context_lazy(failed)?;
        debug!(namespace, name, patch = %String::from_utf8_lossy(&body), "Submitting patch");

        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams {
            field_manager: Some(self.config.field_manager.clone()),
            ..Default::default()
        };
        api.patch(name, &params, &patch.to_kube_patch())
            .await
            .change_context_lazy(failed)
            .attach_printable_lazy(|| format!("patch strategy: {}", patch.strategy()))?;
        Ok(())
    }
}

/// Tells creations apart from updates by remembering which objects a watcher
/// has already seen.
#[derive(Debug, Default)]
pub(crate) struct CreationTracker {
    seen: HashSet<String>,
}

impl CreationTracker {
    /// Consume a watch event and return the objects seen for the first time.
    ///
    /// A restart (re-list) forgets objects that are gone and reports the ones
    /// created while the watch was down.
    pub(crate) fn observe<K: Resource>(&mut self, event: Event<K>) -> Vec<K> {
        match event {
            Event::Applied(object) => self.first_seen(object).into_iter().collect(),
            Event::Deleted(object) => {
                self.seen.remove(&identity(&object));
                Vec::new()
            }
            Event::Restarted(objects) => {
                let present: HashSet<String> = objects.iter().map(identity).collect();
                self.seen.retain(|key| present.contains(key));
                objects
                    .into_iter()
                    .filter_map(|object| self.first_seen(object))
                    .collect()
            }
        }
    }

    fn first_seen<K: Resource>(&mut self, object: K) -> Option<K> {
        self.seen.insert(identity(&object)).then_some(object)
    }
}

fn identity<K: Resource>(object: &K) -> String {
    object.uid().unwrap_or_else(|| {
        format!(
            "{}/{}",
            object.namespace().unwrap_or_default(),
            object.name_any()
        )
    })
}
