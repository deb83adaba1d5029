//! Identify, plan, mark and derive for a single workload.
//!
//! Everything here is pure; the watcher only adds the remote apply.

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use thiserror::Error;

use crate::catalog::EnvironmentCatalog;
use crate::config::InitializerConfig;
use crate::k8s::annotations;
use crate::k8s::Workload;
use crate::patch;
use crate::patch::DerivedPatch;
use crate::planner;
use crate::planner::TriggerPayload;

/// Pipeline stage, used to tag failures in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    #[display("plan")]
    Plan,
    #[display("derive")]
    Derive,
    #[display("apply")]
    Apply,
}

#[derive(Debug, Error)]
#[error("Pipeline failed at {stage} stage")]
pub struct PipelineError {
    pub stage: Stage,
}

/// Outcome of running the local stages for one workload.
#[derive(Debug, Clone, PartialEq)]
pub enum Preparation {
    /// The trigger annotation is not set.
    NotAnnotated,
    /// The workload already carries the injected marker.
    AlreadyInjected,
    /// The annotation resolved to no variables.
    NoChanges,
    /// A patch ready to submit.
    Ready(DerivedPatch),
}

/// Run identify, plan, mark and derive for `workload`.
///
/// # Errors
///
/// - [`PipelineError`] tagged [`Stage::Plan`] when the payload or a referenced
///   group cannot be decoded
/// - [`PipelineError`] tagged [`Stage::Derive`] when a state cannot be encoded
pub fn prepare<K: Workload>(
    workload: &K,
    catalog: &EnvironmentCatalog,
    config: &InitializerConfig,
) -> Result<Preparation, Report<PipelineError>> {
    let trigger_key = config.trigger_annotation.as_str();

    let identification = annotations::identify(trigger_key, workload);
    if !identification.is_present() {
        return Ok(Preparation::NotAnnotated);
    }
    if annotations::is_injected(trigger_key, workload) {
        return Ok(Preparation::AlreadyInjected);
    }

    let payload = TriggerPayload::parse(identification.raw_value())
        .change_context(PipelineError { stage: Stage::Plan })?;
    let mut planned = planner::plan_payload(&payload, workload, catalog)
        .change_context(PipelineError { stage: Stage::Plan })?;
    if planned.containers() == workload.containers() {
        return Ok(Preparation::NoChanges);
    }

    annotations::mark_injected(trigger_key, &mut planned, &payload.environments.join(","));

    let patch = patch::derive(workload, &planned, config.patch_strategy)
        .change_context(PipelineError { stage: Stage::Derive })?;
    Ok(Preparation::Ready(patch))
}
