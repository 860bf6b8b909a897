//! Stage executors: the operations the deployment orchestrator invokes.
//!
//! Each executor builds its own client, runs strictly sequential steps, and
//! converts every failure into a logged [`StageStatus::Failure`]; nothing
//! escapes the stage boundary.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio::time::Instant;

use crate::auth::Credential;
use crate::client::AzureClient;
use crate::deploy;
use crate::manifest::{DeployTarget, FunctionManifest};
use crate::template;

/// Terminal status of one stage execution. There is no partial success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StageStatus {
    Success,
    Failure,
}

/// Input for a sync or rollback execution.
pub struct SyncRequest<'a> {
    /// Deploy targets bound to the stage; exactly one is supported.
    pub targets: &'a [DeployTarget],
    pub manifest: &'a FunctionManifest,
    /// Directory holding the checked-out desired state (template files).
    pub app_dir: &'a Path,
    /// Slot receiving the code push; empty string means production.
    pub slot: String,
    pub deadline: Instant,
}

/// Input for a swap execution.
pub struct SwapRequest<'a> {
    /// Deploy targets bound to the stage; exactly one is supported.
    pub targets: &'a [DeployTarget],
    pub manifest: &'a FunctionManifest,
    /// First slot of the pair; empty string means production.
    pub slot1: String,
    /// Second slot of the pair; empty string means production.
    pub slot2: String,
    pub deadline: Instant,
}

/// Deploy the desired state: infrastructure template first (when configured),
/// then the code package.
pub async fn execute_sync(credential: &Credential, request: SyncRequest<'_>) -> StageStatus {
    tracing::info!(function = %request.manifest.function_name, "Starting function sync");
    match run_code_sync(credential, &request).await {
        Ok(()) => StageStatus::Success,
        Err(err) => {
            tracing::error!(
                function = %request.manifest.function_name,
                error = %format!("{err:#}"),
                "Function sync failed"
            );
            StageStatus::Failure
        }
    }
}

/// Re-deploy the previously-running desired state. The caller points the
/// request at the prior source directory and manifest.
pub async fn execute_rollback(credential: &Credential, request: SyncRequest<'_>) -> StageStatus {
    tracing::info!(function = %request.manifest.function_name, "Starting function rollback");
    match run_code_sync(credential, &request).await {
        Ok(()) => StageStatus::Success,
        Err(err) => {
            tracing::error!(
                function = %request.manifest.function_name,
                error = %format!("{err:#}"),
                "Function rollback failed"
            );
            StageStatus::Failure
        }
    }
}

/// Swap two slots of the function app.
pub async fn execute_swap(credential: &Credential, request: SwapRequest<'_>) -> StageStatus {
    tracing::info!(function = %request.manifest.function_name, "Starting slot swap");
    match run_swap(credential, &request).await {
        Ok(()) => StageStatus::Success,
        Err(err) => {
            tracing::error!(
                function = %request.manifest.function_name,
                error = %format!("{err:#}"),
                "Slot swap failed"
            );
            StageStatus::Failure
        }
    }
}

fn single_target<'a>(targets: &'a [DeployTarget]) -> Result<&'a DeployTarget> {
    match targets {
        [target] => Ok(target),
        other => bail!("exactly one deploy target is supported, got {}", other.len()),
    }
}

async fn run_code_sync(credential: &Credential, request: &SyncRequest<'_>) -> Result<()> {
    let target = single_target(request.targets)?;
    let client = AzureClient::connect(target, credential)
        .await
        .with_context(|| format!("failed to connect to target {}", target.name))?;

    let manifest = request.manifest;
    if let Some(tpl) = &manifest.template {
        tracing::info!(
            deployment = %tpl.deployment_name,
            template = %tpl.template_file,
            parameters = %tpl.parameter_file,
            "Deploying infrastructure template"
        );
        template::deploy(
            &client,
            &manifest.resource_group,
            request.app_dir,
            tpl,
            request.deadline,
        )
        .await
        .context("template deployment failed")?;
    }

    let slot_names: Vec<String> = if request.slot.is_empty() {
        Vec::new()
    } else {
        vec![request.slot.clone()]
    };
    let needs_create = client
        .validate_function(&manifest.resource_group, &manifest.function_name, &slot_names)
        .await
        .context("existence validation failed")?;
    if needs_create {
        bail!("function app or slot is still missing after template deployment");
    }

    let snapshot = client
        .get_function(&manifest.resource_group, &manifest.function_name, &request.slot)
        .await?
        .with_context(|| {
            format!(
                "function {} disappeared between validation and deployment",
                manifest.function_name
            )
        })?;

    tracing::info!(
        kind = %snapshot.kind,
        sku = %snapshot.sku,
        run_from_package = deploy::uses_run_from_package(&snapshot),
        "Pushing package"
    );
    deploy::push_package(
        &client,
        &manifest.resource_group,
        &manifest.function_name,
        &request.slot,
        &snapshot,
        &manifest.package_uri,
        request.deadline,
    )
    .await
    .context("package push failed")
}

async fn run_swap(credential: &Credential, request: &SwapRequest<'_>) -> Result<()> {
    let target = single_target(request.targets)?;

    let mut slot_names = Vec::new();
    if !request.slot1.is_empty() {
        slot_names.push(request.slot1.clone());
    }
    if !request.slot2.is_empty() {
        slot_names.push(request.slot2.clone());
    }
    if slot_names.is_empty() {
        bail!("a swap requires at least one named slot");
    }

    let client = AzureClient::connect(target, credential)
        .await
        .with_context(|| format!("failed to connect to target {}", target.name))?;

    let manifest = request.manifest;
    let needs_create = client
        .validate_function(&manifest.resource_group, &manifest.function_name, &slot_names)
        .await
        .context("existence validation failed")?;
    if needs_create {
        bail!("swap requires existing resources; the function app or a slot is missing");
    }

    client
        .swap_slots(
            &manifest.resource_group,
            &manifest.function_name,
            &request.slot1,
            &request.slot2,
            request.deadline,
        )
        .await
        .context("slot swap failed")
}
