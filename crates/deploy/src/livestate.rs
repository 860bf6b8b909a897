//! Live resource health and drift verdicts for a deployed function app.

use std::fmt;
use std::path::Path;

use anyhow::Result;
use tokio::time::Instant;

use crate::client::{AzureClient, FunctionSnapshot};
use crate::diff;
use crate::manifest::FunctionManifest;
use crate::template;

/// Health verdict for one live resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Drift verdict for the whole app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SyncStatus {
    Synced,
    OutOfSync,
    Unknown,
}

/// One live resource: the function app itself or a deployment slot.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub name: String,
    pub id: String,
    /// "function" for the app, "slot" for deployment slots.
    pub resource_type: String,
    pub health: HealthState,
    /// Platform state string when the resource is unhealthy.
    pub health_description: String,
}

/// The resource tree read back from the platform.
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    pub resources: Vec<ResourceState>,
}

/// The drift verdict plus its human-readable explanation.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub status: SyncStatus,
    pub short_reason: String,
    /// Full rendered drift report when out of sync.
    pub reason: String,
}

/// Snapshot both surfaces. Either side failing is logged and reported as its
/// empty/unknown value so the other side still comes through.
pub async fn get_function_state(
    client: &AzureClient,
    manifest: &FunctionManifest,
    app_dir: &Path,
    commit: &str,
    deadline: Instant,
) -> (LiveState, SyncState) {
    let live = match get_live_state(client, manifest).await {
        Ok(live) => live,
        Err(err) => {
            tracing::error!(
                function = %manifest.function_name,
                error = %format!("{err:#}"),
                "Failed to read live state"
            );
            LiveState::default()
        }
    };
    let sync = match get_sync_state(client, manifest, app_dir, commit, deadline).await {
        Ok(sync) => sync,
        Err(err) => {
            tracing::error!(
                function = %manifest.function_name,
                error = %format!("{err:#}"),
                "Failed to evaluate sync state"
            );
            SyncState {
                status: SyncStatus::Unknown,
                short_reason: "Sync state evaluation failed".to_string(),
                reason: String::new(),
            }
        }
    };
    (live, sync)
}

/// Read the function app and its slots into a fresh resource tree.
///
/// A missing app is not an error: it reports as a single unhealthy entry.
pub async fn get_live_state(
    client: &AzureClient,
    manifest: &FunctionManifest,
) -> Result<LiveState> {
    let Some(function) = client
        .get_function(&manifest.resource_group, &manifest.function_name, "")
        .await?
    else {
        return Ok(LiveState {
            resources: vec![ResourceState {
                name: manifest.function_name.clone(),
                id: String::new(),
                resource_type: "function".to_string(),
                health: HealthState::Unhealthy,
                health_description: "NotFound".to_string(),
            }],
        });
    };

    let mut resources = vec![resource_state(&function, "function")];
    for slot in client
        .list_slots(&manifest.resource_group, &manifest.function_name)
        .await?
    {
        resources.push(resource_state(&slot, "slot"));
    }
    Ok(LiveState { resources })
}

fn resource_state(snapshot: &FunctionSnapshot, resource_type: &str) -> ResourceState {
    let (health, health_description) = match snapshot.state.as_deref() {
        Some("running") => (HealthState::Healthy, String::new()),
        Some(state) => (HealthState::Unhealthy, state.to_string()),
        None => (HealthState::Unknown, String::new()),
    };
    ResourceState {
        name: snapshot.name.clone(),
        id: snapshot.id.clone(),
        resource_type: resource_type.to_string(),
        health,
        health_description,
    }
}

/// Determine whether the live resources match the declared state.
///
/// Without a configured template there is nothing to compare against and the
/// verdict is Unknown. Otherwise a what-if evaluation decides: an empty
/// change set is Synced, anything else is OutOfSync with the rendered diff as
/// the reason. Evaluation errors propagate.
pub async fn get_sync_state(
    client: &AzureClient,
    manifest: &FunctionManifest,
    app_dir: &Path,
    commit: &str,
    deadline: Instant,
) -> Result<SyncState> {
    let Some(tpl) = &manifest.template else {
        return Ok(SyncState {
            status: SyncStatus::Unknown,
            short_reason: "Sync state is not supported without template deployment".to_string(),
            reason: String::new(),
        });
    };

    let evaluation =
        template::what_if(client, &manifest.resource_group, app_dir, tpl, deadline).await?;
    if evaluation.changes.len() + evaluation.potential_changes.len() == 0 {
        return Ok(SyncState {
            status: SyncStatus::Synced,
            short_reason: String::new(),
            reason: String::new(),
        });
    }

    let summary = diff::render_diff(&evaluation.changes, commit);
    Ok(SyncState {
        status: SyncStatus::OutOfSync,
        short_reason: summary.short_reason(),
        reason: summary.report,
    })
}

// -- Display implementations for printing state reports --

fn health_icon(health: HealthState) -> &'static str {
    match health {
        HealthState::Healthy => "[ok]",
        HealthState::Unhealthy => "[DOWN]",
        HealthState::Unknown => "[?]",
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  {} {} ({})",
            health_icon(self.health),
            self.name,
            self.resource_type
        )?;
        if !self.health_description.is_empty() {
            write!(f, " state={}", self.health_description)?;
        }
        Ok(())
    }
}

impl fmt::Display for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Resources ===")?;
        for resource in &self.resources {
            writeln!(f, "{}", resource)?;
        }
        Ok(())
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sync status: {}", self.status)?;
        if !self.short_reason.is_empty() {
            write!(f, " ({})", self.short_reason)?;
        }
        if !self.reason.is_empty() {
            write!(f, "\n\n{}", self.reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: Option<&str>) -> FunctionSnapshot {
        FunctionSnapshot {
            id: "/subscriptions/s/resourceGroups/g/providers/Microsoft.Web/sites/f".to_string(),
            name: "f".to_string(),
            kind: "functionapp".to_string(),
            sku: "Dynamic".to_string(),
            state: state.map(str::to_string),
        }
    }

    #[test]
    fn test_running_state_is_healthy() {
        let state = resource_state(&snapshot(Some("running")), "function");
        assert_eq!(state.health, HealthState::Healthy);
        assert!(state.health_description.is_empty());
    }

    #[test]
    fn test_other_states_are_unhealthy_with_description() {
        let state = resource_state(&snapshot(Some("Stopped")), "function");
        assert_eq!(state.health, HealthState::Unhealthy);
        assert_eq!(state.health_description, "Stopped");
    }

    #[test]
    fn test_missing_state_is_unknown() {
        let state = resource_state(&snapshot(None), "slot");
        assert_eq!(state.health, HealthState::Unknown);
    }

    #[test]
    fn test_display_marks_unhealthy_resources() {
        let state = resource_state(&snapshot(Some("Stopped")), "function");
        let rendered = state.to_string();
        assert!(rendered.contains("[DOWN]"));
        assert!(rendered.contains("state=Stopped"));
    }
}
