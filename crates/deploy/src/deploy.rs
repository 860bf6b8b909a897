//! Code-push engine: legacy zip deploy and run-from-package.
//!
//! The strategy is picked from the app's plan: consumption Linux plans mount
//! the package directly from storage, everything else goes through the SCM
//! (Kudu) zip-deploy engine and its asynchronous job protocol.

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::header::{CACHE_CONTROL, COOKIE, LOCATION, SET_COOKIE};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use url::Url;

use crate::client::{AzureClient, FunctionSnapshot};
use crate::error;
use crate::poll::{self, Poll};
use crate::sas;

/// Deployer tag reported to the SCM deployment engine.
const DEPLOYER_NAME: &str = "crumpet";

/// App-setting switch that lets the platform mount the package.
const MOUNT_ENABLED_KEY: &str = "WEBSITE_MOUNT_ENABLED";
/// App setting holding the signed package URL for run-from-package.
const RUN_FROM_PACKAGE_KEY: &str = "WEBSITE_RUN_FROM_PACKAGE";

/// Total trigger-sync attempts after a settings update; freshly created apps
/// answer Bad Request for the first ~30 seconds.
const SYNC_ATTEMPTS: u32 = 3;

/// Terminal status codes of the SCM deployment job.
const DEPLOY_STATUS_FAILED: i64 = 3;
const DEPLOY_STATUS_SUCCESS: i64 = 4;

/// Whether the app's plan wants the run-from-package strategy.
///
/// True exactly for consumption Linux plans: a Linux `kind` marker combined
/// with the Dynamic SKU tier.
pub fn uses_run_from_package(snapshot: &FunctionSnapshot) -> bool {
    snapshot.kind.contains("linux") && snapshot.sku == "Dynamic"
}

/// Push the package with the strategy matching the app's plan.
pub async fn push_package(
    client: &AzureClient,
    resource_group: &str,
    app: &str,
    slot: &str,
    snapshot: &FunctionSnapshot,
    package_uri: &str,
    deadline: Instant,
) -> Result<()> {
    if uses_run_from_package(snapshot) {
        run_from_package(client, resource_group, app, slot, package_uri).await
    } else {
        zip_deploy(client, resource_group, app, slot, package_uri, deadline).await
    }
}

#[derive(Debug, Deserialize)]
struct DeployProgress {
    status: i64,
}

/// Push the package through the SCM zip-deploy engine and poll the
/// asynchronous deployment job to completion.
pub async fn zip_deploy(
    client: &AzureClient,
    resource_group: &str,
    app: &str,
    slot: &str,
    package_uri: &str,
    deadline: Instant,
) -> Result<()> {
    let credentials = client
        .publish_credentials(resource_group, app, slot, deadline)
        .await
        .context("failed to fetch publishing credentials")?;
    let signed_uri = sas::sign_blob_url(client, resource_group, package_uri).await?;
    // Checked once; every poll below reuses this answer.
    let basic_auth = client
        .scm_basic_auth_allowed(resource_group, app, slot)
        .await
        .context("failed to read the SCM auth policy")?;

    let mut deploy_url = Url::parse(&format!(
        "{}/api/zipdeploy",
        credentials.scm_uri.trim_end_matches('/')
    ))
    .context("publishing credentials carry an invalid SCM URI")?;
    deploy_url
        .query_pairs_mut()
        .append_pair("isAsync", "true")
        .append_pair("Deployer", DEPLOYER_NAME);

    let mut request = client
        .http()
        .post(deploy_url.as_str())
        .json(&json!({ "packageUri": signed_uri }))
        .header(CACHE_CONTROL, "no-cache");
    request = if basic_auth {
        request.basic_auth(&credentials.username, Some(&credentials.password))
    } else {
        request.bearer_auth(client.bearer())
    };

    let response = request.send().await.context("zip deploy request failed to send")?;
    let status = response.status();
    if status != StatusCode::ACCEPTED {
        let body = response.text().await.unwrap_or_default();
        bail!("zip deploy was not accepted: status {status}, body: {body}");
    }

    // Session affinity cookies must ride along on every poll, or the job
    // status may come from a different instance.
    let cookies: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::to_string)
        .collect();
    let cookie_header = cookies.join("; ");

    let poll_url = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .context("zip deploy response carries no poll URL")?;

    poll::wait_for("zip deploy", client.poll_interval(), deadline, || {
        let poll_url = poll_url.clone();
        let cookie_header = cookie_header.clone();
        let credentials = &credentials;
        async move {
            let mut request = client.http().get(&poll_url);
            if !cookie_header.is_empty() {
                request = request.header(COOKIE, cookie_header);
            }
            request = if basic_auth {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            } else {
                request.bearer_auth(client.bearer())
            };

            let response = request
                .send()
                .await
                .context("zip deploy status poll failed to send")?;
            let status = response.status();
            let body = response
                .text()
                .await
                .context("zip deploy status body was unreadable")?;
            if status != StatusCode::OK && status != StatusCode::ACCEPTED {
                bail!("zip deploy status poll answered {status}: {body}");
            }

            let progress: DeployProgress = serde_json::from_str(&body)
                .context("zip deploy status body is not the expected JSON")?;
            match progress.status {
                DEPLOY_STATUS_FAILED => bail!("zip deploy job failed: {body}"),
                DEPLOY_STATUS_SUCCESS => Ok(Poll::Ready(())),
                _ => Ok(Poll::Pending),
            }
        }
    })
    .await?;

    client
        .sync_function_triggers(resource_group, app, slot)
        .await
        .context("trigger sync after zip deploy failed")
}

/// Point the slot at the package in storage instead of pushing bytes.
///
/// The settings write replaces the whole bag, so the current bag is read
/// first and carried over with the two package keys set on top.
pub async fn run_from_package(
    client: &AzureClient,
    resource_group: &str,
    app: &str,
    slot: &str,
    package_uri: &str,
) -> Result<()> {
    let mut settings = client
        .list_app_settings(resource_group, app, slot)
        .await
        .context("failed to read application settings")?;
    let signed_uri = sas::sign_blob_url(client, resource_group, package_uri).await?;

    settings.insert(MOUNT_ENABLED_KEY.to_string(), "1".to_string());
    settings.insert(RUN_FROM_PACKAGE_KEY.to_string(), signed_uri);
    client
        .update_app_settings(resource_group, app, slot, &settings)
        .await
        .context("failed to write application settings")?;

    sync_triggers_with_warmup_retry(client, resource_group, app, slot).await
}

/// Trigger sync, retrying Bad Request answers while a freshly created app
/// warms up. The wait grows linearly with the attempt; any other error class
/// aborts immediately, and exhausted retries return the last error.
async fn sync_triggers_with_warmup_retry(
    client: &AzureClient,
    resource_group: &str,
    app: &str,
    slot: &str,
) -> Result<()> {
    let mut last_error = None;
    for attempt in 1..=SYNC_ATTEMPTS {
        match client.sync_function_triggers(resource_group, app, slot).await {
            Ok(()) => return Ok(()),
            Err(err) if error::has_status(&err, 400) => {
                tracing::warn!(
                    attempt,
                    function = %app,
                    "Trigger sync answered Bad Request, app may still be warming up"
                );
                if attempt < SYNC_ATTEMPTS {
                    tokio::time::sleep(client.sync_backoff_unit() * attempt).await;
                }
                last_error = Some(err);
            }
            Err(err) => return Err(err).context("trigger sync failed"),
        }
    }
    Err(last_error.expect("retry loop ran at least once")).context("trigger sync kept failing")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(kind: &str, sku: &str) -> FunctionSnapshot {
        FunctionSnapshot {
            id: "/subscriptions/s/resourceGroups/g/providers/Microsoft.Web/sites/f".to_string(),
            name: "f".to_string(),
            kind: kind.to_string(),
            sku: sku.to_string(),
            state: Some("running".to_string()),
        }
    }

    #[test]
    fn test_consumption_linux_uses_run_from_package() {
        assert!(uses_run_from_package(&snapshot("functionapp,linux", "Dynamic")));
    }

    #[test]
    fn test_every_other_plan_uses_zip_deploy() {
        // Windows consumption, Linux premium, Windows premium, empty kind.
        assert!(!uses_run_from_package(&snapshot("functionapp", "Dynamic")));
        assert!(!uses_run_from_package(&snapshot("functionapp,linux", "ElasticPremium")));
        assert!(!uses_run_from_package(&snapshot("functionapp", "Standard")));
        assert!(!uses_run_from_package(&snapshot("", "")));
    }

    #[test]
    fn test_kind_marker_is_case_sensitive() {
        assert!(!uses_run_from_package(&snapshot("functionapp,Linux", "Dynamic")));
    }
}
