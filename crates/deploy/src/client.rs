//! Typed client for the Azure management plane.
//!
//! One [`AzureClient`] is constructed per stage execution or live-state query
//! and dropped at its end; nothing is cached across invocations. Snapshots
//! are produced fresh on every read.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::auth::{Credential, MANAGEMENT_SCOPE};
use crate::error::{self, ApiError};
use crate::manifest::DeployTarget;
use crate::poll::{self, POLL_INTERVAL, Poll};

/// API version for Microsoft.Web resources (sites, slots, settings).
const WEB_API_VERSION: &str = "2024-04-01";
/// API version for resource groups and template deployments.
pub(crate) const RESOURCES_API_VERSION: &str = "2021-04-01";
/// API version for storage account key listing.
const STORAGE_API_VERSION: &str = "2023-01-01";

/// Timeout for a single management-plane round trip. Long-running work is
/// carried by polling, so individual requests stay short.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff unit for the trigger-sync warm-up retry.
const DEFAULT_SYNC_BACKOFF_UNIT: Duration = Duration::from_secs(20);

/// Snapshot of a function app or one of its slots.
#[derive(Debug, Clone)]
pub struct FunctionSnapshot {
    pub id: String,
    pub name: String,
    /// Platform/OS family marker, e.g. "functionapp,linux".
    pub kind: String,
    /// Hosting plan SKU tier; "Dynamic" for consumption plans.
    pub sku: String,
    /// Lifecycle state as reported by the platform, e.g. "running".
    pub state: Option<String>,
}

/// Publishing credentials for the SCM (Kudu) site of a slot.
#[derive(Debug, Clone)]
pub struct PublishCredentials {
    pub scm_uri: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct SiteDocument {
    id: String,
    name: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    properties: SiteProperties,
}

#[derive(Debug, Default, Deserialize)]
struct SiteProperties {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    sku: Option<String>,
}

impl From<SiteDocument> for FunctionSnapshot {
    fn from(doc: SiteDocument) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            kind: doc.kind,
            sku: doc.properties.sku.unwrap_or_default(),
            state: doc.properties.state,
        }
    }
}

/// One page of a collection response.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(default, rename = "nextLink")]
    next_link: Option<String>,
}

/// Client bound to one subscription of one deployment target.
pub struct AzureClient {
    http: reqwest::Client,
    bearer: String,
    management_endpoint: String,
    subscription_id: String,
    poll_interval: Duration,
    sync_backoff_unit: Duration,
}

impl AzureClient {
    /// Connect to the management plane for one deployment target.
    ///
    /// Acquires a bearer token and reads the subscription back, which traps an
    /// inaccessible or mistyped subscription id before any stage work starts.
    pub async fn connect(target: &DeployTarget, credential: &Credential) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to create HTTP client")?;
        let bearer = credential
            .token(&http, &target.authority_endpoint, MANAGEMENT_SCOPE)
            .await
            .context("failed to obtain a management-plane token")?;

        let client = Self {
            http,
            bearer,
            management_endpoint: target.management_endpoint.trim_end_matches('/').to_string(),
            subscription_id: target.subscription_id.clone(),
            poll_interval: POLL_INTERVAL,
            sync_backoff_unit: DEFAULT_SYNC_BACKOFF_UNIT,
        };
        client
            .request(
                Method::GET,
                &format!("/subscriptions/{}", client.subscription_id),
                RESOURCES_API_VERSION,
                None,
            )
            .await
            .with_context(|| format!("subscription {} is not accessible", target.subscription_id))?;
        Ok(client)
    }

    /// Adjust the cadence used for long-running-operation polling.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Adjust the backoff unit of the trigger-sync warm-up retry.
    pub fn with_sync_backoff_unit(mut self, unit: Duration) -> Self {
        self.sync_backoff_unit = unit;
        self
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn bearer(&self) -> &str {
        &self.bearer
    }

    pub(crate) fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn sync_backoff_unit(&self) -> Duration {
        self.sync_backoff_unit
    }

    /// Issue a management-plane request against a subscription-relative path.
    pub(crate) async fn request(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let url = format!(
            "{}{}?api-version={}",
            self.management_endpoint, path, api_version
        );
        self.request_url(method, &url, body).await
    }

    /// Issue a request against an absolute URL (poll targets, `nextLink`
    /// pages). Non-2xx responses become [`ApiError`]s carrying the body.
    pub(crate) async fn request_url(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut request = self.http.request(method.clone(), url).bearer_auth(&self.bearer);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {url} failed to send"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(response)
    }

    /// Drive a 202-accepted management operation to its terminal response.
    ///
    /// Polls the URL from the `Location` (or `Azure-AsyncOperation`) header on
    /// the client's interval until the service stops answering 202.
    pub(crate) async fn finish_operation(
        &self,
        operation: &str,
        response: reqwest::Response,
        deadline: Instant,
    ) -> Result<reqwest::Response> {
        if response.status() != StatusCode::ACCEPTED {
            return Ok(response);
        }
        let poll_url = response
            .headers()
            .get(reqwest::header::LOCATION)
            .or_else(|| response.headers().get("azure-asyncoperation"))
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .with_context(|| format!("{operation} was accepted without a poll URL"))?;

        poll::wait_for(operation, self.poll_interval, deadline, || {
            let poll_url = poll_url.clone();
            async move {
                let response = self.request_url(Method::GET, &poll_url, None).await?;
                if response.status() == StatusCode::ACCEPTED {
                    Ok(Poll::Pending)
                } else {
                    Ok(Poll::Ready(response))
                }
            }
        })
        .await
    }

    fn site_path(&self, resource_group: &str, app: &str, slot: &str, suffix: &str) -> String {
        let base = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Web/sites/{}",
            self.subscription_id, resource_group, app
        );
        if slot.is_empty() {
            format!("{base}{suffix}")
        } else {
            format!("{base}/slots/{slot}{suffix}")
        }
    }

    /// Read a fresh snapshot of the app, or of one of its slots when `slot`
    /// is non-empty. A missing resource is `None`, not an error.
    pub async fn get_function(
        &self,
        resource_group: &str,
        app: &str,
        slot: &str,
    ) -> Result<Option<FunctionSnapshot>> {
        let path = self.site_path(resource_group, app, slot, "");
        match self.request(Method::GET, &path, WEB_API_VERSION, None).await {
            Ok(response) => {
                let doc: SiteDocument = response
                    .json()
                    .await
                    .context("site document is not the expected JSON")?;
                Ok(Some(doc.into()))
            }
            Err(err) if error::has_status(&err, 404) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// List every deployment slot of the app, following pagination.
    pub async fn list_slots(
        &self,
        resource_group: &str,
        app: &str,
    ) -> Result<Vec<FunctionSnapshot>> {
        let mut slots = Vec::new();
        let mut next = Some(format!(
            "{}{}?api-version={}",
            self.management_endpoint,
            self.site_path(resource_group, app, "", "/slots"),
            WEB_API_VERSION
        ));
        while let Some(url) = next {
            let page: Page<SiteDocument> = self
                .request_url(Method::GET, &url, None)
                .await?
                .json()
                .await
                .context("slot listing is not the expected JSON")?;
            slots.extend(page.value.into_iter().map(Into::into));
            next = page.next_link;
        }
        Ok(slots)
    }

    /// Check that the manifest's resources exist. Returns true when the app
    /// or a named slot still needs to be created; a missing resource group is
    /// an error, not a create signal.
    pub async fn validate_function(
        &self,
        resource_group: &str,
        app: &str,
        slot_names: &[String],
    ) -> Result<bool> {
        self.request(
            Method::GET,
            &format!(
                "/subscriptions/{}/resourcegroups/{}",
                self.subscription_id, resource_group
            ),
            RESOURCES_API_VERSION,
            None,
        )
        .await
        .with_context(|| format!("resource group {resource_group} is not readable"))?;

        if let Err(err) = self
            .request(
                Method::GET,
                &self.site_path(resource_group, app, "", ""),
                WEB_API_VERSION,
                None,
            )
            .await
        {
            return if error::has_status(&err, 404) {
                Ok(true)
            } else {
                Err(err)
            };
        }

        // The production slot is covered by the app read above.
        for slot in slot_names.iter().filter(|s| !s.is_empty()) {
            if let Err(err) = self
                .request(
                    Method::GET,
                    &self.site_path(resource_group, app, slot, ""),
                    WEB_API_VERSION,
                    None,
                )
                .await
            {
                return if error::has_status(&err, 404) {
                    Ok(true)
                } else {
                    Err(err)
                };
            }
        }
        Ok(false)
    }

    /// Read the slot's full application-settings bag.
    pub async fn list_app_settings(
        &self,
        resource_group: &str,
        app: &str,
        slot: &str,
    ) -> Result<BTreeMap<String, String>> {
        #[derive(Deserialize)]
        struct SettingsDocument {
            #[serde(default)]
            properties: BTreeMap<String, String>,
        }

        let path = self.site_path(resource_group, app, slot, "/config/appsettings/list");
        let doc: SettingsDocument = self
            .request(Method::POST, &path, WEB_API_VERSION, None)
            .await?
            .json()
            .await
            .context("application settings are not the expected JSON")?;
        Ok(doc.properties)
    }

    /// Replace the slot's application settings wholesale. The remote bag
    /// becomes exactly `settings`; callers read-modify-write.
    pub async fn update_app_settings(
        &self,
        resource_group: &str,
        app: &str,
        slot: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<()> {
        let path = self.site_path(resource_group, app, slot, "/config/appsettings");
        self.request(
            Method::PUT,
            &path,
            WEB_API_VERSION,
            Some(&json!({ "properties": settings })),
        )
        .await?;
        Ok(())
    }

    /// Fetch the SCM publishing credentials for a slot. Long-running; polls
    /// to completion.
    pub async fn publish_credentials(
        &self,
        resource_group: &str,
        app: &str,
        slot: &str,
        deadline: Instant,
    ) -> Result<PublishCredentials> {
        #[derive(Deserialize)]
        struct UserDocument {
            properties: UserProperties,
        }
        #[derive(Deserialize)]
        struct UserProperties {
            #[serde(rename = "scmUri")]
            scm_uri: String,
            #[serde(rename = "publishingUserName")]
            username: String,
            #[serde(rename = "publishingPassword")]
            password: String,
        }

        let path = self.site_path(
            resource_group,
            app,
            slot,
            "/config/publishingcredentials/list",
        );
        let response = self.request(Method::POST, &path, WEB_API_VERSION, None).await?;
        let response = self
            .finish_operation("publishing credentials fetch", response, deadline)
            .await?;
        let doc: UserDocument = response
            .json()
            .await
            .context("publishing credentials are not the expected JSON")?;
        Ok(PublishCredentials {
            scm_uri: doc.properties.scm_uri,
            username: doc.properties.username,
            password: doc.properties.password,
        })
    }

    /// Whether the SCM site still accepts basic authentication, or a bearer
    /// token is required instead.
    pub async fn scm_basic_auth_allowed(
        &self,
        resource_group: &str,
        app: &str,
        slot: &str,
    ) -> Result<bool> {
        #[derive(Deserialize)]
        struct PolicyDocument {
            properties: PolicyProperties,
        }
        #[derive(Deserialize)]
        struct PolicyProperties {
            allow: bool,
        }

        let path = self.site_path(
            resource_group,
            app,
            slot,
            "/basicPublishingCredentialsPolicies/scm",
        );
        let doc: PolicyDocument = self
            .request(Method::GET, &path, WEB_API_VERSION, None)
            .await?
            .json()
            .await
            .context("SCM auth policy is not the expected JSON")?;
        Ok(doc.properties.allow)
    }

    /// Notify the platform that function triggers changed. Idempotent.
    ///
    /// The endpoint nominally answers 204; the service sometimes answers 200
    /// instead, which counts as success (platform quirk).
    pub async fn sync_function_triggers(
        &self,
        resource_group: &str,
        app: &str,
        slot: &str,
    ) -> Result<()> {
        let path = self.site_path(resource_group, app, slot, "/syncfunctiontriggers");
        self.request(Method::POST, &path, WEB_API_VERSION, None).await?;
        Ok(())
    }

    /// Swap the routed content of two slots. Empty names mean the production
    /// slot; at least one side must be named. Long-running; polls to
    /// completion.
    pub async fn swap_slots(
        &self,
        resource_group: &str,
        app: &str,
        slot1: &str,
        slot2: &str,
        deadline: Instant,
    ) -> Result<()> {
        let (source, target) = swap_route(slot1, slot2)?;
        let path = self.site_path(resource_group, app, source, "/slotsswap");
        let response = self
            .request(
                Method::POST,
                &path,
                WEB_API_VERSION,
                Some(&json!({ "targetSlot": target })),
            )
            .await?;
        self.finish_operation("slot swap", response, deadline).await?;
        Ok(())
    }

    /// First key of a storage account, used to sign package URLs.
    pub(crate) async fn storage_account_key(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct KeyListing {
            #[serde(default)]
            keys: Vec<AccountKey>,
        }
        #[derive(Deserialize)]
        struct AccountKey {
            value: String,
        }

        let path = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}/listKeys",
            self.subscription_id, resource_group, account
        );
        let listing: KeyListing = self
            .request(Method::POST, &path, STORAGE_API_VERSION, None)
            .await?
            .json()
            .await
            .context("storage key listing is not the expected JSON")?;
        listing
            .keys
            .into_iter()
            .next()
            .map(|key| key.value)
            .with_context(|| format!("storage account {account} has no keys"))
    }
}

/// Route a swap to the management API: with one side empty the named slot is
/// swapped with production (production-relative call); with both sides named
/// the first is the source and the second the target. Both sides empty is
/// invalid.
fn swap_route<'a>(slot1: &'a str, slot2: &'a str) -> Result<(&'a str, &'a str)> {
    match (slot1.is_empty(), slot2.is_empty()) {
        (true, true) => anyhow::bail!("at least one slot name must be given for a swap"),
        (false, true) => Ok(("", slot1)),
        (true, false) => Ok(("", slot2)),
        (false, false) => Ok((slot1, slot2)),
    }
}
