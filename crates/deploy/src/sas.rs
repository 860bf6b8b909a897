//! Read-only SAS signing for package blobs.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration as TimeDelta, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::{Host, Url};

use crate::client::AzureClient;

/// Service version stamped into generated signatures.
const SAS_VERSION: &str = "2024-11-04";
/// The signature start is backdated to tolerate clock skew between this
/// machine and the storage service.
const START_SKEW_MINUTES: i64 = 5;
/// Packages must stay fetchable for the lifetime of the deployment slot, so
/// the validity window is effectively unbounded: five years.
const EXPIRY_DAYS: i64 = 365 * 5;

/// Pieces of a blob URL relevant to signing.
#[derive(Debug, PartialEq, Eq)]
struct BlobParts {
    account: String,
    container: String,
    blob: String,
}

/// Sign `package_uri` for read access, unless it already carries a signature
/// (then it passes through unchanged). The account key is looked up through
/// the management plane; the result is never persisted and is regenerated on
/// every deployment attempt.
pub async fn sign_blob_url(
    client: &AzureClient,
    resource_group: &str,
    package_uri: &str,
) -> Result<String> {
    let url = Url::parse(package_uri)
        .with_context(|| format!("package URI {package_uri} is not a valid URL"))?;
    if is_presigned(&url) {
        return Ok(package_uri.to_string());
    }

    let parts = parse_blob_url(&url)?;
    let key = client
        .storage_account_key(resource_group, &parts.account)
        .await
        .with_context(|| format!("failed to look up a key for account {}", parts.account))?;

    let now = Utc::now();
    let start = now - TimeDelta::minutes(START_SKEW_MINUTES);
    let expiry = now + TimeDelta::days(EXPIRY_DAYS);
    let query = read_only_signature(&parts, &key, start, expiry)?;

    let mut signed = url;
    signed.set_query(Some(&query));
    Ok(signed.to_string())
}

/// A URL already carrying a `sig` parameter is signed; leave it alone.
fn is_presigned(url: &Url) -> bool {
    url.query_pairs().any(|(key, _)| key == "sig")
}

/// Split a blob URL into account, container and blob name. Host-style URLs
/// carry the account as the first host label; IP and private-endpoint style
/// URLs carry it as the first path segment instead.
fn parse_blob_url(url: &Url) -> Result<BlobParts> {
    let host = url
        .host_str()
        .context("blob URL has no host")?
        .to_string();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let ip_style = matches!(url.host(), Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)));
    let (account, rest) = if ip_style {
        let Some((account, rest)) = segments.split_first() else {
            bail!("blob URL {url} does not name a storage account");
        };
        (account.to_string(), rest)
    } else {
        let account = host
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();
        (account, segments.as_slice())
    };

    let Some((container, blob_segments)) = rest.split_first() else {
        bail!("blob URL {url} does not follow the container/blob scheme");
    };
    let blob = blob_segments.join("/");
    if account.is_empty() || container.is_empty() || blob.is_empty() {
        bail!("blob URL {url} does not follow the container/blob scheme");
    }

    Ok(BlobParts {
        account,
        container: container.to_string(),
        blob,
    })
}

/// Compute the query string of a read-only service SAS for the given blob.
fn read_only_signature(
    parts: &BlobParts,
    account_key: &str,
    start: DateTime<Utc>,
    expiry: DateTime<Utc>,
) -> Result<String> {
    let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
    let expiry = expiry.to_rfc3339_opts(SecondsFormat::Secs, true);
    let canonical_resource = format!("/blob/{}/{}/{}", parts.account, parts.container, parts.blob);

    // Field order is fixed by the service SAS contract for this version:
    // permissions, start, expiry, resource, identifier, IP, protocol,
    // version, resource type, snapshot time, encryption scope, and the five
    // response-header overrides.
    let string_to_sign = [
        "r",
        start.as_str(),
        expiry.as_str(),
        canonical_resource.as_str(),
        "",
        "",
        "",
        SAS_VERSION,
        "b",
        "",
        "",
        "",
        "",
        "",
        "",
        "",
    ]
    .join("\n");

    let key_bytes = BASE64
        .decode(account_key)
        .context("storage account key is not valid base64")?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key_bytes)
        .context("storage account key was rejected for signing")?;
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("sv", SAS_VERSION)
        .append_pair("st", &start)
        .append_pair("se", &expiry)
        .append_pair("sr", "b")
        .append_pair("sp", "r")
        .append_pair("sig", &signature);
    Ok(query.finish())
}
