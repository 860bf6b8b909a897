//! Bearer-token acquisition for the management plane.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ApiError;

/// Scope requested for management-plane tokens.
pub const MANAGEMENT_SCOPE: &str = "https://management.core.windows.net/.default";

/// Credential used to obtain bearer tokens.
///
/// Constructed once per stage execution and passed down explicitly, so
/// concurrent executions against different targets never share state.
#[derive(Clone)]
pub enum Credential {
    /// Client-credentials flow against the target's authority endpoint.
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    /// A pre-acquired token, used when tokens are issued elsewhere.
    Static(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl Credential {
    /// Read a client-secret credential from the conventional environment
    /// variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::ClientSecret {
            tenant_id: std::env::var("AZURE_TENANT_ID").context("AZURE_TENANT_ID is not set")?,
            client_id: std::env::var("AZURE_CLIENT_ID").context("AZURE_CLIENT_ID is not set")?,
            client_secret: std::env::var("AZURE_CLIENT_SECRET")
                .context("AZURE_CLIENT_SECRET is not set")?,
        })
    }

    /// Obtain a bearer token for `scope` from the given authority.
    pub async fn token(
        &self,
        http: &reqwest::Client,
        authority_endpoint: &str,
        scope: &str,
    ) -> Result<String> {
        let (tenant_id, client_id, client_secret) = match self {
            Self::Static(token) => return Ok(token.clone()),
            Self::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => (tenant_id, client_id, client_secret),
        };

        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            authority_endpoint.trim_end_matches('/'),
            tenant_id
        );
        let response = http
            .post(&token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await
            .context("token request failed to send")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError {
                status: status.as_u16(),
                body,
            })
            .context("token request rejected");
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("token response is not the expected JSON")?;
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_credential_returns_token_without_network() {
        let credential = Credential::Static("preissued".to_string());
        let http = reqwest::Client::new();

        // The authority is unroutable; a static credential must never dial it.
        let token = credential
            .token(&http, "http://127.0.0.1:1", MANAGEMENT_SCOPE)
            .await
            .unwrap();
        assert_eq!(token, "preissued");
    }
}
