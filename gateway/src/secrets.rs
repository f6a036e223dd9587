//! Credential resolution for the upstream service.
//!
//! Order: Bitwarden Secrets Manager (when `BWS_ACCESS_TOKEN` is set and a
//! secret id is configured), then the plain environment variable, then the
//! built-in fallback.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_BWS_API_URL: &str = "https://api.bitwarden.com";

pub struct SecretsClient {
    access_token: Option<String>,
    api_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct BwsSecretResponse {
    value: String,
}

impl SecretsClient {
    pub fn new(access_token: Option<String>, api_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            access_token,
            api_url: api_url.into(),
            http,
        }
    }

    /// Reads `BWS_ACCESS_TOKEN` and `BWS_API_URL`.
    pub fn from_env(http: reqwest::Client) -> Self {
        let access_token = std::env::var("BWS_ACCESS_TOKEN").ok().filter(|t| !t.is_empty());
        let api_url =
            std::env::var("BWS_API_URL").unwrap_or_else(|_| DEFAULT_BWS_API_URL.to_string());
        Self::new(access_token, api_url, http)
    }

    /// Resolve one credential. Never fails: the fallback is the last resort.
    pub async fn resolve(&self, secret_id: Option<&str>, env_var: &str, fallback: &str) -> String {
        if let (Some(token), Some(id)) = (&self.access_token, secret_id) {
            match self.fetch_from_bitwarden(token, id).await {
                Ok(value) => {
                    debug!(secret_id = id, "credential resolved from Bitwarden");
                    return value;
                }
                Err(e) => warn!(
                    secret_id = id,
                    error = %e,
                    "Bitwarden lookup failed, falling back to env var"
                ),
            }
        }

        match std::env::var(env_var) {
            Ok(v) if !v.trim().is_empty() => v,
            _ => fallback.to_string(),
        }
    }

    async fn fetch_from_bitwarden(&self, token: &str, secret_id: &str) -> Result<String> {
        let url = format!("{}/secrets/{}", self.api_url.trim_end_matches('/'), secret_id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("HTTP request to Bitwarden Secrets Manager failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("Bitwarden API returned status {}", resp.status()));
        }

        let body: BwsSecretResponse = resp
            .json()
            .await
            .context("Failed to parse Bitwarden response")?;
        Ok(body.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn without_access_token_uses_fallback_for_unset_var() {
        let client = SecretsClient::new(None, DEFAULT_BWS_API_URL, reqwest::Client::new());
        let v = client
            .resolve(Some("ignored"), "GATEWAY_TEST_SURELY_UNSET_VAR", "fallback")
            .await;
        assert_eq!(v, "fallback");
    }

    #[tokio::test]
    async fn unreachable_bitwarden_falls_through() {
        let client = SecretsClient::new(
            Some("token".into()),
            "http://127.0.0.1:9",
            reqwest::Client::new(),
        );
        let v = client
            .resolve(Some("id"), "GATEWAY_TEST_SURELY_UNSET_VAR_2", "MHPL.API")
            .await;
        assert_eq!(v, "MHPL.API");
    }
}
