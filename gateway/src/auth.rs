//! Upstream auth client: trades Basic credentials for a bearer token.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use tracing::{error, warn};

use crate::error::AuthError;
use crate::extract::extract_token;
use crate::token::TokenSource;

/// Path of the auth endpoint, relative to the upstream base URL.
pub const AUTH_PATH: &str = "/ords/xapi/auth/token";

const PREVIEW_CHARS: usize = 300;

pub struct UpstreamAuth {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl UpstreamAuth {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn basic_header(&self) -> String {
        let creds = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {creds}")
    }
}

#[async_trait]
impl TokenSource for UpstreamAuth {
    async fn acquire(&self) -> Result<String, AuthError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), AUTH_PATH);
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.basic_header())
            .header(ACCEPT, "application/json, */*")
            .send()
            .await?;

        let status = resp.status();
        let raw = resp.text().await?;

        if !status.is_success() {
            let body_preview = preview(&raw, PREVIEW_CHARS);
            error!(
                status = status.as_u16(),
                body = %body_preview,
                "upstream auth request rejected"
            );
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body_preview,
            });
        }

        let parsed: Option<serde_json::Value> = serde_json::from_str(&raw).ok();
        extract_token(parsed.as_ref(), &raw).ok_or_else(|| {
            warn!(body = %preview(&raw, PREVIEW_CHARS), "no bearer token in auth response");
            AuthError::NoToken
        })
    }
}

/// First `max` characters of `text`, on a char boundary.
pub(crate) fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
