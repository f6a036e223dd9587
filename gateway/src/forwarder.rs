//! Request forwarder: one inbound KPI request becomes one upstream call.

use std::sync::Arc;
use std::time::Duration;

use contract::{endpoints, Clock, Envelope};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE,
    PRAGMA, USER_AGENT,
};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::auth::preview;
use crate::error::GatewayError;
use crate::params::{self, ParamSet};
use crate::token::TokenProvider;

/// Headers the forwarder sets itself; caller parameters may not replace them.
const RESERVED: [HeaderName; 6] = [AUTHORIZATION, ACCEPT, CONTENT_TYPE, USER_AGENT, CACHE_CONTROL, PRAGMA];

const ERROR_PREVIEW_CHARS: usize = 500;

pub struct Gateway {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    tokens: Arc<TokenProvider>,
    clock: Arc<dyn Clock>,
}

impl Gateway {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        user_agent: impl Into<String>,
        tokens: Arc<TokenProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: user_agent.into(),
            tokens,
            clock,
        }
    }

    /// Shared HTTP client; `timeout` is only applied when configured.
    pub fn http_client(timeout: Option<Duration>) -> reqwest::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        builder.build()
    }

    pub fn tokens(&self) -> &Arc<TokenProvider> {
        &self.tokens
    }

    /// Forward a KPI request and fold every outcome into an [`Envelope`].
    pub async fn handle(&self, endpoint_id: &str, raw: &Map<String, Value>) -> Envelope {
        match self.forward(endpoint_id, raw).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(endpoint_id, status = e.status(), error = %e, "kpi request failed");
                e.into_envelope()
            }
        }
    }

    async fn forward(
        &self,
        endpoint_id: &str,
        raw: &Map<String, Value>,
    ) -> Result<Envelope, GatewayError> {
        let descriptor = endpoints::lookup(endpoint_id)
            .ok_or_else(|| GatewayError::UnknownEndpoint(endpoint_id.to_string()))?;

        let token = self.tokens.get_token().await.map_err(GatewayError::Auth)?;

        let url = format!("{}{}", self.base_url, descriptor.upstream_path);
        let params = params::prepare(endpoint_id, raw, self.clock.today());
        let mut headers = self.param_headers(endpoint_id, &params)?;
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.value))
                .map_err(|_| GatewayError::InvalidParameter("Authorization".into()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        if let Ok(ua) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, ua);
        }

        info!(
            endpoint_id,
            url = %url,
            token = %token.redacted(),
            params = ?params,
            "forwarding kpi request"
        );

        let resp = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint_id, error = %e, "network error calling upstream");
                GatewayError::Network(e)
            })?;
        let status = resp.status();
        let body = resp.text().await.map_err(GatewayError::Network)?;

        if !status.is_success() {
            error!(
                endpoint_id,
                status = status.as_u16(),
                url = %url,
                body = %preview(&body, ERROR_PREVIEW_CHARS),
                "upstream returned error status"
            );
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown error").to_string(),
                body,
                params,
                url,
            });
        }

        debug!(endpoint_id, status = status.as_u16(), bytes = body.len(), "upstream ok");
        Ok(Envelope::ok(status.as_u16(), parse_body(&body)))
    }

    /// Every parameter becomes its own request header.
    fn param_headers(&self, endpoint_id: &str, params: &ParamSet) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::with_capacity(params.len() + RESERVED.len());
        for (key, value) in params {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| GatewayError::InvalidParameter(key.clone()))?;
            if RESERVED.contains(&name) {
                warn!(endpoint_id, key = %key, "ignoring parameter that shadows a reserved header");
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|_| GatewayError::InvalidParameter(key.clone()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// JSON only when the body looks like JSON; anything else is wrapped as `{raw}`.
pub fn parse_body(body: &str) -> Value {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str(body) {
            return v;
        }
    }
    json!({ "raw": body })
}
