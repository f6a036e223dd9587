//! Client side of the gateway: KPI fetches and token warm-up.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use contract::{Clock, Envelope};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::overrides::ParamMap;

const TOKEN_MARGIN_MS: i64 = 60_000;
const TOKEN_FALLBACK_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("gateway unreachable: {0}")]
    Transport(String),
    /// The gateway answered with an unsuccessful envelope.
    #[error("{message} (status {status})")]
    Api { status: u16, message: String },
    #[error("unreadable gateway response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Reused from memory or from the gateway's own cache.
    Cached,
    Generated,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatus {
    pub source: TokenSource,
    pub token: Option<String>,
}

impl TokenStatus {
    pub fn failed() -> Self {
        Self {
            source: TokenSource::Failed,
            token: None,
        }
    }
}

// ------------------------------------------------------------------ //
//  Trait                                                              //
// ------------------------------------------------------------------ //

#[async_trait]
pub trait KpiGateway: Send + Sync {
    /// Fetch one report. `Ok` carries the envelope's `data`.
    async fn fetch(&self, endpoint_id: &str, params: &ParamMap) -> Result<Value, FetchError>;

    /// Make sure the gateway holds a usable token. Never fails; problems
    /// are reported as [`TokenSource::Failed`].
    async fn ensure_token(&self) -> TokenStatus;
}

// ------------------------------------------------------------------ //
//  HttpGatewayClient (production)                                     //
// ------------------------------------------------------------------ //

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenReply {
    success: bool,
    token: Option<String>,
    expires_at_epoch_ms: Option<i64>,
    source: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct HeldToken {
    value: String,
    expires_at_ms: i64,
}

pub struct HttpGatewayClient {
    http: reqwest::Client,
    base_url: String,
    clock: Arc<dyn Clock>,
    held: Mutex<Option<HeldToken>>,
}

impl HttpGatewayClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            clock,
            held: Mutex::new(None),
        }
    }

    fn usable_held(&self) -> Option<String> {
        let now = self.clock.now_ms();
        self.held
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .filter(|t| now < t.expires_at_ms - TOKEN_MARGIN_MS)
            .map(|t| t.value.clone())
    }

    async fn issue_token(&self) -> Result<TokenReply, FetchError> {
        let url = format!("{}/api/authentication", self.base_url);
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        resp.json::<TokenReply>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl KpiGateway for HttpGatewayClient {
    async fn fetch(&self, endpoint_id: &str, params: &ParamMap) -> Result<Value, FetchError> {
        let url = format!("{}/api/mhpl/{}", self.base_url, endpoint_id);
        let resp = self
            .http
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        if !envelope.success {
            return Err(FetchError::Api {
                status: envelope.status,
                message: envelope.message(),
            });
        }
        Ok(envelope.data.unwrap_or(Value::Null))
    }

    async fn ensure_token(&self) -> TokenStatus {
        if let Some(token) = self.usable_held() {
            debug!("reusing gateway token");
            return TokenStatus {
                source: TokenSource::Cached,
                token: Some(token),
            };
        }

        let reply = match self.issue_token().await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "token warm-up failed");
                return TokenStatus::failed();
            }
        };
        let Some(token) = reply.token.filter(|t| reply.success && !t.is_empty()) else {
            warn!(error = ?reply.error, "gateway could not issue a token");
            return TokenStatus::failed();
        };

        let expires_at_ms = reply
            .expires_at_epoch_ms
            .unwrap_or_else(|| self.clock.now_ms() + TOKEN_FALLBACK_MS);
        *self.held.lock().unwrap_or_else(|p| p.into_inner()) = Some(HeldToken {
            value: token.clone(),
            expires_at_ms,
        });
        let source = match reply.source.as_deref() {
            Some("cache") => TokenSource::Cached,
            _ => TokenSource::Generated,
        };
        TokenStatus {
            source,
            token: Some(token),
        }
    }
}

// ------------------------------------------------------------------ //
//  FakeGateway (for tests)                                            //
// ------------------------------------------------------------------ //

/// Scripted gateway. Each endpoint answers with its queued responses in
/// order, then keeps repeating the last one; unscripted endpoints fail.
#[derive(Debug, Clone, Default)]
pub struct FakeGateway {
    inner: Arc<Mutex<FakeState>>,
}

#[derive(Debug, Default)]
struct FakeState {
    scripts: HashMap<String, VecDeque<Result<Value, (u16, String)>>>,
    delay: Option<Duration>,
    calls: Vec<(String, ParamMap)>,
    token_calls: usize,
    token_fails: bool,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn respond(&self, endpoint_id: &str, data: Value) -> &Self {
        self.state()
            .scripts
            .entry(endpoint_id.to_string())
            .or_default()
            .push_back(Ok(data));
        self
    }

    pub fn fail(&self, endpoint_id: &str, status: u16, message: &str) -> &Self {
        self.state()
            .scripts
            .entry(endpoint_id.to_string())
            .or_default()
            .push_back(Err((status, message.to_string())));
        self
    }

    /// Forget every scripted answer for one endpoint.
    pub fn reset(&self, endpoint_id: &str) -> &Self {
        self.state().scripts.remove(endpoint_id);
        self
    }

    /// Every fetch sleeps this long first.
    pub fn delay(&self, by: Duration) -> &Self {
        self.state().delay = Some(by);
        self
    }

    pub fn fail_tokens(&self) -> &Self {
        self.state().token_fails = true;
        self
    }

    pub fn calls(&self) -> Vec<(String, ParamMap)> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, endpoint_id: &str) -> Vec<ParamMap> {
        self.state()
            .calls
            .iter()
            .filter(|(id, _)| id == endpoint_id)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn token_calls(&self) -> usize {
        self.state().token_calls
    }
}

#[async_trait]
impl KpiGateway for FakeGateway {
    async fn fetch(&self, endpoint_id: &str, params: &ParamMap) -> Result<Value, FetchError> {
        let (delay, answer) = {
            let mut state = self.state();
            state.calls.push((endpoint_id.to_string(), params.clone()));
            let answer = match state.scripts.get_mut(endpoint_id) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            };
            (state.delay, answer)
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        match answer {
            Some(Ok(data)) => Ok(data),
            Some(Err((status, message))) => Err(FetchError::Api { status, message }),
            None => Err(FetchError::Transport(format!("no script for {endpoint_id}"))),
        }
    }

    async fn ensure_token(&self) -> TokenStatus {
        let mut state = self.state();
        state.token_calls += 1;
        if state.token_fails {
            return TokenStatus::failed();
        }
        TokenStatus {
            source: if state.token_calls == 1 {
                TokenSource::Generated
            } else {
                TokenSource::Cached
            },
            token: Some("fake-token".to_string()),
        }
    }
}
