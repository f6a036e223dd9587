//! Bearer token cache and the provider that fills it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use contract::Clock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AuthError;

/// A token is treated as expired this long before its real expiry.
pub const SAFETY_MARGIN_MS: i64 = 60_000;

/// Assumed lifetime when the token carries no readable `exp` claim.
pub const FALLBACK_LIFETIME_MS: i64 = 24 * 60 * 60 * 1000;

// ------------------------------------------------------------------ //
//  BearerToken                                                        //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub value: String,
    pub expires_at_ms: i64,
}

impl BearerToken {
    /// Wrap a freshly acquired token, reading its expiry from the payload
    /// segment when possible.
    pub fn from_raw(value: String, now_ms: i64) -> Self {
        let expires_at_ms = decode_expiry_ms(&value).unwrap_or(now_ms + FALLBACK_LIFETIME_MS);
        Self { value, expires_at_ms }
    }

    pub fn is_usable(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms - SAFETY_MARGIN_MS
    }

    /// Last few characters only, for logs.
    pub fn redacted(&self) -> String {
        let tail: String = self
            .value
            .chars()
            .rev()
            .take(8)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    }
}

/// Read `exp` (seconds) from the middle segment of a three-part token.
pub fn decode_expiry_ms(token: &str) -> Option<i64> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let bytes = decode_segment(parts[1])?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_f64()?;
    Some((exp * 1000.0) as i64)
}

/// Accepts both the standard and URL-safe alphabets, padded or not.
fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let normalized: String = segment
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    STANDARD_NO_PAD.decode(normalized).ok()
}

// ------------------------------------------------------------------ //
//  TokenCache                                                         //
// ------------------------------------------------------------------ //

/// Single-slot token store. One instance per gateway process (or per test).
#[derive(Debug)]
pub struct TokenCache {
    slot: RwLock<Option<BearerToken>>,
    clock: Arc<dyn Clock>,
}

impl TokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: RwLock::new(None),
            clock,
        }
    }

    /// The cached token, only while it is inside its validity window.
    pub fn get(&self) -> Option<BearerToken> {
        let now = self.clock.now_ms();
        let guard = self.slot.read().unwrap_or_else(|p| p.into_inner());
        guard.as_ref().filter(|t| t.is_usable(now)).cloned()
    }

    /// Replace whatever is cached.
    pub fn store(&self, token: BearerToken) {
        *self.slot.write().unwrap_or_else(|p| p.into_inner()) = Some(token);
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

// ------------------------------------------------------------------ //
//  TokenSource                                                        //
// ------------------------------------------------------------------ //

/// Something that can mint a new raw bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self) -> Result<String, AuthError>;
}

/// Where a resolved token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenOrigin {
    Cache,
    Upstream,
}

/// Cache-first token resolution.
///
/// Two concurrent callers that both miss the cache each hit the source;
/// the last one to finish wins the slot.
pub struct TokenProvider {
    cache: TokenCache,
    source: Arc<dyn TokenSource>,
}

impl TokenProvider {
    pub fn new(cache: TokenCache, source: Arc<dyn TokenSource>) -> Self {
        Self { cache, source }
    }

    pub async fn get_token(&self) -> Result<BearerToken, AuthError> {
        self.resolve().await.map(|(token, _)| token)
    }

    pub async fn resolve(&self) -> Result<(BearerToken, TokenOrigin), AuthError> {
        if let Some(token) = self.cache.get() {
            return Ok((token, TokenOrigin::Cache));
        }
        self.refresh().await.map(|t| (t, TokenOrigin::Upstream))
    }

    /// Always go to the source; on success the new token replaces the cached one.
    pub async fn refresh(&self) -> Result<BearerToken, AuthError> {
        let raw = self.source.acquire().await.map_err(|e| {
            warn!(error = %e, "bearer token acquisition failed");
            e
        })?;
        let token = BearerToken::from_raw(raw, self.cache.clock().now_ms());
        info!(
            token = %token.redacted(),
            expires_at_ms = token.expires_at_ms,
            "bearer token cached"
        );
        self.cache.store(token.clone());
        Ok(token)
    }

    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }
}

// ------------------------------------------------------------------ //
//  FakeTokenSource (for tests)                                        //
// ------------------------------------------------------------------ //

/// Hands out a fixed token (or a fixed rejection) and counts calls.
#[derive(Debug, Default)]
pub struct FakeTokenSource {
    token: Mutex<Option<String>>,
    reject_status: Option<u16>,
    calls: AtomicUsize,
}

impl FakeTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
            ..Self::default()
        }
    }

    pub fn rejecting(status: u16) -> Self {
        Self {
            reject_status: Some(status),
            ..Self::default()
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = Some(token.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for FakeTokenSource {
    async fn acquire(&self) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.reject_status {
            return Err(AuthError::Rejected {
                status,
                status_text: "Rejected".into(),
                body_preview: String::new(),
            });
        }
        self.token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(AuthError::NoToken)
    }
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //
