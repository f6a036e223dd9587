//! Uniform success/failure wrapper returned by the gateway.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway response body.
///
/// The transport-level status is always 200; `status` carries the
/// HTTP-equivalent outcome (200, 400, 401, 500, 502).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_from_upstream: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text_from_upstream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_params: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_url: Option<String>,
}

impl Envelope {
    /// Successful upstream call carrying the parsed (or wrapped) body.
    pub fn ok(upstream_status: u16, data: Value) -> Self {
        Self {
            success: true,
            status: 200,
            status_from_upstream: Some(upstream_status),
            data: Some(data),
            ..Self::blank()
        }
    }

    /// Logical failure with an HTTP-equivalent status and a short message.
    pub fn failure(status: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            error: Some(error.into()),
            ..Self::blank()
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_upstream(
        mut self,
        status: u16,
        status_text: impl Into<String>,
        raw_body: impl Into<String>,
    ) -> Self {
        self.status_from_upstream = Some(status);
        self.status_text_from_upstream = Some(status_text.into());
        self.raw_body = Some(raw_body.into());
        self
    }

    pub fn with_request(mut self, params: BTreeMap<String, String>, url: impl Into<String>) -> Self {
        self.request_params = Some(params);
        self.request_url = Some(url.into());
        self
    }

    /// Best human-readable reason for a failed envelope.
    pub fn message(&self) -> String {
        if let Some(e) = &self.error {
            return e.clone();
        }
        match self.status_from_upstream {
            Some(s) => format!("upstream request failed ({s})"),
            None => format!("gateway request failed ({})", self.status),
        }
    }

    fn blank() -> Self {
        Self {
            success: false,
            status: 0,
            status_from_upstream: None,
            status_text_from_upstream: None,
            data: None,
            raw_body: None,
            error: None,
            details: None,
            request_params: None,
            request_url: None,
        }
    }
}
