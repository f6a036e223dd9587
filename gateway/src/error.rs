//! Gateway error taxonomy and its mapping onto the failure [`Envelope`].

use std::collections::BTreeMap;

use contract::Envelope;
use thiserror::Error;

/// Failure to obtain a bearer token from the upstream auth endpoint.
///
/// Never cached: the next request retries auth from scratch.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Auth failed ({status} {status_text})")]
    Rejected {
        status: u16,
        status_text: String,
        body_preview: String,
    },
    #[error("No bearer token found in auth response")]
    NoToken,
    #[error("auth request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AuthError {
    /// Upstream status, when the auth endpoint answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unknown MHPL endpointId: {0}")]
    UnknownEndpoint(String),
    #[error("Failed to obtain bearer token")]
    Auth(#[source] AuthError),
    #[error("Invalid header parameter: {0}")]
    InvalidParameter(String),
    #[error("Network error while calling MHPL API")]
    Network(#[source] reqwest::Error),
    #[error("MHPL API responded {status} {status_text}")]
    Upstream {
        status: u16,
        status_text: String,
        body: String,
        params: BTreeMap<String, String>,
        url: String,
    },
}

impl GatewayError {
    /// HTTP-equivalent status carried in the envelope.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::UnknownEndpoint(_) | GatewayError::InvalidParameter(_) => 400,
            GatewayError::Auth(_) => 500,
            GatewayError::Network(_) => 502,
            GatewayError::Upstream { status: 401, .. } => 401,
            GatewayError::Upstream { .. } => 502,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        let status = self.status();
        let message = self.to_string();
        match self {
            GatewayError::UnknownEndpoint(_) | GatewayError::InvalidParameter(_) => {
                Envelope::failure(status, message)
            }
            GatewayError::Auth(e) => Envelope::failure(status, message).with_details(e.to_string()),
            GatewayError::Network(e) => {
                Envelope::failure(status, message).with_details(e.to_string())
            }
            GatewayError::Upstream {
                status: upstream,
                status_text,
                body,
                params,
                url,
            } => Envelope::failure(status, message)
                .with_upstream(upstream, status_text, body)
                .with_request(params, url),
        }
    }
}
