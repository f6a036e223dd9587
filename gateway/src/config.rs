//! Gateway configuration.
//!
//! | Env var                | Default                              |
//! |------------------------|--------------------------------------|
//! | `GATEWAY_ADDR`         | `0.0.0.0:8080`                       |
//! | `MHPL_BASE_URL`        | `http://appit.ignitetechno.com:8080` |
//! | `MHPL_USERNAME`        | `MHPL.API`                           |
//! | `MHPL_PASSWORD`        | built-in service password            |
//! | `MHPL_USER_AGENT`      | `MHPL-Proxy/1.0`                     |
//! | `MHPL_TIMEOUT_SECS`    | unset (no client timeout)            |
//!
//! Username and password go through [`SecretsClient`] first
//! (`BWS_MHPL_USERNAME_ID`, `BWS_MHPL_PASSWORD_ID`).

use std::time::Duration;

use crate::secrets::SecretsClient;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_BASE_URL: &str = "http://appit.ignitetechno.com:8080";
pub const DEFAULT_USERNAME: &str = "MHPL.API";
pub const DEFAULT_PASSWORD: &str = "1234567890#25";
pub const DEFAULT_USER_AGENT: &str = "MHPL-Proxy/1.0";

#[derive(Clone)]
pub struct GatewayConfig {
    pub addr: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("addr", &self.addr)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GatewayConfig {
    /// Build from an arbitrary variable lookup. Credentials come from the
    /// lookup too; [`GatewayConfig::from_env`] layers secrets on top.
    pub fn from_vars<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            addr: var("GATEWAY_ADDR", DEFAULT_ADDR),
            base_url: var("MHPL_BASE_URL", DEFAULT_BASE_URL),
            username: var("MHPL_USERNAME", DEFAULT_USERNAME),
            password: var("MHPL_PASSWORD", DEFAULT_PASSWORD),
            user_agent: var("MHPL_USER_AGENT", DEFAULT_USER_AGENT),
            timeout: get("MHPL_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub async fn from_env(secrets: &SecretsClient) -> Self {
        let mut cfg = Self::from_vars(|k| std::env::var(k).ok());
        let username_id = std::env::var("BWS_MHPL_USERNAME_ID").ok();
        let password_id = std::env::var("BWS_MHPL_PASSWORD_ID").ok();
        cfg.username = secrets
            .resolve(username_id.as_deref(), "MHPL_USERNAME", DEFAULT_USERNAME)
            .await;
        cfg.password = secrets
            .resolve(password_id.as_deref(), "MHPL_PASSWORD", DEFAULT_PASSWORD)
            .await;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> GatewayConfig {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        GatewayConfig::from_vars(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = cfg(&[]);
        assert_eq!(c.addr, DEFAULT_ADDR);
        assert_eq!(c.base_url, DEFAULT_BASE_URL);
        assert_eq!(c.username, DEFAULT_USERNAME);
        assert_eq!(c.user_agent, "MHPL-Proxy/1.0");
        assert!(c.timeout.is_none());
    }

    #[test]
    fn overrides_and_timeout() {
        let c = cfg(&[("MHPL_BASE_URL", "http://localhost:9000"), ("MHPL_TIMEOUT_SECS", "15")]);
        assert_eq!(c.base_url, "http://localhost:9000");
        assert_eq!(c.timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn blank_and_invalid_values_fall_back() {
        let c = cfg(&[("GATEWAY_ADDR", "  "), ("MHPL_TIMEOUT_SECS", "soon")]);
        assert_eq!(c.addr, DEFAULT_ADDR);
        assert!(c.timeout.is_none());
    }

    #[test]
    fn debug_hides_password() {
        let rendered = format!("{:?}", cfg(&[]));
        assert!(!rendered.contains(DEFAULT_PASSWORD));
    }
}
