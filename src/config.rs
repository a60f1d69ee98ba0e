//! HTTP client configuration, per the specification's §4.3.
//!
//! Mirrors the teacher's `config/mod.rs::HttpConfig` field set, narrowed to
//! exactly what the spec names (timeout, user agent), with the same
//! lazily-constructed, mutex-guarded, reused-client pattern as
//! `config/client.rs`'s `ClientConfig::validate` sibling methods.

use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ChainError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const PROJECT_URL: &str = "https://github.com/fluent-ai/fluent-ai";

struct ClientSlot {
    client: reqwest::Client,
    timeout: Duration,
}

/// Per-chain HTTP configuration: request timeout, User-Agent, and a
/// lazily constructed, reusable HTTP client guarded by an internal lock.
pub struct HttpConfig {
    timeout: Mutex<Duration>,
    custom_user_agent: Option<String>,
    client: Mutex<Option<ClientSlot>>,
}

impl std::fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConfig")
            .field("timeout", &*self.timeout.lock().unwrap_or_else(|p| p.into_inner()))
            .field("custom_user_agent", &self.custom_user_agent)
            .finish_non_exhaustive()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Mutex::new(DEFAULT_TIMEOUT),
            custom_user_agent: None,
            client: Mutex::new(None),
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Mutex::new(timeout),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.custom_user_agent = Some(user_agent.into());
        self
    }

    pub fn set_timeout(&self, timeout: Duration) {
        let mut guard = self.timeout.lock().unwrap_or_else(|p| p.into_inner());
        *guard = timeout;
    }

    #[must_use]
    pub fn get_user_agent(&self) -> String {
        match &self.custom_user_agent {
            Some(ua) if !ua.is_empty() => ua.clone(),
            _ => format!(
                "X.509-Certificate-Chain-Resolver/{} (+{})",
                env!("CARGO_PKG_VERSION"),
                PROJECT_URL
            ),
        }
    }

    /// Returns a reusable HTTP client with the current timeout applied.
    /// The first call constructs the client; later calls rebuild it only
    /// if the timeout changed since the last access.
    pub fn client(&self) -> Result<reqwest::Client> {
        let current_timeout = *self.timeout.lock().unwrap_or_else(|p| p.into_inner());
        let mut guard = self.client.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(slot) = guard.as_ref() {
            if slot.timeout == current_timeout {
                return Ok(slot.client.clone());
            }
        }

        let client = reqwest::Client::builder()
            .timeout(current_timeout)
            .user_agent(self.get_user_agent())
            .build()
            .map_err(|e| ChainError::Internal(format!("failed to build HTTP client: {e}")))?;

        *guard = Some(ClientSlot {
            client: client.clone(),
            timeout: current_timeout,
        });
        Ok(client)
    }

    /// Validates the configuration; a zero timeout would make every
    /// request fail immediately, so it is rejected up front.
    pub fn validate(&self) -> Result<()> {
        let timeout = *self.timeout.lock().unwrap_or_else(|p| p.into_inner());
        if timeout.is_zero() {
            return Err(ChainError::Internal(
                "HTTP timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_user_agent_contains_version() {
        let cfg = HttpConfig::new();
        assert!(cfg.get_user_agent().starts_with("X.509-Certificate-Chain-Resolver/"));
    }

    #[test]
    fn custom_user_agent_overrides_default() {
        let cfg = HttpConfig::new().with_user_agent("my-agent/1.0");
        assert_eq!(cfg.get_user_agent(), "my-agent/1.0");
    }

    #[test]
    fn client_construction_succeeds_twice() {
        let cfg = HttpConfig::new();
        cfg.client().expect("first client build");
        cfg.client().expect("second client build reuses cached client");
    }

    #[test]
    fn changing_timeout_rebuilds_client() {
        let cfg = HttpConfig::new();
        cfg.client().expect("client");
        cfg.set_timeout(Duration::from_secs(5));
        cfg.client().expect("client rebuilt with new timeout");
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let cfg = HttpConfig::with_timeout(Duration::from_secs(0));
        assert!(cfg.validate().is_err());
    }
}
