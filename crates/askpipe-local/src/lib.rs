use askpipe_core::{Error, Result};
use std::time::Duration;

pub mod llm;
pub mod scrape;
pub mod search;
pub mod transport;

/// Read an env var, trimming and treating the empty string as unset.
pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Shared HTTP client with safety defaults.
///
/// Per-request timeouts still apply on top; these only prevent a
/// hang-forever on DNS/TLS/body stalls.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("askpipe/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;
    use testutil::{EnvGuard, ENV_LOCK};

    #[test]
    fn empty_env_values_are_treated_as_unset() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g = EnvGuard::set("ASKPIPE_TEST_EMPTY", "   ");
        assert!(env("ASKPIPE_TEST_EMPTY").is_none());
        let _g2 = EnvGuard::set("ASKPIPE_TEST_EMPTY", " value ");
        assert_eq!(env("ASKPIPE_TEST_EMPTY").as_deref(), Some("value"));
    }

    #[test]
    fn http_client_builds() {
        assert!(http_client().is_ok());
    }
}
