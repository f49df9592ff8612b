//! Portal session configuration.
//!
//! Base URLs and timeouts come from the environment; credentials are
//! passed explicitly at session construction, never read from globals.
//! `Debug` on [`PortalCredentials`] redacts the password so it cannot
//! leak into log output.

use tributo_core::Rut;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::PortalError;

/// Default per-call timeout, in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for connecting to the tax portal.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Base URL for authenticated resource calls.
    /// Default: <https://misiir.sii.cl>
    pub base_url: Url,
    /// URL the login form is posted to.
    pub login_url: Url,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Whether the RPA browser (when one backs the session) runs headless.
    pub headless: bool,
}

impl PortalConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `PORTAL_BASE_URL` (default: `https://misiir.sii.cl`)
    /// - `PORTAL_LOGIN_URL` (default: `{base}/cgi_AUT2000/CAutInicio.cgi`)
    /// - `PORTAL_TIMEOUT_SECONDS` (default: 30)
    /// - `HEADLESS_BROWSER` (default: true)
    pub fn from_env() -> Result<Self, PortalError> {
        let base_url = env_url("PORTAL_BASE_URL", "https://misiir.sii.cl")?;
        let default_login = format!("{}cgi_AUT2000/CAutInicio.cgi", base_url);
        let login_url = env_url("PORTAL_LOGIN_URL", &default_login)?;
        let timeout_secs = std::env::var("PORTAL_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let headless = std::env::var("HEADLESS_BROWSER")
            .map(|s| s != "0" && !s.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        Ok(Self {
            base_url,
            login_url,
            timeout_secs,
            headless,
        })
    }

    /// Configuration pointing at a local mock server (for tests).
    pub fn local(base: &str) -> Result<Self, PortalError> {
        let base_url: Url = base
            .parse()
            .map_err(|e| PortalError::Config(format!("invalid base URL {base}: {e}")))?;
        let login_url = base_url
            .join("login")
            .map_err(|e| PortalError::Config(format!("invalid login URL: {e}")))?;
        Ok(Self {
            base_url,
            login_url,
            timeout_secs: 5,
            headless: true,
        })
    }
}

fn env_url(var: &str, default: &str) -> Result<Url, PortalError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|e| PortalError::Config(format!("invalid URL for {var}: {e}")))
}

/// The credential pair a session is constructed with.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PortalCredentials {
    #[zeroize(skip)]
    tax_id: Rut,
    password: String,
}

impl PortalCredentials {
    pub fn new(tax_id: Rut, password: String) -> Self {
        Self { tax_id, password }
    }

    pub fn tax_id(&self) -> Rut {
        self.tax_id
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("tax_id", &self.tax_id.canonical())
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = PortalCredentials::new(
            Rut::parse("77794858-K").unwrap(),
            "s3cret".into(),
        );
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("77794858-K"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn local_config_builds() {
        let config = PortalConfig::local("http://127.0.0.1:8099").unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert!(config.login_url.as_str().ends_with("/login"));
    }
}
