use std::time::Duration;

use url::Url;

use crate::error::Error;

/// TripMate client configuration.
///
/// The base URL is the only required field; every endpoint path and
/// transport setting has a default matching the TripMate backend.
///
/// ```rust,ignore
/// use tripmate_client::ClientConfig;
///
/// let config = ClientConfig::new("http://192.168.219.100:5000".parse()?)
///     .with_timeout(std::time::Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) refresh_path: String,
    pub(crate) login_path: String,
    pub(crate) profile_path: String,
    pub(crate) timeout: Duration,
    pub(crate) expiry_leeway: Duration,
}

impl ClientConfig {
    /// Create a configuration for the backend at `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            refresh_path: "/api/auth/refresh".into(),
            login_path: "/api/auth/login".into(),
            profile_path: "/user/me".into(),
            timeout: Duration::from_secs(180),
            expiry_leeway: Duration::ZERO,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `TRIPMATE_BASE_URL`: backend origin (must be a valid URL)
    ///
    /// # Optional env vars
    /// - `TRIPMATE_TIMEOUT_SECS`: transport timeout in seconds
    /// - `TRIPMATE_EXPIRY_LEEWAY_SECS`: treat tokens as expired this many seconds early
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the base URL is missing or a value does not parse.
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var("TRIPMATE_BASE_URL")
            .map_err(|_| Error::Config("TRIPMATE_BASE_URL is required".into()))?;
        let base_url: Url = base_url
            .parse()
            .map_err(|e| Error::Config(format!("TRIPMATE_BASE_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Ok(secs) = std::env::var("TRIPMATE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| Error::Config(format!("TRIPMATE_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Ok(secs) = std::env::var("TRIPMATE_EXPIRY_LEEWAY_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| Error::Config(format!("TRIPMATE_EXPIRY_LEEWAY_SECS: {e}")))?;
            config = config.with_expiry_leeway(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Override the token refresh endpoint path (default: `/api/auth/refresh`).
    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Override the login endpoint path (default: `/api/auth/login`).
    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Override the current-user endpoint path (default: `/user/me`).
    #[must_use]
    pub fn with_profile_path(mut self, path: impl Into<String>) -> Self {
        self.profile_path = path.into();
        self
    }

    /// Override the transport timeout for every request (default: 180 seconds).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Treat tokens as expired this long before their `exp` (default: zero).
    #[must_use]
    pub fn with_expiry_leeway(mut self, leeway: Duration) -> Self {
        self.expiry_leeway = leeway;
        self
    }

    /// Backend origin every path is resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Path of the token refresh endpoint.
    #[must_use]
    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    /// Path of the login endpoint.
    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Path of the current-user endpoint used to restore a missing profile.
    #[must_use]
    pub fn profile_path(&self) -> &str {
        &self.profile_path
    }

    /// Transport timeout applied to every request.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How early a token is treated as expired.
    #[must_use]
    pub fn expiry_leeway(&self) -> Duration {
        self.expiry_leeway
    }

    /// Resolve a request path against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid path {path:?}: {e}")))
    }

    /// Build the transport client for this configuration.
    pub(crate) fn http_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        "http://localhost:5000".parse().unwrap()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::new(base());
        assert_eq!(config.refresh_path(), "/api/auth/refresh");
        assert_eq!(config.login_path(), "/api/auth/login");
        assert_eq!(config.profile_path(), "/user/me");
        assert_eq!(config.timeout(), Duration::from_secs(180));
        assert_eq!(config.expiry_leeway(), Duration::ZERO);
    }

    #[test]
    fn overrides() {
        let config = ClientConfig::new(base())
            .with_refresh_path("/auth/renew")
            .with_login_path("/auth/sign-in")
            .with_profile_path("/auth/me")
            .with_timeout(Duration::from_secs(5))
            .with_expiry_leeway(Duration::from_secs(30));
        assert_eq!(config.refresh_path(), "/auth/renew");
        assert_eq!(config.login_path(), "/auth/sign-in");
        assert_eq!(config.profile_path(), "/auth/me");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.expiry_leeway(), Duration::from_secs(30));
    }

    #[test]
    fn endpoint_joins_base() {
        let config = ClientConfig::new(base());
        let url = config.endpoint("/api/schedule/shared").unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/schedule/shared");
    }
}
