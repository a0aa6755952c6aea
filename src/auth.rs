use crate::config::ClientConfig;
use crate::error::Error;
use crate::types::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, UserId};

/// Raw client for the TripMate auth endpoints.
///
/// These calls bypass the request pipeline: no bearer header is attached and
/// a failure here never triggers another refresh.
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl AuthClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let http = config.http_client();
        Self { config, http }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange credentials for a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Status`] if the login endpoint rejects the credentials.
    pub async fn login(&self, user_id: &UserId, password: &str) -> Result<LoginResponse, Error> {
        let response = self
            .http
            .post(self.config.endpoint(&self.config.login_path)?)
            .json(&LoginRequest { user_id, password })
            .send()
            .await?;

        let response = ensure_success(response, "login").await?;
        response.json::<LoginResponse>().await.map_err(Into::into)
    }

    /// Trade a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Status`] if the refresh endpoint answers with a non-2xx status.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, Error> {
        let response = self
            .http
            .post(self.config.endpoint(&self.config.refresh_path)?)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let response = ensure_success(response, "token refresh").await?;
        response.json::<RefreshResponse>().await.map_err(Into::into)
    }
}

/// Checks HTTP response status; returns the response on success or an error with details.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let detail = response.text().await.unwrap_or_default();
    Err(Error::Status {
        operation,
        status,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> AuthClient {
        AuthClient::new(ClientConfig::new(server.url().parse().unwrap()))
    }

    #[tokio::test]
    async fn login_posts_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/auth/login")
            .match_body(Matcher::Json(json!({"userId": "traveller01", "password": "pw"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token":"t","user":{"userId":"traveller01"},"refreshToken":"r"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let resp = client.login(&"traveller01".into(), "pw").await.unwrap();

        mock.assert_async().await;
        assert_eq!(resp.token, "t");
        assert_eq!(resp.refresh_token.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn refresh_surfaces_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/auth/refresh")
            .match_body(Matcher::Json(json!({"refreshToken": "stale"})))
            .with_status(401)
            .with_body("expired")
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.refresh("stale").await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("expired"));
    }
}
