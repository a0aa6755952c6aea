#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {detail}")]
    Status {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("credential refresh failed: {0}")]
    RefreshFailed(Box<Error>),

    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("session was invalidated")]
    SessionInvalidated,

    #[error("Token decode error: {0}")]
    Token(String),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the server rejected the credentials (`401 Unauthorized`).
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Whether this error ended the session.
    #[must_use]
    pub fn is_refresh_failure(&self) -> bool {
        matches!(self, Self::RefreshFailed(_))
    }

    pub(crate) fn refresh_failed(cause: Error) -> Self {
        match cause {
            already @ Self::RefreshFailed(_) => already,
            other => Self::RefreshFailed(Box::new(other)),
        }
    }
}
