use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// User-supplied profile fields, stored verbatim under the `user` key.
pub type Profile = Map<String, JsonValue>;

/// TripMate login identifier (the `userId` chosen at sign-up).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginRequest<'a> {
    pub(crate) user_id: &'a UserId,
    pub(crate) password: &'a str,
}

/// Response from the login endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub user: Profile,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub(crate) refresh_token: &'a str,
}

/// Response from the refresh endpoint.
///
/// Older backends return the rotated token as `newRefreshToken`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default, alias = "newRefreshToken")]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_uses_camel_case() {
        let user_id = UserId::from("traveller01");
        let body = serde_json::to_value(LoginRequest {
            user_id: &user_id,
            password: "pw",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"userId": "traveller01", "password": "pw"}));
    }

    #[test]
    fn refresh_response_accepts_both_rotation_names() {
        let current: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"a","refreshToken":"r"}"#).unwrap();
        assert_eq!(current.refresh_token.as_deref(), Some("r"));

        let legacy: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"a","newRefreshToken":"r2"}"#).unwrap();
        assert_eq!(legacy.refresh_token.as_deref(), Some("r2"));

        let bare: RefreshResponse = serde_json::from_str(r#"{"accessToken":"a"}"#).unwrap();
        assert!(bare.refresh_token.is_none());
    }

    #[test]
    fn login_response_without_refresh_token() {
        let resp: LoginResponse =
            serde_json::from_str(r#"{"token":"t","user":{"nickname":"kim"}}"#).unwrap();
        assert_eq!(resp.token, "t");
        assert!(resp.refresh_token.is_none());
        assert_eq!(resp.user.get("nickname").and_then(|v| v.as_str()), Some("kim"));
    }

    #[test]
    fn user_id_display() {
        assert_eq!(UserId::from("abc").to_string(), "abc");
    }
}
