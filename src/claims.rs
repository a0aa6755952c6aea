//! Unverified JWT payload decoding.
//!
//! The backend is trusted; claims are read only to predict expiry on the
//! client. Signatures are never checked here.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::Error;

/// Claims read from a JWT payload without signature verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiry as Unix seconds. Fractional values are floored.
    #[serde(
        default,
        deserialize_with = "deserialize_exp",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Claims {
    /// Gets a claim value other than `exp` by key.
    #[must_use]
    pub fn get_claim(&self, key: &str) -> Option<&JsonValue> {
        self.extra.get(key)
    }

    /// Whether the token is past expiry at `now` (Unix seconds).
    ///
    /// A token without an `exp` claim never expires.
    #[must_use]
    pub fn is_expired_at(&self, now: i64, leeway_secs: i64) -> bool {
        self.exp.is_some_and(|exp| exp.saturating_sub(leeway_secs) < now)
    }

    /// Whole minutes until expiry at `now`, floored and never negative.
    #[must_use]
    pub fn minutes_until_expiry(&self, now: i64) -> u64 {
        match self.exp {
            Some(exp) => u64::try_from(exp.saturating_sub(now).max(0) / 60).unwrap_or(0),
            None => 0,
        }
    }
}

// NumericDate may carry a fraction; out-of-range values saturate.
#[allow(clippy::cast_possible_truncation)]
fn deserialize_exp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<Number>::deserialize(deserializer)?;
    Ok(number.and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64))))
}

/// Decodes the payload segment of a JWT.
///
/// # Errors
///
/// Returns `Error::Token` if the token is not three dot-separated segments or
/// the payload is not base64url-encoded JSON.
pub fn decode_claims(token: &str) -> Result<Claims, Error> {
    let payload = payload_segment(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| Error::Token("invalid payload encoding".into()))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Token(format!("invalid payload: {e}")))
}

/// Whether `token` should be replaced before use.
///
/// Malformed tokens count as expired.
#[must_use]
pub fn is_expired(token: &str, now: i64, leeway_secs: i64) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims.is_expired_at(now, leeway_secs),
        Err(_) => true,
    }
}

/// Current Unix time in seconds.
#[must_use]
pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn payload_segment(token: &str) -> Result<&str, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts[1].is_empty() {
        return Err(Error::Token("invalid token format".into()));
    }
    Ok(parts[1])
}

#[cfg(test)]
pub(crate) fn test_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"traveller","exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exp_and_extra_claims() {
        let claims = decode_claims(&test_token(1_700_000_000)).unwrap();
        assert_eq!(claims.exp, Some(1_700_000_000));
        assert_eq!(
            claims.get_claim("sub").and_then(|v| v.as_str()),
            Some("traveller")
        );
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(decode_claims("only.two").is_err());
        assert!(decode_claims("a.b.c.d").is_err());
        assert!(decode_claims("").is_err());
    }

    #[test]
    fn rejects_non_json_payload() {
        let payload = URL_SAFE_NO_PAD.encode(b"not json");
        assert!(decode_claims(&format!("h.{payload}.s")).is_err());
    }

    #[test]
    fn tolerates_padded_payload() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":5}"#);
        let claims = decode_claims(&format!("h.{payload}.s")).unwrap();
        assert_eq!(claims.exp, Some(5));
    }

    #[test]
    fn expiry_is_strictly_past() {
        let claims = decode_claims(&test_token(100)).unwrap();
        assert!(!claims.is_expired_at(100, 0));
        assert!(claims.is_expired_at(101, 0));
        assert!(claims.is_expired_at(90, 15));
    }

    #[test]
    fn missing_exp_never_expires() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#);
        let token = format!("h.{payload}.s");
        assert!(!is_expired(&token, i64::MAX, 0));
    }

    #[test]
    fn malformed_token_counts_as_expired() {
        assert!(is_expired("garbage", 0, 0));
    }

    #[test]
    fn minutes_until_expiry_floors() {
        let claims = decode_claims(&test_token(1_000 + 179)).unwrap();
        assert_eq!(claims.minutes_until_expiry(1_000), 2);
        assert_eq!(claims.minutes_until_expiry(5_000), 0);
    }

    #[test]
    fn fractional_exp_is_floored() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"exp":1792226397.5,"sub":"x"}"#);
        let claims = decode_claims(&format!("h.{payload}.s")).unwrap();
        assert_eq!(claims.exp, Some(1_792_226_397));
        assert!(!claims.is_expired_at(1_792_226_397, 0));
        assert!(claims.is_expired_at(1_792_226_398, 0));
    }

    #[test]
    fn null_exp_is_absent() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"exp":null}"#);
        assert_eq!(decode_claims(&format!("h.{payload}.s")).unwrap().exp, None);
    }

    #[test]
    fn extreme_exp_values_do_not_overflow() {
        let claims = decode_claims(&test_token(i64::MIN)).unwrap();
        assert!(claims.is_expired_at(0, 0));
        assert!(claims.is_expired_at(0, i64::MAX));
        assert_eq!(claims.minutes_until_expiry(i64::MAX), 0);

        let claims = decode_claims(&test_token(i64::MAX)).unwrap();
        assert!(!claims.is_expired_at(0, 0));
        assert!(claims.is_expired_at(1, i64::MAX));
        assert_eq!(claims.minutes_until_expiry(i64::MIN), u64::try_from(i64::MAX / 60).unwrap());
    }
}
