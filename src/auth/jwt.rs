//! HS256 JWT issuance and validation.
//!
//! Tokens carry a flat map of string claims plus `exp`/`iat`. A claim
//! `preauth = "true"` marks a token that is only good for the MFA
//! challenge endpoint; such tokens get the shorter MFA expiry when issued.

use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use thiserror::Error;

pub type ClaimsMap = HashMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JwtError {
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed token")]
    InvalidFormat,
    #[error("token could not be created")]
    CreationFailed,
}

pub struct Jwt {
    secret: String,
    timeout_seconds: u64,
    mfa_timeout_seconds: u64,
}

impl Jwt {
    pub fn new(secret: &str, timeout_seconds: u64, mfa_timeout_seconds: u64) -> Self {
        Self {
            secret: secret.to_string(),
            timeout_seconds,
            mfa_timeout_seconds,
        }
    }

    /// Sign a new token. Pre-auth tokens (claim `preauth = "true"`) expire
    /// on the MFA timeout, all others on the standard timeout.
    pub fn issue(&self, claims: &ClaimsMap) -> Result<String, JwtError> {
        let is_preauth = claims.get("preauth").is_some_and(|v| v == "true");
        let ttl = if is_preauth {
            self.mfa_timeout_seconds
        } else {
            self.timeout_seconds
        };

        let now = Utc::now().timestamp();
        let mut payload = Map::new();
        for (k, v) in claims {
            payload.insert(k.clone(), Value::String(v.clone()));
        }
        payload.insert("iat".to_string(), Value::from(now));
        payload.insert("exp".to_string(), Value::from(now + ttl as i64));

        encode(
            &Header::default(),
            &payload,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|_| JwtError::CreationFailed)
    }

    /// Verify signature and expiration; returns the claims on success.
    pub fn is_valid(&self, token: &str) -> Result<ClaimsMap, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Map<String, Value>>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(map_error)?;
        Ok(stringify(data.claims))
    }

    /// Decode without checking the signature. Expiration is still
    /// enforced. For logging context on paths where the signature was
    /// already verified.
    pub fn get_claims(&self, token: &str) -> Result<ClaimsMap, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.insecure_disable_signature_validation();
        let data = decode::<Map<String, Value>>(
            token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .map_err(map_error)?;
        Ok(stringify(data.claims))
    }
}

fn map_error(err: jsonwebtoken::errors::Error) -> JwtError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => JwtError::Expired,
        ErrorKind::InvalidSignature => JwtError::InvalidSignature,
        _ => JwtError::InvalidFormat,
    }
}

fn stringify(payload: Map<String, Value>) -> ClaimsMap {
    payload
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            Value::Number(n) => Some((k, n.to_string())),
            Value::Bool(b) => Some((k, b.to_string())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Jwt {
        Jwt::new("unit-test-secret", 900, 300)
    }

    #[test]
    fn issue_and_validate_round_trip() {
        let jwt = service();
        let claims: ClaimsMap = [("user".to_string(), "alice".to_string())].into();
        let token = jwt.issue(&claims).unwrap();

        let decoded = jwt.is_valid(&token).unwrap();
        assert_eq!(decoded.get("user").map(String::as_str), Some("alice"));
        assert!(decoded.contains_key("exp"));
        assert!(decoded.contains_key("iat"));
    }

    #[test]
    fn preauth_tokens_use_mfa_expiry() {
        let jwt = service();
        let preauth: ClaimsMap = [
            ("user".to_string(), "bob".to_string()),
            ("preauth".to_string(), "true".to_string()),
        ]
        .into();
        let token = jwt.issue(&preauth).unwrap();
        let decoded = jwt.is_valid(&token).unwrap();

        let exp: i64 = decoded["exp"].parse().unwrap();
        let iat: i64 = decoded["iat"].parse().unwrap();
        assert_eq!(exp - iat, 300);
        assert_eq!(decoded.get("preauth").map(String::as_str), Some("true"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = service().issue(&ClaimsMap::new()).unwrap();
        let other = Jwt::new("different-secret", 900, 300);
        assert_eq!(other.is_valid(&token), Err(JwtError::InvalidSignature));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let jwt = service();
        for bad in ["", "abc", "a.b.c", "eyJhbGciOiJIUzI1NiJ9.e30.zzz"] {
            assert!(jwt.is_valid(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn get_claims_ignores_signature_but_reads_payload() {
        let token = {
            let claims: ClaimsMap = [("user".to_string(), "carol".to_string())].into();
            service().issue(&claims).unwrap()
        };
        // A service with a different secret can still read the claims.
        let other = Jwt::new("not-the-signer", 900, 300);
        let decoded = other.get_claims(&token).unwrap();
        assert_eq!(decoded.get("user").map(String::as_str), Some("carol"));
        assert!(other.is_valid(&token).is_err());
    }
}
