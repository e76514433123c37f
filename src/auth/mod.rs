//! The security gate applied to secure endpoints before handler execution.
//!
//! Two-state authentication: a pre-auth token (claim `preauth = "true"`)
//! may only be presented to the MFA challenge endpoint, and a fully
//! authenticated token may be presented anywhere except it. Either
//! mismatch is rejected with a security-alert log line.

pub mod jwt;

pub use jwt::{ClaimsMap, Jwt, JwtError};

use tracing::warn;

use crate::http::Request;

/// Validate the request's bearer token for a secure endpoint. Returns the
/// claims on success so the handler can read the caller's identity; `None`
/// means the caller gets a 401.
pub fn authorize(req: &Request, jwt: &Jwt, mfa_uri: &str) -> Option<ClaimsMap> {
    let Some(token) = req.bearer_token() else {
        warn!(
            "missing JWT token on request {} from {}",
            req.path(),
            req.remote_ip()
        );
        return None;
    };

    let claims = match jwt.is_valid(token) {
        Ok(claims) => claims,
        Err(err) => {
            warn!(
                "JWT validation failed for user '{}' on request {} from {}: {}",
                token_user(jwt, token),
                req.path(),
                req.remote_ip(),
                err
            );
            return None;
        }
    };

    let user = claims.get("user").map(String::as_str).unwrap_or("unknown");
    let is_preauth = claims.get("preauth").is_some_and(|v| v == "true");
    let is_target_mfa = req.path() == mfa_uri;

    if is_preauth && !is_target_mfa {
        warn!(
            "security alert: pre-auth token for user '{}' presented to '{}' from {}; access denied",
            user,
            req.path(),
            req.remote_ip()
        );
        return None;
    }
    if !is_preauth && is_target_mfa {
        warn!(
            "security alert: fully authenticated token for user '{}' re-presented to the MFA endpoint from {}; access denied",
            user,
            req.remote_ip()
        );
        return None;
    }

    Some(claims)
}

/// Best-effort identity for audit logs on tokens that failed validation:
/// a decode-only claims read, no signature check.
fn token_user(jwt: &Jwt, token: &str) -> String {
    jwt.get_claims(token)
        .ok()
        .and_then(|claims| claims.get("user").cloned())
        .unwrap_or_else(|| "unknown".to_string())
}
