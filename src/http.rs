//! Request-side HTTP types: methods, the case-insensitive header map and
//! the immutable [`Request`] value produced by the parser.

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Options,
    Unknown,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Self {
        match b {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"OPTIONS" => Method::Options,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Options => "OPTIONS",
            Method::Unknown => "UNKNOWN",
        }
    }
}

/// Header storage with case-insensitive lookup. The first value wins for
/// repeated keys; the parser rejects the duplicates that matter (`Host`).
#[derive(Debug, Default, Clone)]
pub struct HeaderMap {
    inner: HashMap<String, String>,
}

impl HeaderMap {
    pub fn insert(&mut self, key: &str, value: String) {
        self.inner.entry(key.to_ascii_lowercase()).or_insert(value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(&key.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// One uploaded file from a multipart body. The filename is already reduced
/// to its basename.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field_name: String,
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A fully parsed request. Immutable once produced by the parser, except
/// for the claims attached by the security gate after token validation.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) params: HashMap<String, String>,
    pub(crate) json: Option<Value>,
    pub(crate) file_parts: Vec<FilePart>,
    pub(crate) body: Vec<u8>,
    pub(crate) remote_ip: String,
    pub(crate) claims: Option<HashMap<String, String>>,
}

impl Request {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn remote_ip(&self) -> &str {
        &self.remote_ip
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Form/multipart parameters by name.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// The decoded JSON payload, when the body was `application/json`.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn file_parts(&self) -> &[FilePart] {
        &self.file_parts
    }

    pub fn file_upload(&self, field_name: &str) -> Option<&FilePart> {
        self.file_parts.iter().find(|p| p.field_name == field_name)
    }

    /// Raw parameter lookup: form parameters first, JSON payload second.
    /// Scalar JSON values are rendered to their string form.
    pub fn raw_param(&self, name: &str) -> Option<String> {
        if let Some(v) = self.params.get(name) {
            return Some(v.clone());
        }
        match self.json.as_ref()?.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// The token from `Authorization: Bearer <token>`, if present.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers.get("authorization")?.strip_prefix("Bearer ")
    }

    /// Tracing identifier propagated by the caller; empty when absent.
    pub fn request_id(&self) -> &str {
        self.headers.get("x-request-id").unwrap_or("")
    }

    /// Whether the client asked for the connection to be closed after this
    /// exchange.
    pub fn wants_close(&self) -> bool {
        self.headers
            .get("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }

    /// Validated token claims, present on secure endpoints after the gate
    /// accepted the request.
    pub fn claims(&self) -> Option<&HashMap<String, String>> {
        self.claims.as_ref()
    }

    /// The authenticated user, for logging and handler identity.
    pub fn user(&self) -> &str {
        self.claims
            .as_ref()
            .and_then(|c| c.get("user"))
            .map(String::as_str)
            .unwrap_or("not available")
    }

    pub(crate) fn set_claims(&mut self, claims: HashMap<String, String>) {
        self.claims = Some(claims);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trip() {
        assert_eq!(Method::from_bytes(b"GET"), Method::Get);
        assert_eq!(Method::from_bytes(b"POST"), Method::Post);
        assert_eq!(Method::from_bytes(b"OPTIONS"), Method::Options);
        assert_eq!(Method::from_bytes(b"PATCH"), Method::Unknown);
        assert_eq!(Method::from_bytes(b"get"), Method::Unknown);
    }

    #[test]
    fn header_map_is_case_insensitive_first_wins() {
        let mut h = HeaderMap::default();
        h.insert("Content-Type", "application/json".to_string());
        h.insert("CONTENT-TYPE", "text/plain".to_string());
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert_eq!(h.get("Content-Type"), Some("application/json"));
        assert_eq!(h.len(), 1);
    }
}
