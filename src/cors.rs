//! Exact-match CORS origin allowlist.

use std::collections::HashSet;

/// A request without an `Origin` header is not a cross-origin request and
/// passes. Otherwise the origin must match one configured entry exactly,
/// case-sensitively.
pub fn is_origin_allowed(origin: Option<&str>, allowed: &HashSet<String>) -> bool {
    match origin {
        None => true,
        Some(origin) => allowed.contains(origin),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> HashSet<String> {
        ["https://app.example".to_string(), "https://admin.example".to_string()]
            .into_iter()
            .collect()
    }

    #[test]
    fn no_origin_passes() {
        assert!(is_origin_allowed(None, &allowed()));
    }

    #[test]
    fn listed_origin_passes() {
        assert!(is_origin_allowed(Some("https://app.example"), &allowed()));
    }

    #[test]
    fn unlisted_origin_fails() {
        assert!(!is_origin_allowed(Some("https://evil.example"), &allowed()));
    }

    #[test]
    fn matching_is_exact_and_case_sensitive() {
        assert!(!is_origin_allowed(Some("https://APP.example"), &allowed()));
        assert!(!is_origin_allowed(Some("https://app.example/"), &allowed()));
        assert!(!is_origin_allowed(Some("http://app.example"), &allowed()));
    }

    #[test]
    fn empty_allowlist_rejects_all_cross_origin() {
        assert!(!is_origin_allowed(Some("https://app.example"), &HashSet::new()));
        assert!(is_origin_allowed(None, &HashSet::new()));
    }
}
