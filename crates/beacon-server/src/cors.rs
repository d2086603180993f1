//! Cross-origin headers for the stream endpoint.

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue};

/// Pick the `Access-Control-Allow-Origin` value.
///
/// An empty allow-list allows any origin. A matching entry, or a `*` entry,
/// echoes the request origin. Anything else gets the first configured entry.
#[must_use]
pub fn allowed_origin<'a>(allowed: &'a [String], origin: Option<&'a str>) -> &'a str {
    let Some(first) = allowed.first() else {
        return "*";
    };
    let wildcard = allowed.iter().any(|a| a == "*");

    match origin {
        Some(origin) if wildcard || allowed.iter().any(|a| a == origin) => origin,
        None if wildcard => "*",
        _ => first,
    }
}

/// CORS response headers for a request from `origin`.
#[must_use]
pub fn cors_headers(allowed: &[String], origin: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(allowed_origin(allowed, origin)) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    if !allowed.is_empty() {
        headers.insert(VARY, HeaderValue::from_static("Origin"));
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origins(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_list_allows_any() {
        assert_eq!(allowed_origin(&[], Some("https://a.example")), "*");
        assert_eq!(allowed_origin(&[], None), "*");
    }

    #[test]
    fn test_matching_origin_is_echoed() {
        let allowed = origins(&["https://a.example", "https://b.example"]);
        assert_eq!(
            allowed_origin(&allowed, Some("https://b.example")),
            "https://b.example"
        );
    }

    #[test]
    fn test_unmatched_origin_gets_first_entry() {
        let allowed = origins(&["https://a.example", "https://b.example"]);
        assert_eq!(
            allowed_origin(&allowed, Some("https://evil.example")),
            "https://a.example"
        );
        assert_eq!(allowed_origin(&allowed, None), "https://a.example");
    }

    #[test]
    fn test_wildcard_entry_echoes() {
        let allowed = origins(&["https://a.example", "*"]);
        assert_eq!(
            allowed_origin(&allowed, Some("https://c.example")),
            "https://c.example"
        );
        assert_eq!(allowed_origin(&allowed, None), "*");
    }

    #[test]
    fn test_headers() {
        let headers = cors_headers(&[], None);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
        assert!(headers.get(VARY).is_none());
    }
}
