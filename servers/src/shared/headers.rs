use axum::http::HeaderMap;

/// Header carrying the caller identity.
pub const IDENTITY_HEADER: &str = "x-user-id";

/// Raw identity header value, if present and valid UTF-8.
pub fn identity_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_header_is_read() {
        let mut headers = HeaderMap::new();
        assert_eq!(identity_from(&headers), None);
        headers.insert(IDENTITY_HEADER, "alice".parse().unwrap());
        assert_eq!(identity_from(&headers).as_deref(), Some("alice"));
    }
}
