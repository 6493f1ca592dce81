use url::Url;

/// Canonical identity for a page: host (with non-default port) plus path.
///
/// Scheme, query string and fragment are dropped, so every variant of a
/// shared link lands on the same cache and store key. Input that does not
/// parse as an absolute URL with a host is returned unchanged.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return raw.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return raw.to_string();
    };

    let mut key = host.to_string();
    if let Some(port) = parsed.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(parsed.path());
    key
}

/// Absolute URL for fetching. A bare `host/path` (such as a cache key) gets
/// an `https://` scheme; anything else unparseable is returned unchanged.
pub fn absolute_url(raw: &str) -> String {
    match parse_absolute(raw) {
        Some(parsed) => parsed.to_string(),
        None => raw.to_string(),
    }
}

/// Scheme + host + path, suitable for display and for linking back to the page.
pub fn display_url(raw: &str) -> String {
    match parse_absolute(raw) {
        Some(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        None => raw.to_string(),
    }
}

fn parse_absolute(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    let parsed = match Url::parse(trimmed) {
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", trimmed)),
        other => other,
    };
    parsed.ok().filter(|u| u.host_str().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_and_fragment_share_identity() {
        assert_eq!(normalize_url("https://x.com/e?ref=1#top"), "x.com/e");
        assert_eq!(normalize_url("https://x.com/e"), "x.com/e");
        assert_eq!(normalize_url("https://x.com/e?ref=2"), "x.com/e");
    }

    #[test]
    fn test_scheme_is_not_part_of_identity() {
        assert_eq!(normalize_url("http://x.com/e"), normalize_url("https://x.com/e"));
    }

    #[test]
    fn test_port_is_kept() {
        assert_eq!(normalize_url("http://localhost:8080/events/1"), "localhost:8080/events/1");
        assert_eq!(normalize_url("https://x.com:443/e"), "x.com/e");
    }

    #[test]
    fn test_malformed_input_returned_unchanged() {
        assert_eq!(normalize_url("not a url"), "not a url");
        assert_eq!(normalize_url("x.com/e"), "x.com/e");
        assert_eq!(normalize_url("mailto:someone@x.com"), "mailto:someone@x.com");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn test_display_url_strips_query() {
        assert_eq!(display_url("https://x.com/e?ref=1#top"), "https://x.com/e");
    }

    #[test]
    fn test_bare_key_gets_https_scheme() {
        assert_eq!(display_url("x.com/e"), "https://x.com/e");
        assert_eq!(absolute_url("x.com/e?id=7"), "https://x.com/e?id=7");
        assert_eq!(normalize_url(&absolute_url("x.com/e")), "x.com/e");
        assert_eq!(display_url("not a url"), "not a url");
        assert_eq!(absolute_url(""), "");
    }
}
