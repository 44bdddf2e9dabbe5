use http::HeaderMap;

pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Rate limit information reported by the server on a single response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Calls left in the current window.
    pub remaining: Option<i64>,
    /// Seconds until the window resets.
    pub reset_after: Option<f64>,
    /// The server's own bucket identifier.
    pub bucket: Option<String>,
    /// Seconds to wait before retrying (429 only).
    pub retry_after: Option<f64>,
    /// The 429 applies to every bucket.
    pub global: bool,
}

impl RateLimitHeaders {
    pub fn parse(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_str(headers, HEADER_REMAINING).and_then(|v| v.parse().ok()),
            reset_after: header_str(headers, HEADER_RESET_AFTER).and_then(parse_seconds),
            bucket: header_str(headers, HEADER_BUCKET)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            retry_after: header_str(headers, HEADER_RETRY_AFTER).and_then(parse_seconds),
            global: header_str(headers, HEADER_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn parse_seconds(value: &str) -> Option<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn test_parse_all_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, HeaderValue::from_static("3"));
        headers.insert(HEADER_RESET_AFTER, HeaderValue::from_static("1.5"));
        headers.insert(HEADER_BUCKET, HeaderValue::from_static("abcd1234"));
        headers.insert(HEADER_RETRY_AFTER, HeaderValue::from_static("2"));
        headers.insert(HEADER_GLOBAL, HeaderValue::from_static("true"));

        let parsed = RateLimitHeaders::parse(&headers);
        assert_eq!(parsed.remaining, Some(3));
        assert_eq!(parsed.reset_after, Some(1.5));
        assert_eq!(parsed.bucket.as_deref(), Some("abcd1234"));
        assert_eq!(parsed.retry_after, Some(2.0));
        assert!(parsed.global);
    }

    #[test]
    fn test_parse_missing_and_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, HeaderValue::from_static("lots"));
        headers.insert(HEADER_RETRY_AFTER, HeaderValue::from_static("-4"));
        headers.insert(HEADER_GLOBAL, HeaderValue::from_static("false"));

        let parsed = RateLimitHeaders::parse(&headers);
        assert_eq!(parsed, RateLimitHeaders::default());
    }
}
