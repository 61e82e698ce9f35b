//! Client-facing view of a request behind reverse proxies

use http::{HeaderMap, Uri};
use http::header::HOST;

const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const FORWARDED: &str = "forwarded";

/// Host, scheme and URI as the client sent them
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestInfo {
    /// Lowercased host, port included when present
    pub host: String,
    pub scheme: String,
    /// Path and query
    pub request_uri: String,
}

impl RequestInfo {
    pub fn new(headers: &HeaderMap, uri: &Uri) -> Self {
        Self {
            host: request_host(headers, uri),
            scheme: request_scheme(headers),
            request_uri: request_uri(uri),
        }
    }

    /// Absolute URL of the request
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.request_uri)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Value of `key` in the first element of a `Forwarded` header
fn forwarded_param(headers: &HeaderMap, key: &str) -> Option<String> {
    let value = header(headers, FORWARDED)?;
    let first = value.split(',').next()?;
    first
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// `X-Forwarded-Host`, then `Forwarded: host=`, then `Host`
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    header(headers, X_FORWARDED_HOST)
        .map(str::to_string)
        .or_else(|| forwarded_param(headers, "host"))
        .or_else(|| header(headers, HOST.as_str()).map(str::to_string))
        .or_else(|| uri.authority().map(|a| a.as_str().to_string()))
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// `https` only when the proxy headers say so
pub fn request_scheme(headers: &HeaderMap) -> String {
    if let Some(proto) = header(headers, X_FORWARDED_PROTO) {
        return if proto.eq_ignore_ascii_case("https") {
            "https".to_string()
        } else {
            "http".to_string()
        };
    }

    match forwarded_param(headers, "proto") {
        Some(proto) => proto.to_ascii_lowercase(),
        None => "http".to_string(),
    }
}

pub fn request_uri(uri: &Uri) -> String {
    uri.path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_host_precedence() {
        let uri: Uri = "/docs/".parse().unwrap();

        let h = headers(&[("host", "Internal:8080")]);
        assert_eq!(request_host(&h, &uri), "internal:8080");

        let h = headers(&[("host", "internal"), ("forwarded", "for=1.2.3.4;host=Files.Example.com;proto=https")]);
        assert_eq!(request_host(&h, &uri), "files.example.com");

        let h = headers(&[
            ("host", "internal"),
            ("forwarded", "host=a.example.com"),
            ("x-forwarded-host", "b.example.com"),
        ]);
        assert_eq!(request_host(&h, &uri), "b.example.com");
    }

    #[test]
    fn test_scheme() {
        assert_eq!(request_scheme(&HeaderMap::new()), "http");
        assert_eq!(request_scheme(&headers(&[("x-forwarded-proto", "HTTPS")])), "https");
        assert_eq!(request_scheme(&headers(&[("x-forwarded-proto", "ws")])), "http");
        assert_eq!(request_scheme(&headers(&[("forwarded", "proto=https")])), "https");
    }

    #[test]
    fn test_url_keeps_query() {
        let uri: Uri = "/docs/a.txt?x=1".parse().unwrap();
        let info = RequestInfo::new(&headers(&[("host", "files")]), &uri);
        assert_eq!(info.request_uri, "/docs/a.txt?x=1");
        assert_eq!(info.url(), "http://files/docs/a.txt?x=1");
    }
}
