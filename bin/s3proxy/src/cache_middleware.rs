//! Cache management headers
//!
//! Headers are only added when the handler did not set them, so object
//! responses keep the `Cache-Control` and `Expires` reported by the backend.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, header, header::InvalidHeaderValue},
    middleware::Next,
    response::Response,
};
use s3proxy_common::CacheConfig;
use std::sync::Arc;

const X_ACCEL_EXPIRES: HeaderName = HeaderName::from_static("x-accel-expires");

const NO_CACHE_CONTROL: &str = "no-cache, no-store, no-transform, must-revalidate, private, max-age=0";
const NO_CACHE_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 UTC";

/// Headers added to every response
#[derive(Clone, Debug, Default)]
pub struct CacheHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl CacheHeaders {
    /// No-cache headers unless caching is configured and no-cache disabled
    pub fn new(config: Option<&CacheConfig>) -> Result<Self, InvalidHeaderValue> {
        let values = match config {
            Some(cache) if !cache.no_cache_enabled => [
                (header::CACHE_CONTROL, cache.cache_control.as_str()),
                (header::EXPIRES, cache.expires.as_str()),
                (header::PRAGMA, cache.pragma.as_str()),
                (X_ACCEL_EXPIRES, cache.x_accel_expires.as_str()),
            ],
            _ => [
                (header::CACHE_CONTROL, NO_CACHE_CONTROL),
                (header::EXPIRES, NO_CACHE_EXPIRES),
                (header::PRAGMA, "no-cache"),
                (X_ACCEL_EXPIRES, "0"),
            ],
        };

        let headers = values
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| HeaderValue::from_str(value).map(|value| (name, value)))
            .collect::<Result<_, _>>()?;
        Ok(Self { headers })
    }
}

/// Cache headers middleware
pub async fn cache_layer(State(cache): State<Arc<CacheHeaders>>, request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    for (name, value) in &cache.headers {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }

    response
}
