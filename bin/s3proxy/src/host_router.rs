//! Host based dispatch
//!
//! Lookup order: exact host, then host globs in registration order, then the
//! `*` default. Host patterns are compiled when they are registered; a
//! pattern that failed to compile is reported when a lookup reaches it.

use axum::Router;
use s3proxy_common::{Glob, GlobError};
use std::collections::HashMap;

/// Host pattern matching every host
pub const ANY_HOST: &str = "*";

struct HostPattern {
    glob: Result<Glob, GlobError>,
    router: Router,
}

/// Immutable host table of one router generation
#[derive(Default)]
pub struct HostRouter {
    exact: HashMap<String, Router>,
    patterns: Vec<HostPattern>,
    default: Option<Router>,
}

impl HostRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `router` for `host`, an empty host meaning any host
    pub fn map(&mut self, host: &str, router: Router) {
        let host = host.trim().to_ascii_lowercase();

        if host.is_empty() || host == ANY_HOST {
            self.default = Some(router);
            return;
        }

        if host.contains(['*', '?', '[', '{']) {
            self.patterns.push(HostPattern {
                glob: Glob::new(&host),
                router,
            });
        } else {
            self.exact.insert(host, router);
        }
    }

    /// Router serving `host`, `None` when nothing is mapped for it
    pub fn resolve(&self, host: &str) -> Result<Option<&Router>, GlobError> {
        let host = host.to_ascii_lowercase();

        if let Some(router) = self.exact.get(&host) {
            return Ok(Some(router));
        }

        for pattern in &self.patterns {
            let glob = pattern.glob.as_ref().map_err(Clone::clone)?;
            if glob.is_match(&host) {
                return Ok(Some(&pattern.router));
            }
        }

        Ok(self.default.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn named(name: &'static str) -> Router {
        Router::new().route("/", get(move || async move { name }))
    }

    async fn hit(router: &HostRouter, host: &str) -> Option<String> {
        let router = router.resolve(host).unwrap()?.clone();
        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        Some(String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_lookup_order() {
        let mut hosts = HostRouter::new();
        hosts.map("*", named("default"));
        hosts.map("*.localhost", named("star"));
        hosts.map("LocalHost", named("exact"));

        assert_eq!(hit(&hosts, "localhost").await.as_deref(), Some("exact"));
        assert_eq!(hit(&hosts, "API.localhost").await.as_deref(), Some("star"));
        assert_eq!(hit(&hosts, "example.com").await.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_first_registered_pattern_wins() {
        let mut hosts = HostRouter::new();
        hosts.map("*.example.com", named("first"));
        hosts.map("api.*.com", named("second"));

        assert_eq!(hit(&hosts, "api.example.com").await.as_deref(), Some("first"));
        assert_eq!(hit(&hosts, "api.other.com").await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_unmapped_host() {
        let mut hosts = HostRouter::new();
        hosts.map("localhost", named("exact"));
        assert!(hit(&hosts, "ui.localhost").await.is_none());
    }

    #[test]
    fn test_broken_pattern_is_an_error() {
        let mut hosts = HostRouter::new();
        hosts.map("files.example.com", named("exact"));
        hosts.map("[bad.example.com", named("bad"));

        assert!(hosts.resolve("files.example.com").unwrap().is_some());
        assert!(hosts.resolve("other.example.com").is_err());
    }
}
