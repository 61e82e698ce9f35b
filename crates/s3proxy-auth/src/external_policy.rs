//! External policy evaluation
//!
//! The policy server receives the principal and a description of the request
//! and answers `{"result": <bool>}`. Network failures and non-success
//! statuses are errors, a `false` result is a denial.

use async_trait::async_trait;
use http::{HeaderMap, Method, Version};
use s3proxy_common::OpaServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ExternalPolicyError;
use crate::provider::OidcUser;

/// Request description sent to the policy server
#[derive(Clone, Debug, Serialize)]
pub struct PolicyRequest {
    pub method: String,
    pub protocol: String,
    /// Lowercased header names, first value only
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "remoteAddr")]
    pub remote_addr: String,
    pub scheme: String,
    pub host: String,
    /// Non-empty segments of the request URI
    pub parsed_path: Vec<String>,
    pub path: String,
}

impl PolicyRequest {
    pub fn new(
        method: &Method,
        version: Version,
        headers: &HeaderMap,
        request_uri: &str,
        host: &str,
        scheme: &str,
        remote_addr: &str,
    ) -> Self {
        let mut collected = BTreeMap::new();
        for (name, value) in headers {
            collected
                .entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        Self {
            method: method.to_string(),
            protocol: format!("{version:?}"),
            headers: collected,
            remote_addr: remote_addr.to_string(),
            scheme: scheme.to_string(),
            host: host.to_string(),
            parsed_path: request_uri
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
            path: request_uri.to_string(),
        }
    }
}

/// Policy input document
#[derive(Debug, Serialize)]
pub struct PolicyInput<'a> {
    pub user: &'a OidcUser,
    pub request: &'a PolicyRequest,
    pub tags: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct PolicyQuery<'a> {
    input: &'a PolicyInput<'a>,
}

#[derive(Deserialize)]
struct PolicyAnswer {
    #[serde(default)]
    result: bool,
}

/// Trait for pluggable external policy evaluators
#[async_trait]
pub trait ExternalPolicyEvaluator: Send + Sync {
    /// Evaluator name for logging/metrics
    fn name(&self) -> &str;

    /// Ask `server` whether the input is authorized
    async fn evaluate(
        &self,
        server: &OpaServerConfig,
        input: &PolicyInput<'_>,
    ) -> Result<bool, ExternalPolicyError>;
}

/// Open Policy Agent data API client
pub struct OpaEvaluator {
    http_client: reqwest::Client,
}

impl OpaEvaluator {
    pub fn new(timeout: Duration) -> Result<Self, ExternalPolicyError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalPolicyError::ConfigurationError(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ExternalPolicyEvaluator for OpaEvaluator {
    fn name(&self) -> &str {
        "opa"
    }

    async fn evaluate(
        &self,
        server: &OpaServerConfig,
        input: &PolicyInput<'_>,
    ) -> Result<bool, ExternalPolicyError> {
        let response = self
            .http_client
            .post(&server.url)
            .json(&PolicyQuery { input })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExternalPolicyError::Timeout
                } else {
                    ExternalPolicyError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalPolicyError::Unavailable(format!(
                "OPA returned status {status}: {body}"
            )));
        }

        let answer: PolicyAnswer = response
            .json()
            .await
            .map_err(|e| ExternalPolicyError::Internal(e.to_string()))?;

        Ok(answer.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use http::HeaderValue;
    use serde_json::{Value, json};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1/data/s3proxy/authz/allowed")
    }

    fn request() -> PolicyRequest {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("10.0.0.1"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        PolicyRequest::new(
            &Method::GET,
            Version::HTTP_11,
            &headers,
            "/docs//folder/file.txt",
            "files.example.com",
            "http",
            "127.0.0.1:40000",
        )
    }

    #[test]
    fn test_policy_request_shape() {
        let request = request();
        assert_eq!(request.protocol, "HTTP/1.1");
        assert_eq!(request.parsed_path, vec!["docs", "folder", "file.txt"]);
        assert_eq!(request.headers["x-forwarded-for"], "10.0.0.1");
        assert_eq!(request.headers["accept"], "text/html");

        let user = OidcUser::default();
        let tags = BTreeMap::from([("team".to_string(), "storage".to_string())]);
        let value = serde_json::to_value(PolicyQuery {
            input: &PolicyInput {
                user: &user,
                request: &request,
                tags: &tags,
            },
        })
        .unwrap();
        assert_eq!(value["input"]["request"]["remoteAddr"], "127.0.0.1:40000");
        assert_eq!(value["input"]["tags"]["team"], "storage");
        assert_eq!(value["input"]["user"]["email"], "");
    }

    #[tokio::test]
    async fn test_opa_decisions() {
        let url = serve(Router::new().route(
            "/v1/data/s3proxy/authz/allowed",
            post(|Json(body): Json<Value>| async move {
                let allowed = body["input"]["user"]["groups"]
                    .as_array()
                    .is_some_and(|groups| groups.iter().any(|g| g == "admins"));
                Json(json!({ "result": allowed }))
            }),
        ))
        .await;

        let evaluator = OpaEvaluator::new(Duration::from_secs(5)).unwrap();
        let server = OpaServerConfig {
            url,
            tags: BTreeMap::new(),
        };
        let request = request();

        let admin = OidcUser {
            groups: vec!["admins".to_string()],
            ..Default::default()
        };
        let input = PolicyInput {
            user: &admin,
            request: &request,
            tags: &server.tags,
        };
        assert!(evaluator.evaluate(&server, &input).await.unwrap());

        let guest = OidcUser::default();
        let input = PolicyInput {
            user: &guest,
            request: &request,
            tags: &server.tags,
        };
        assert!(!evaluator.evaluate(&server, &input).await.unwrap());
    }

    #[tokio::test]
    async fn test_opa_error_status() {
        let url = serve(Router::new().route(
            "/v1/data/s3proxy/authz/allowed",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;

        let evaluator = OpaEvaluator::new(Duration::from_secs(5)).unwrap();
        let server = OpaServerConfig {
            url,
            tags: BTreeMap::new(),
        };
        let user = OidcUser::default();
        let request = request();
        let input = PolicyInput {
            user: &user,
            request: &request,
            tags: &server.tags,
        };
        assert!(matches!(
            evaluator.evaluate(&server, &input).await,
            Err(ExternalPolicyError::Unavailable(_))
        ));
    }
}
