//! OpenID Connect authorization code flow
//!
//! One [`OidcClient`] exists per configured provider. It owns the discovered
//! endpoints, builds the authorization URL for the login route, exchanges
//! codes on the callback route and exposes the provider's token verifier.

pub mod verifier;

use crate::error::AuthError;
use http::HeaderMap;
use http::header::{AUTHORIZATION, COOKIE};
use s3proxy_common::OidcAuthConfig;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub use verifier::{JwksVerifier, TokenVerifier, peek_issuer};

/// Query parameter carrying the post-login redirect target
pub const REDIRECT_QUERY_KEY: &str = "rd";

/// Subset of the discovery document used by the flow
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

/// Token endpoint answer
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Client of one OIDC provider
pub struct OidcClient {
    name: String,
    config: OidcAuthConfig,
    metadata: ProviderMetadata,
    http: reqwest::Client,
    verifier: Arc<dyn TokenVerifier>,
}

impl OidcClient {
    /// Fetch `<issuer>/.well-known/openid-configuration` and build the client
    pub async fn discover(name: &str, config: &OidcAuthConfig) -> Result<Self, AuthError> {
        let discovery_error = |reason: String| AuthError::Discovery {
            issuer: config.issuer_url.clone(),
            reason,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| discovery_error(e.to_string()))?;

        let url = format!(
            "{}/.well-known/openid-configuration",
            config.issuer_url.trim_end_matches('/')
        );
        debug!("Discovering OIDC provider {} at {}", name, url);

        let response = http
            .get(&url)
            .send()
            .await
            .map_err(|e| discovery_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(discovery_error(format!("status {}", response.status())));
        }
        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| discovery_error(e.to_string()))?;

        if metadata.issuer != config.issuer_url {
            return Err(discovery_error(format!(
                "issuer did not match the issuer returned by provider, expected {:?} got {:?}",
                config.issuer_url, metadata.issuer
            )));
        }

        let verifier = Arc::new(JwksVerifier::new(
            metadata.issuer.clone(),
            config.client_id.clone(),
            metadata.jwks_uri.clone(),
            http.clone(),
        ));

        info!("OIDC provider {} discovered ({})", name, metadata.issuer);
        Ok(Self::new(name, config.clone(), metadata, http, verifier))
    }

    /// Client from already known endpoints
    pub fn new(
        name: impl Into<String>,
        config: OidcAuthConfig,
        metadata: ProviderMetadata,
        http: reqwest::Client,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            metadata,
            http,
            verifier,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &OidcAuthConfig {
        &self.config
    }

    pub fn verifier(&self) -> Arc<dyn TokenVerifier> {
        self.verifier.clone()
    }

    /// `redirect_url` joined with the callback path, carrying `rd` when given
    pub fn redirect_uri(&self, rd: Option<&str>) -> Result<String, AuthError> {
        let mut url = Url::parse(&self.config.redirect_url)
            .map_err(|e| AuthError::Internal(format!("invalid redirect url: {e}")))?;

        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            self.config.callback_path.trim_start_matches('/')
        );
        url.set_path(&path);

        if let Some(rd) = rd.filter(|rd| !rd.is_empty()) {
            url.query_pairs_mut().append_pair(REDIRECT_QUERY_KEY, rd);
        }

        Ok(url.to_string())
    }

    /// Path the callback route is mounted on
    pub fn callback_route(&self) -> Result<String, AuthError> {
        let uri = self.redirect_uri(None)?;
        let url = Url::parse(&uri).map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(url.path().to_string())
    }

    /// Authorization endpoint URL the login route redirects to
    pub fn authorization_url(&self, rd: Option<&str>) -> Result<String, AuthError> {
        let mut url = Url::parse(&self.metadata.authorization_endpoint)
            .map_err(|e| AuthError::Internal(format!("invalid authorization endpoint: {e}")))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.redirect_uri(rd)?)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", &self.config.state);

        Ok(url.to_string())
    }

    /// Exchange an authorization code at the token endpoint
    pub async fn exchange_code(&self, code: &str, rd: Option<&str>) -> Result<TokenResponse, AuthError> {
        let redirect_uri = self.redirect_uri(rd)?;
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        let secret = self.config.client_secret();
        if !secret.is_empty() {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange(format!(
                "token endpoint returned status {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))
    }
}

/// Whether a post-login redirect target is acceptable
pub fn is_valid_redirect(rd: &str) -> bool {
    rd.starts_with("http://") || rd.starts_with("https://")
}

/// Read a cookie from the `Cookie` headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}

/// Token from `Authorization: Bearer` or from the provider cookie.
///
/// A present header that is not `Bearer <token>` is an error. An empty bearer
/// token falls back to the cookie. `None` means unauthenticated.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Result<Option<String>, AuthError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AuthError::InvalidBearerFormat)?;
        if !value.is_empty() {
            let parts: Vec<&str> = value.split(' ').collect();
            if parts.len() != 2 || parts[0] != "Bearer" {
                return Err(AuthError::InvalidBearerFormat);
            }
            if !parts[1].is_empty() {
                return Ok(Some(parts[1].to_string()));
            }
        }
    }

    Ok(cookie_value(headers, cookie_name))
}
