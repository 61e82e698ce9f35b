//! Fixtures shared by the router tests

use axum::Router;
use axum::body::Body;
use axum::response::Response;
use axum::routing::post;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http_body_util::BodyExt;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use s3proxy_auth::{JwksVerifier, OidcClient, ProviderMetadata};
use s3proxy_common::{OidcAuthConfig, TemplateConfig};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

pub const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
pub const CLIENT_ID: &str = "proxy";

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Minimal general templates writing their kind and main variable
pub fn write_templates(dir: &Path) -> TemplateConfig {
    let files = [
        ("folder-list.tpl", "{{ name }}:{% for e in entries %} {{ e.type }} {{ e.name }} {{ e.path }};{% endfor %}"),
        ("target-list.tpl", "targets:{% for t in targets %} {{ t.name }}{% endfor %}"),
        ("not-found.tpl", "not found {{ path }}"),
        ("internal-server-error.tpl", "internal error: {{ error }}"),
        ("unauthorized.tpl", "unauthorized: {{ error }}"),
        ("forbidden.tpl", "forbidden: {{ error }}"),
        ("bad-request.tpl", "bad request: {{ error }}"),
    ];
    for (name, content) in files {
        std::fs::write(dir.join(name), content).unwrap();
    }

    let file = |name: &str| dir.join(name).display().to_string();
    TemplateConfig {
        folder_list: file("folder-list.tpl"),
        target_list: file("target-list.tpl"),
        not_found: file("not-found.tpl"),
        internal_server_error: file("internal-server-error.tpl"),
        unauthorized: file("unauthorized.tpl"),
        forbidden: file("forbidden.tpl"),
        bad_request: file("bad-request.tpl"),
    }
}

pub fn jwks(kid: &str) -> JwkSet {
    serde_json::from_value(json!({
        "keys": [{
            "kty": "oct",
            "kid": kid,
            "alg": "HS256",
            "k": URL_SAFE_NO_PAD.encode(SECRET),
        }]
    }))
    .unwrap()
}

/// HS256 identity token valid for one hour
pub fn token(issuer: &str, kid: &str, extra: Value) -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    let mut claims = json!({
        "iss": issuer,
        "aud": CLIENT_ID,
        "sub": "user-1",
        "exp": exp,
    });
    if let (Some(claims), Value::Object(extra)) = (claims.as_object_mut(), extra) {
        claims.extend(extra);
    }

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

pub fn oidc_config(name: &str, issuer: &str) -> OidcAuthConfig {
    let mut config = OidcAuthConfig {
        client_id: CLIENT_ID.to_string(),
        client_secret: None,
        issuer_url: issuer.to_string(),
        redirect_url: "http://proxy.local".to_string(),
        scopes: vec!["openid".to_string(), "email".to_string()],
        state: "state-value".to_string(),
        group_claim: "groups".to_string(),
        cookie_name: format!("{name}-session"),
        email_verified: false,
        cookie_secure: false,
        login_path: String::new(),
        callback_path: String::new(),
    };
    config.apply_defaults(name);
    config
}

/// Client trusting tokens signed with [`SECRET`] under `kid`
pub fn oidc_client(config: OidcAuthConfig, name: &str, kid: &str, token_endpoint: &str) -> Arc<OidcClient> {
    let metadata = ProviderMetadata {
        issuer: config.issuer_url.clone(),
        authorization_endpoint: format!("{}/authorize", config.issuer_url),
        token_endpoint: token_endpoint.to_string(),
        jwks_uri: format!("{}/jwks", config.issuer_url),
    };
    let verifier = Arc::new(JwksVerifier::with_jwks(
        config.issuer_url.clone(),
        CLIENT_ID,
        jwks(kid),
    ));
    Arc::new(OidcClient::new(name, config, metadata, reqwest::Client::new(), verifier))
}

/// Local endpoint answering every POST on `path` with `answer`
pub async fn spawn_json_endpoint(path: &str, answer: Value) -> String {
    let app = Router::new().route(
        path,
        post(move || {
            let answer = answer.clone();
            async move { axum::Json(answer) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}{path}")
}
