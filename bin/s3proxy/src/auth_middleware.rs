//! Authorization middleware
//!
//! Applied to every target router and to the target list router. The first
//! resource matching the request decides how it is authorized; a request
//! that passes carries its [`AuthenticatedUser`] in the request extensions.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, header::WWW_AUTHENTICATE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use metrics::counter;
use s3proxy_auth::oidc::{REDIRECT_QUERY_KEY, extract_token};
use s3proxy_auth::{
    AuthError, AuthErrorKind, AuthenticatedUser, Decision, OidcUser, PolicyInput, PolicyRequest,
    ResourceMatcher, basic, is_authorized,
};
use s3proxy_common::{Resource, ResourceStrategy, TargetConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::request_info::RequestInfo;
use crate::response::ResponseHandler;
use crate::state::AppState;

/// Resources guarding one router
pub struct AuthScope {
    pub state: Arc<AppState>,
    /// Target answering errors with its templates, `None` for the target list
    pub target: Option<TargetConfig>,
    pub matcher: ResourceMatcher,
}

impl AuthScope {
    pub fn new(state: Arc<AppState>, target: Option<TargetConfig>, resources: &[Resource]) -> Self {
        Self {
            state,
            target,
            matcher: ResourceMatcher::new(resources),
        }
    }

    fn responder(&self, path: &str) -> ResponseHandler {
        match &self.target {
            Some(target) => self.state.target_responder(target, path),
            None => self.state.responder(path),
        }
    }
}

/// Why a request is not let through
#[derive(Debug)]
enum Rejection {
    /// Unauthenticated OIDC request sent to the login route
    Login(String),
    Unauthorized {
        challenge: Option<String>,
        error: String,
    },
    Forbidden(String),
    BadRequest(String),
    Internal(String),
}

impl From<AuthError> for Rejection {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err.kind() {
            AuthErrorKind::Unauthorized => Self::Unauthorized {
                challenge: None,
                error: message,
            },
            AuthErrorKind::Forbidden => Self::Forbidden(message),
            AuthErrorKind::BadRequest => Self::BadRequest(message),
            AuthErrorKind::Internal => Self::Internal(message),
        }
    }
}

impl Rejection {
    async fn respond(self, responder: &ResponseHandler) -> Response {
        match self {
            Self::Login(location) => Redirect::temporary(&location).into_response(),
            Self::Unauthorized { challenge, error } => {
                let mut response = responder.unauthorized(&error).await;
                if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
                    response.headers_mut().insert(WWW_AUTHENTICATE, value);
                }
                response
            }
            Self::Forbidden(error) => responder.forbidden(&error).await,
            Self::BadRequest(error) => responder.bad_request(&error).await,
            Self::Internal(error) => responder.internal_error(&error).await,
        }
    }
}

fn record(strategy: &'static str, decision: &'static str) {
    counter!(
        "s3proxy_authorization_decisions_total",
        "strategy" => strategy,
        "decision" => decision
    )
    .increment(1);
}

/// Authorization middleware
pub async fn auth_layer(
    State(scope): State<Arc<AuthScope>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let info = RequestInfo::new(request.headers(), request.uri());
    let method = request.method().as_str().to_string();
    let responder = scope.responder(&info.request_uri);

    let resource = match scope.matcher.evaluate(&method, &info.request_uri) {
        Ok(Decision::Allow) => {
            debug!("{} {} allowed without authentication", method, info.request_uri);
            record("none", "allowed");
            return next.run(request).await;
        }
        Ok(Decision::Forbidden) => {
            let message = format!(
                "no resource found for path {} and method {}",
                info.request_uri, method
            );
            warn!("{} => Forbidden access", message);
            record("none", "forbidden");
            return responder.forbidden(&message).await;
        }
        Ok(Decision::Delegate(resource)) => resource,
        Err(e) => {
            error!("Resource matching failed for {}: {}", info.request_uri, e);
            return responder.internal_error(&e).await;
        }
    };

    let (mut parts, body) = request.into_parts();
    match authorize(&scope.state, resource, &parts, &info).await {
        Ok(user) => {
            info!("User {} authorized on {}", user.identifier(), info.request_uri);
            parts.extensions.insert(user);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(rejection) => {
            match &rejection {
                Rejection::Login(_) => debug!("No token on {}, redirecting to login", info.request_uri),
                other => warn!("Request {} {} rejected: {:?}", method, info.request_uri, other),
            }
            rejection.respond(&responder).await
        }
    }
}

async fn authorize(
    state: &AppState,
    resource: &Resource,
    parts: &Parts,
    info: &RequestInfo,
) -> Result<AuthenticatedUser, Rejection> {
    match &resource.strategy {
        // allowed by the matcher before reaching here
        ResourceStrategy::Whitelist => Err(Rejection::Internal(
            "whitelisted resource reached strategy dispatch".to_string(),
        )),
        ResourceStrategy::Basic {
            provider,
            credentials,
        } => {
            let realm = state
                .config
                .auth_providers
                .basic
                .get(provider)
                .map(|b| b.realm.clone())
                .ok_or_else(|| Rejection::Internal(format!("basic auth provider {provider} not declared")))?;

            match basic::authenticate(&parts.headers, credentials) {
                Ok(user) => {
                    record("basic", "allowed");
                    Ok(user)
                }
                Err(e) => {
                    record("basic", "unauthorized");
                    Err(Rejection::Unauthorized {
                        challenge: Some(basic::challenge(&realm)),
                        error: e.to_string(),
                    })
                }
            }
        }
        ResourceStrategy::OidcAccessList { provider, accesses } => {
            let user = authenticate_oidc(state, provider, &parts.headers, info).await?;
            let allowed = is_authorized(&user, accesses);
            conclude_oidc("oidc", user, allowed)
        }
        ResourceStrategy::OidcPolicyServer { provider, server } => {
            let user = authenticate_oidc(state, provider, &parts.headers, info).await?;

            let remote_addr = parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string())
                .unwrap_or_default();
            let policy_request = PolicyRequest::new(
                &parts.method,
                parts.version,
                &parts.headers,
                &info.request_uri,
                &info.host,
                &info.scheme,
                &remote_addr,
            );
            let input = PolicyInput {
                user: &user,
                request: &policy_request,
                tags: &server.tags,
            };
            let allowed = state
                .policy()
                .evaluate(server, &input)
                .await
                .map_err(AuthError::from)?;
            conclude_oidc("oidc-opa", user, allowed)
        }
    }
}

fn conclude_oidc(strategy: &'static str, user: OidcUser, allowed: bool) -> Result<AuthenticatedUser, Rejection> {
    let user = AuthenticatedUser::Oidc(user);
    if allowed {
        record(strategy, "allowed");
        Ok(user)
    } else {
        record(strategy, "forbidden");
        Err(Rejection::Forbidden(format!("forbidden user {}", user.identifier())))
    }
}

/// Extract and verify the identity token, redirecting to login when absent
async fn authenticate_oidc(
    state: &AppState,
    provider: &str,
    headers: &HeaderMap,
    info: &RequestInfo,
) -> Result<OidcUser, Rejection> {
    let client = state
        .oidc_client(provider)
        .ok_or_else(|| Rejection::Internal(format!("oidc provider {provider} not declared")))?;
    let config = client.config();

    let Some(token) = extract_token(headers, &config.cookie_name)? else {
        let location = if info.request_uri == config.login_path {
            config.login_path.clone()
        } else {
            format!(
                "{}?{}={}",
                config.login_path,
                REDIRECT_QUERY_KEY,
                urlencoding::encode(&info.url())
            )
        };
        return Err(Rejection::Login(location));
    };

    let claims = state.verifiers().verify(&token).await?;
    OidcUser::from_claims(&claims, &config.group_claim, config.email_verified).map_err(|e| {
        record("oidc", "forbidden");
        Rejection::from(e)
    })
}
