//! OIDC login and callback routes
//!
//! Each configured provider gets a login route redirecting to its
//! authorization endpoint and a callback route that exchanges the code,
//! verifies the identity token and stores it in the provider cookie.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header::LOCATION, header::SET_COOKIE};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use chrono::{DateTime, Duration, Utc};
use s3proxy_auth::oidc::is_valid_redirect;
use s3proxy_auth::{AuthError, AuthErrorKind, Claims, OidcClient, TokenResponse};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::state::AppState;

/// State of the routes of one provider
pub struct ProviderRoutes {
    state: Arc<AppState>,
    client: Arc<OidcClient>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    rd: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    rd: Option<String>,
    state: Option<String>,
    code: Option<String>,
}

/// Login and callback routes of every provider of `state`
pub fn router(state: &Arc<AppState>) -> Result<Router, AuthError> {
    let mut router = Router::new();

    for client in state.oidc_clients() {
        let login_path = client.config().login_path.clone();
        let callback_path = client.callback_route()?;
        info!(
            "OIDC provider {} login on {} and callback on {}",
            client.name(),
            login_path,
            callback_path
        );

        let routes = Arc::new(ProviderRoutes {
            state: state.clone(),
            client: client.clone(),
        });
        router = router.merge(
            Router::new()
                .route(&login_path, get(login))
                .route(&callback_path, get(callback))
                .with_state(routes),
        );
    }

    Ok(router)
}

/// Redirect to the provider authorization endpoint
pub async fn login(State(routes): State<Arc<ProviderRoutes>>, Query(query): Query<LoginQuery>) -> Response {
    match routes.client.authorization_url(query.rd.as_deref()) {
        Ok(url) => (StatusCode::FOUND, [(LOCATION, url)]).into_response(),
        Err(e) => {
            error!("Cannot build authorization url for {}: {}", routes.client.name(), e);
            let responder = routes.state.responder(routes.client.config().login_path.clone());
            responder.internal_error(&e).await
        }
    }
}

/// Exchange the authorization code and store the identity token
pub async fn callback(State(routes): State<Arc<ProviderRoutes>>, Query(query): Query<CallbackQuery>) -> Response {
    let responder = routes
        .state
        .responder(routes.client.callback_route().unwrap_or_default());

    match complete_login(&routes.client, &query).await {
        Ok((location, cookie)) => {
            let mut response = Redirect::temporary(&location).into_response();
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().insert(SET_COOKIE, value);
                    response
                }
                Err(e) => responder.internal_error(&e).await,
            }
        }
        Err(e) => match e.kind() {
            AuthErrorKind::BadRequest => {
                warn!("Rejected {} callback: {}", routes.client.name(), e);
                responder.bad_request(&e).await
            }
            _ => {
                error!("{} callback failed: {}", routes.client.name(), e);
                responder.internal_error(&e).await
            }
        },
    }
}

/// Post-login location and `Set-Cookie` value
async fn complete_login(client: &OidcClient, query: &CallbackQuery) -> Result<(String, String), AuthError> {
    let config = client.config();

    let rd = query.rd.as_deref().filter(|rd| !rd.is_empty());
    if let Some(rd) = rd
        && !is_valid_redirect(rd)
    {
        return Err(AuthError::InvalidRedirect);
    }

    if query.state.as_deref() != Some(config.state.as_str()) {
        return Err(AuthError::StateMismatch);
    }

    let code = query.code.as_deref().unwrap_or_default();
    let tokens = client.exchange_code(code, rd).await?;
    let id_token = tokens
        .id_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingIdToken)?;

    let claims = client.verifier().verify(id_token).await?;
    let expires = cookie_expiry(&claims, &tokens);

    let cookie = session_cookie(&config.cookie_name, id_token, expires, config.cookie_secure);
    info!("Login succeeded on provider {}", client.name());
    Ok((rd.unwrap_or("/").to_string(), cookie))
}

/// Token `exp` claim, then `expires_in` of the token answer
fn cookie_expiry(claims: &Claims, tokens: &TokenResponse) -> Option<DateTime<Utc>> {
    claims
        .get("exp")
        .and_then(Value::as_i64)
        .and_then(|exp| DateTime::from_timestamp(exp, 0))
        .or_else(|| {
            tokens
                .expires_in
                .and_then(|secs| i64::try_from(secs).ok())
                .map(|secs| Utc::now() + Duration::seconds(secs))
        })
}

fn session_cookie(name: &str, value: &str, expires: Option<DateTime<Utc>>, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/");
    if let Some(expires) = expires {
        cookie.push_str("; Expires=");
        cookie.push_str(&crate::response::http_date(&expires));
    }
    cookie.push_str("; HttpOnly");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
