//! HTTP Basic credential strategy
//!
//! Credentials are checked on every request, no session is created.

use crate::error::AuthError;
use crate::provider::AuthenticatedUser;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use s3proxy_common::BasicCredential;
use subtle::ConstantTimeEq;

/// `WWW-Authenticate` challenge for a realm
pub fn challenge(realm: &str) -> String {
    format!("Basic realm=\"{realm}\"")
}

/// Decode `Authorization: Basic <base64(user:password)>`
pub fn parse_basic_header(headers: &HeaderMap) -> Result<(String, String), AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let (scheme, encoded) = value.split_once(' ').ok_or(AuthError::InvalidAuthHeader)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::InvalidAuthHeader)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidAuthHeader)?;
    let (user, password) = decoded.split_once(':').ok_or(AuthError::InvalidAuthHeader)?;

    Ok((user.to_string(), password.to_string()))
}

/// Authenticate the request against an inline credential list
pub fn authenticate(
    headers: &HeaderMap,
    credentials: &[BasicCredential],
) -> Result<AuthenticatedUser, AuthError> {
    let (username, password) = parse_basic_header(headers)?;

    let credential = credentials
        .iter()
        .find(|c| c.user == username)
        .ok_or_else(|| AuthError::UserNotFound(username.clone()))?;

    let expected = credential.password.value();
    let matches: bool = expected.as_bytes().ct_eq(password.as_bytes()).into();
    if expected.is_empty() || !matches {
        return Err(AuthError::InvalidPassword(username));
    }

    Ok(AuthenticatedUser::Basic { username })
}
