//! ID token verification against a provider's JWKS

use crate::error::VerifyError;
use crate::provider::Claims;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// Verifier of ID tokens issued by one provider
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Issuer this verifier accepts
    fn issuer(&self) -> &str;

    /// Verify signature, issuer, audience and expiry, returning the claims.
    ///
    /// A token from another issuer fails with [`VerifyError::WrongIssuer`]
    /// before any key lookup.
    async fn verify(&self, token: &str) -> Result<Claims, VerifyError>;
}

/// Read the `iss` claim without verifying the token
pub fn peek_issuer(token: &str) -> Result<String, VerifyError> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(VerifyError::Malformed("expected three segments".to_string()));
    };

    let payload = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| VerifyError::Malformed(e.to_string()))?;
    let claims: Value =
        serde_json::from_slice(&payload).map_err(|e| VerifyError::Malformed(e.to_string()))?;

    claims
        .get("iss")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| VerifyError::Malformed("missing iss claim".to_string()))
}

/// Signing algorithm of a key, `None` for encryption-only algorithms
fn signing_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Algorithm a token must be verified with.
///
/// The key's declared algorithm wins and the token header must agree with
/// it. Keys without one fall back to the header, the key type still has to
/// fit it.
fn verification_algorithm(jwk: &Jwk, header_alg: Algorithm) -> Result<Algorithm, VerifyError> {
    let Some(key_alg) = jwk.common.key_algorithm.as_ref() else {
        return Ok(header_alg);
    };
    let alg = signing_algorithm(key_alg)
        .ok_or_else(|| VerifyError::Invalid(format!("key algorithm {key_alg:?} cannot verify signatures")))?;
    if alg != header_alg {
        return Err(VerifyError::Invalid(format!(
            "token algorithm {header_alg:?} does not match key algorithm {alg:?}"
        )));
    }
    Ok(alg)
}

/// Verifier backed by a JSON Web Key Set
///
/// Keys are fetched on first use and refetched once when a token names an
/// unknown `kid`.
pub struct JwksVerifier {
    issuer: String,
    client_id: String,
    jwks_uri: Option<String>,
    http: reqwest::Client,
    keys: RwLock<JwkSet>,
}

impl JwksVerifier {
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        jwks_uri: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            jwks_uri: Some(jwks_uri.into()),
            http,
            keys: RwLock::new(JwkSet { keys: Vec::new() }),
        }
    }

    /// Verifier with a fixed key set and no remote endpoint
    pub fn with_jwks(issuer: impl Into<String>, client_id: impl Into<String>, jwks: JwkSet) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            jwks_uri: None,
            http: reqwest::Client::new(),
            keys: RwLock::new(jwks),
        }
    }

    fn find_key(&self, kid: Option<&str>) -> Option<Jwk> {
        let keys = self.keys.read();
        match kid {
            Some(kid) => keys.find(kid).cloned(),
            None if keys.keys.len() == 1 => keys.keys.first().cloned(),
            None => None,
        }
    }

    async fn refresh(&self) -> Result<(), VerifyError> {
        let Some(uri) = &self.jwks_uri else {
            return Ok(());
        };

        debug!("Fetching signing keys from {}", uri);
        let response = self
            .http
            .get(uri)
            .send()
            .await
            .map_err(|e| VerifyError::Jwks(e.to_string()))?;
        if !response.status().is_success() {
            return Err(VerifyError::Jwks(format!(
                "{} returned status {}",
                uri,
                response.status()
            )));
        }
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| VerifyError::Jwks(e.to_string()))?;

        *self.keys.write() = jwks;
        Ok(())
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    fn issuer(&self) -> &str {
        &self.issuer
    }

    async fn verify(&self, token: &str) -> Result<Claims, VerifyError> {
        let issuer = peek_issuer(token)?;
        if issuer != self.issuer {
            return Err(VerifyError::WrongIssuer {
                expected: self.issuer.clone(),
                actual: issuer,
            });
        }

        let header = decode_header(token).map_err(|e| VerifyError::Malformed(e.to_string()))?;
        let kid = header.kid.as_deref();

        let jwk = match self.find_key(kid) {
            Some(jwk) => jwk,
            None => {
                self.refresh().await?;
                self.find_key(kid)
                    .ok_or_else(|| VerifyError::UnknownKey(header.kid.clone()))?
            }
        };

        let key = DecodingKey::from_jwk(&jwk).map_err(|e| VerifyError::Invalid(e.to_string()))?;
        let mut validation = Validation::new(verification_algorithm(&jwk, header.alg)?);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.client_id]);

        decode::<Claims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| VerifyError::Invalid(e.to_string()))
    }
}
