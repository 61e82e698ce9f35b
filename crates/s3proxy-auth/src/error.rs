//! Authentication error types

use thiserror::Error;

/// Token verification errors
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Token was issued by another provider, the next verifier may accept it
    #[error("token issued by a different provider: expected {expected}, got {actual}")]
    WrongIssuer { expected: String, actual: String },

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("no signing key found for kid {0:?}")]
    UnknownKey(Option<String>),

    #[error("failed to fetch signing keys: {0}")]
    Jwks(String),

    #[error("invalid token: {0}")]
    Invalid(String),
}

/// External policy engine errors
#[derive(Debug, Error)]
pub enum ExternalPolicyError {
    #[error("Policy engine unavailable: {0}")]
    Unavailable(String),
    #[error("Timeout")]
    Timeout,
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// How an authentication failure is answered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    Internal,
}

/// Authentication and authorization errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("invalid password for user {0}")]
    InvalidPassword(String),

    #[error("authorization header doesn't follow bearer format")]
    InvalidBearerFormat,

    #[error("email not verified for {0}")]
    EmailNotVerified(String),

    #[error("access denied")]
    AccessDenied,

    #[error("state did not match")]
    StateMismatch,

    #[error("redirect url is invalid")]
    InvalidRedirect,

    #[error("no id_token field in token")]
    MissingIdToken,

    #[error("failed to exchange token: {0}")]
    TokenExchange(String),

    #[error("jwt token cannot be open with oidc providers in configuration, maybe a forged token ?")]
    UnverifiableToken,

    #[error("failed to verify ID Token: {0}")]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    ExternalPolicy(#[from] ExternalPolicyError),

    #[error("discovery failed for issuer {issuer}: {reason}")]
    Discovery { issuer: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::MissingAuthHeader
            | Self::InvalidAuthHeader
            | Self::UserNotFound(_)
            | Self::InvalidPassword(_) => AuthErrorKind::Unauthorized,
            Self::EmailNotVerified(_) | Self::AccessDenied => AuthErrorKind::Forbidden,
            Self::StateMismatch | Self::InvalidRedirect => AuthErrorKind::BadRequest,
            Self::InvalidBearerFormat
            | Self::MissingIdToken
            | Self::TokenExchange(_)
            | Self::UnverifiableToken
            | Self::Verify(_)
            | Self::ExternalPolicy(_)
            | Self::Discovery { .. }
            | Self::Internal(_) => AuthErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            AuthError::UserNotFound("bob".into()).kind(),
            AuthError::InvalidPassword("bob".into()).kind()
        );
        assert_eq!(AuthError::EmailNotVerified("a@b".into()).kind(), AuthErrorKind::Forbidden);
        assert_eq!(AuthError::InvalidBearerFormat.kind(), AuthErrorKind::Internal);
        assert_eq!(AuthError::StateMismatch.kind(), AuthErrorKind::BadRequest);
    }
}
