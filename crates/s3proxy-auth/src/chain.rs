//! Verifier chain
//!
//! Several OIDC providers may protect different resources, so a token is
//! tried against every configured verifier in registration order. The chain
//! is built once with the router and never mutated afterwards.

use std::sync::Arc;

use crate::error::{AuthError, VerifyError};
use crate::oidc::TokenVerifier;
use crate::provider::Claims;

/// Ordered list of token verifiers (first acceptance wins)
#[derive(Clone, Default)]
pub struct VerifierChain {
    verifiers: Vec<Arc<dyn TokenVerifier>>,
}

impl VerifierChain {
    /// Chain trying `verifiers` in the given order
    pub fn new(verifiers: Vec<Arc<dyn TokenVerifier>>) -> Self {
        Self { verifiers }
    }

    /// Verify sequentially; a wrong issuer moves on to the next verifier,
    /// any other failure stops the chain.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        for verifier in &self.verifiers {
            match verifier.verify(token).await {
                Ok(claims) => {
                    tracing::debug!("Token accepted by issuer {}", verifier.issuer());
                    return Ok(claims);
                }
                Err(VerifyError::WrongIssuer { .. }) => continue,
                Err(e) => return Err(AuthError::Verify(e)),
            }
        }

        Err(AuthError::UnverifiableToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::JwksVerifier;
    use crate::oidc::verifier::tests::{jwks, token};
    use serde_json::json;

    fn chain() -> VerifierChain {
        VerifierChain::new(vec![
            Arc::new(JwksVerifier::with_jwks("https://idp-a", "proxy", jwks("a"))),
            Arc::new(JwksVerifier::with_jwks("https://idp-b", "proxy", jwks("b"))),
        ])
    }

    #[tokio::test]
    async fn test_each_configured_issuer_is_accepted() {
        let chain = chain();

        let from_a = token("https://idp-a", "proxy", "a", json!({"email": "a@example.com"}));
        assert_eq!(chain.verify(&from_a).await.unwrap()["email"], "a@example.com");

        let from_b = token("https://idp-b", "proxy", "b", json!({"email": "b@example.com"}));
        assert_eq!(chain.verify(&from_b).await.unwrap()["email"], "b@example.com");
    }

    #[tokio::test]
    async fn test_unknown_issuer_is_fatal() {
        let foreign = token("https://idp-c", "proxy", "c", json!({}));
        let err = chain().verify(&foreign).await.unwrap_err();
        assert!(matches!(err, AuthError::UnverifiableToken));
        assert!(err.to_string().contains("maybe a forged token"));
    }

    #[tokio::test]
    async fn test_other_error_stops_chain() {
        // right issuer, wrong audience
        let bad = token("https://idp-a", "other", "a", json!({}));
        assert!(matches!(
            chain().verify(&bad).await,
            Err(AuthError::Verify(VerifyError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn test_verifiers_tried_in_order() {
        // two verifiers for one issuer, only the second knows key "a"
        let stale: Arc<dyn TokenVerifier> = Arc::new(JwksVerifier::with_jwks("https://idp-a", "proxy", jwks("old")));
        let fresh: Arc<dyn TokenVerifier> = Arc::new(JwksVerifier::with_jwks("https://idp-a", "proxy", jwks("a")));
        let token = token("https://idp-a", "proxy", "a", json!({}));

        let stale_first = VerifierChain::new(vec![stale.clone(), fresh.clone()]);
        assert!(matches!(
            stale_first.verify(&token).await,
            Err(AuthError::Verify(VerifyError::UnknownKey(_)))
        ));

        let fresh_first = VerifierChain::new(vec![fresh, stale]);
        assert!(fresh_first.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let token = token("https://idp-a", "proxy", "a", json!({}));
        assert!(matches!(
            VerifierChain::default().verify(&token).await,
            Err(AuthError::UnverifiableToken)
        ));
    }
}
