//! s3proxy Authentication and Authorization
//!
//! This crate provides:
//! - Resource matching with first-match precedence
//! - HTTP Basic authentication against inline credentials
//! - OpenID Connect login flow (discovery, authorization URL, code exchange)
//! - ID token verification and a multi-provider verifier chain
//! - Group/email authorization rules
//! - External policy evaluation (Open Policy Agent)
//!
//! # Example
//!
//! ```rust,ignore
//! use s3proxy_auth::{Decision, ResourceMatcher};
//!
//! let matcher = ResourceMatcher::new(&target.resources);
//! match matcher.evaluate("GET", "/docs/readme.txt")? {
//!     Decision::Allow => { /* serve */ }
//!     Decision::Forbidden => { /* 403 */ }
//!     Decision::Delegate(resource) => { /* run the resource strategy */ }
//! }
//! ```

pub mod access;
pub mod basic;
pub mod chain;
pub mod error;
pub mod external_policy;
pub mod oidc;
pub mod provider;
pub mod resource;

pub use access::is_authorized;
pub use chain::VerifierChain;
pub use error::{AuthError, AuthErrorKind, ExternalPolicyError, VerifyError};
pub use external_policy::{ExternalPolicyEvaluator, OpaEvaluator, PolicyInput, PolicyRequest};
pub use oidc::{JwksVerifier, OidcClient, ProviderMetadata, TokenResponse, TokenVerifier};
pub use provider::{AuthenticatedUser, Claims, OidcUser};
pub use resource::{Decision, ResourceMatcher};
