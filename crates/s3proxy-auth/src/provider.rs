//! Authenticated principals
//!
//! A request that passed a Basic or OIDC strategy carries an
//! [`AuthenticatedUser`] in its extensions. Templates and policy inputs read
//! it from there.

use crate::error::AuthError;
use serde::Serialize;
use serde_json::Value;

/// Verified token claims
pub type Claims = serde_json::Map<String, Value>;

/// Principal extracted from a verified identity token
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OidcUser {
    pub email: String,
    pub email_verified: bool,
    pub groups: Vec<String>,
    pub name: String,
    pub given_name: String,
    pub family_name: String,
    pub preferred_username: String,
}

fn string_claim(claims: &Claims, name: &str) -> String {
    claims
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl OidcUser {
    /// Build the principal from verified claims.
    ///
    /// With `require_verified_email`, a token whose `email_verified` claim is
    /// false or absent is rejected, and so is a token without email.
    pub fn from_claims(
        claims: &Claims,
        group_claim: &str,
        require_verified_email: bool,
    ) -> Result<Self, AuthError> {
        let email = string_claim(claims, "email");
        let email_verified = claims
            .get("email_verified")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if require_verified_email && (email.is_empty() || !email_verified) {
            return Err(AuthError::EmailNotVerified(email));
        }

        let groups = match claims.get(group_claim) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(group)) => vec![group.clone()],
            _ => Vec::new(),
        };

        Ok(Self {
            email,
            email_verified,
            groups,
            name: string_claim(claims, "name"),
            given_name: string_claim(claims, "given_name"),
            family_name: string_claim(claims, "family_name"),
            preferred_username: string_claim(claims, "preferred_username"),
        })
    }
}

/// Principal attached to an authorized request
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum AuthenticatedUser {
    Basic { username: String },
    Oidc(OidcUser),
}

impl AuthenticatedUser {
    /// Identifier used in logs
    pub fn identifier(&self) -> &str {
        match self {
            Self::Basic { username } => username,
            Self::Oidc(user) if !user.email.is_empty() => &user.email,
            Self::Oidc(user) => &user.preferred_username,
        }
    }

    pub fn groups(&self) -> &[String] {
        match self {
            Self::Basic { .. } => &[],
            Self::Oidc(user) => &user.groups,
        }
    }
}
