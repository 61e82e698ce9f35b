//! Group and email authorization rules

use crate::provider::OidcUser;
use s3proxy_common::AuthorizationAccess;

/// First matching rule grants access; an empty rule list allows any
/// authenticated principal.
pub fn is_authorized(user: &OidcUser, accesses: &[AuthorizationAccess]) -> bool {
    if accesses.is_empty() {
        return true;
    }

    accesses.iter().any(|access| {
        let group_match = access
            .group
            .as_ref()
            .is_some_and(|matcher| user.groups.iter().any(|g| matcher.is_match(g)));
        let email_match = access
            .email
            .as_ref()
            .is_some_and(|matcher| matcher.is_match(&user.email));
        group_match || email_match
    })
}
