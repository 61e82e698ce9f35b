//! Resource matching
//!
//! Resources are evaluated in declaration order and the first one whose
//! method set and path glob accept the request decides. A broader rule
//! declared first shadows narrower rules after it.

use s3proxy_common::{Glob, GlobError, HttpMethod, Resource, ResourceStrategy};

use crate::error::AuthError;

/// Outcome of resource matching
#[derive(Debug)]
pub enum Decision<'a> {
    /// No resources declared, or a whitelisted resource matched
    Allow,
    /// Resources declared but none matched
    Forbidden,
    /// The matched resource's strategy must authorize the request
    Delegate(&'a Resource),
}

struct CompiledResource {
    resource: Resource,
    glob: Result<Glob, GlobError>,
}

/// Ordered, precompiled resource list
pub struct ResourceMatcher {
    resources: Vec<CompiledResource>,
}

impl ResourceMatcher {
    /// Compile every resource path once.
    ///
    /// A path that fails to compile is kept and reported when a request
    /// reaches it.
    pub fn new(resources: &[Resource]) -> Self {
        Self {
            resources: resources
                .iter()
                .map(|resource| CompiledResource {
                    glob: Glob::new(&resource.path),
                    resource: resource.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Find the first resource accepting `method` on the full `request_uri`
    pub fn find(&self, method: &str, request_uri: &str) -> Result<Option<&Resource>, AuthError> {
        let Some(method) = HttpMethod::from_request_method(method) else {
            return Ok(None);
        };

        for compiled in &self.resources {
            if !compiled.resource.methods.contains(&method) {
                continue;
            }
            let glob = compiled.glob.as_ref().map_err(|e| {
                AuthError::Internal(format!(
                    "resource path {:?} cannot be compiled: {e}",
                    compiled.resource.path
                ))
            })?;
            if glob.is_match(request_uri) {
                return Ok(Some(&compiled.resource));
            }
        }

        Ok(None)
    }

    /// Apply the decision table to a request
    pub fn evaluate(&self, method: &str, request_uri: &str) -> Result<Decision<'_>, AuthError> {
        if self.is_empty() {
            return Ok(Decision::Allow);
        }

        Ok(match self.find(method, request_uri)? {
            None => Decision::Forbidden,
            Some(resource) if matches!(resource.strategy, ResourceStrategy::Whitelist) => {
                Decision::Allow
            }
            Some(resource) => Decision::Delegate(resource),
        })
    }
}
