//! Shared state of one router generation
//!
//! Everything here is built from a single configuration snapshot and never
//! mutated. A reload builds a new [`AppState`] and a new router around it.

use anyhow::{Context, Result};
use s3proxy_auth::{ExternalPolicyEvaluator, OidcClient, OpaEvaluator, TokenVerifier, VerifierChain};
use s3proxy_common::{Config, TargetConfig};
use s3proxy_storage::{S3Backend, StorageClient};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::response::ResponseHandler;
use crate::templates::TemplateRenderer;

/// Timeout of external policy server calls
const POLICY_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state shared by the handlers of one router
pub struct AppState {
    pub config: Arc<Config>,
    pub renderer: Arc<TemplateRenderer>,
    storage: HashMap<String, StorageClient>,
    oidc: BTreeMap<String, Arc<OidcClient>>,
    verifiers: VerifierChain,
    policy: Arc<dyn ExternalPolicyEvaluator>,
}

impl AppState {
    /// Assemble state from already built collaborators.
    ///
    /// The verifier chain follows the order of `oidc`, so providers are tried
    /// in name order whatever their order in the configuration file.
    pub fn new(
        config: Arc<Config>,
        storage: HashMap<String, StorageClient>,
        oidc: BTreeMap<String, Arc<OidcClient>>,
        policy: Arc<dyn ExternalPolicyEvaluator>,
    ) -> Self {
        let verifiers: Vec<Arc<dyn TokenVerifier>> = oidc.values().map(|client| client.verifier()).collect();
        Self {
            config,
            renderer: Arc::new(TemplateRenderer::new()),
            storage,
            oidc,
            verifiers: VerifierChain::new(verifiers),
            policy,
        }
    }

    /// Build S3 clients for every target and discover every OIDC provider
    pub async fn from_config(config: Arc<Config>) -> Result<Self> {
        let mut storage = HashMap::new();
        for target in &config.targets {
            let backend = S3Backend::new(&target.bucket).await;
            info!(
                "Target {} bound to bucket {} ({})",
                target.name, target.bucket.name, target.bucket.region
            );
            storage.insert(
                target.name.clone(),
                StorageClient::new(&target.name, Arc::new(backend), target.bucket.s3_list_max_keys),
            );
        }

        let mut oidc = BTreeMap::new();
        for (name, provider) in &config.auth_providers.oidc {
            let client = OidcClient::discover(name, provider)
                .await
                .with_context(|| format!("OIDC provider {name}"))?;
            oidc.insert(name.clone(), Arc::new(client));
        }

        let policy = OpaEvaluator::new(POLICY_TIMEOUT).context("policy server client")?;

        Ok(Self::new(config, storage, oidc, Arc::new(policy)))
    }

    pub fn storage(&self, target: &str) -> Option<&StorageClient> {
        self.storage.get(target)
    }

    pub fn oidc_client(&self, provider: &str) -> Option<&Arc<OidcClient>> {
        self.oidc.get(provider)
    }

    pub fn oidc_clients(&self) -> impl Iterator<Item = &Arc<OidcClient>> {
        self.oidc.values()
    }

    pub fn verifiers(&self) -> &VerifierChain {
        &self.verifiers
    }

    pub fn policy(&self) -> &dyn ExternalPolicyEvaluator {
        self.policy.as_ref()
    }

    /// Responder on the general template set
    pub fn responder(&self, path: impl Into<String>) -> ResponseHandler {
        ResponseHandler::new(self.renderer.clone(), self.config.clone(), path)
    }

    /// Responder resolving the target template overrides first
    pub fn target_responder(&self, target: &TargetConfig, path: impl Into<String>) -> ResponseHandler {
        let responder = self.responder(path);
        match self.storage(&target.name) {
            Some(storage) => responder.with_target(target.templates.as_ref(), storage.clone()),
            None => responder,
        }
    }
}
