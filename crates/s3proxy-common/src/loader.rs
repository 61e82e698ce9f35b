//! Configuration loading
//!
//! Sources, later ones win:
//! 1. a configuration file, or every file of a configuration directory in
//!    name order (format picked from the extension: yaml, toml, json)
//! 2. environment variables prefixed with `S3PROXY__`, `__` separating levels

use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::validation;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "S3PROXY";

/// Load, resolve and validate a configuration from a file or a directory
pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let files = config_files(path)?;

    let mut builder = config::Config::builder();
    for file in &files {
        debug!("Loading configuration file {}", file.display());
        builder = builder.add_source(config::File::from(file.as_path()));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let config: Config = builder.build()?.try_deserialize()?;
    prepare(config)
}

/// Load from an in-memory document, used by tests and embedders
pub fn load_from_str(content: &str, format: config::FileFormat) -> Result<Config> {
    let config: Config = config::Config::builder()
        .add_source(config::File::from_str(content, format))
        .build()?
        .try_deserialize()?;
    prepare(config)
}

/// Apply derived defaults, resolve credentials and validate
pub fn prepare(mut config: Config) -> Result<Config> {
    for (name, provider) in &mut config.auth_providers.oidc {
        provider.apply_defaults(name);
        if let Some(secret) = provider.client_secret.as_mut() {
            secret.resolve(&format!("auth_providers.oidc.{name}.client_secret"))?;
        }
    }

    if let Some(resource) = config.list_targets.resource.as_mut() {
        resolve_resource_credentials("list_targets.resource", resource)?;
    }

    for (i, target) in config.targets.iter_mut().enumerate() {
        if let Some(credentials) = target.bucket.credentials.as_mut() {
            credentials
                .access_key
                .resolve(&format!("targets[{i}].bucket.credentials.access_key"))?;
            credentials
                .secret_key
                .resolve(&format!("targets[{i}].bucket.credentials.secret_key"))?;
        }
        for (j, resource) in target.resources.iter_mut().enumerate() {
            resolve_resource_credentials(&format!("targets[{i}].resources[{j}]"), resource)?;
        }
    }

    validation::validate(&config)?;
    Ok(config)
}

fn resolve_resource_credentials(field: &str, resource: &mut crate::config::Resource) -> Result<()> {
    if let crate::config::ResourceStrategy::Basic { credentials, .. } = &mut resource.strategy {
        for (k, credential) in credentials.iter_mut().enumerate() {
            credential
                .password
                .resolve(&format!("{field}.basic.credentials[{k}].password"))?;
        }
    }
    Ok(())
}

fn config_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let entries = std::fs::read_dir(path).map_err(|e| {
        ConfigError::NotFound(format!("{}: {e}", path.display()))
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "toml" | "json"))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    Ok(files)
}
