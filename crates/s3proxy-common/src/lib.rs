//! s3proxy Common - configuration and shared utilities
//!
//! This crate provides the configuration model consumed by every other
//! s3proxy component, together with:
//! - Loading from files and `S3PROXY__` environment variables
//! - Credential resolution (file, environment variable or inline value)
//! - Validation of the cross references between targets, resources and providers
//! - A snapshot manager that swaps validated configurations atomically
//! - Shell-style glob matching used for hosts and resource paths

pub mod config;
pub mod credential;
pub mod error;
pub mod glob;
pub mod loader;
pub mod manager;
pub mod validation;

pub use crate::config::{
    AccessMatcher, ActionsConfig, AuthProviderConfig, AuthorizationAccess, BasicAuthConfig,
    BasicCredential, BucketConfig, BucketCredentialConfig, CacheConfig, Config, CorsConfig, DeleteActionConfig,
    GetActionConfig, GetActionOptions, HttpMethod, InternalServerConfig, KeyRewrite, ListTargetsConfig, LogConfig, LogFormat,
    MountConfig, OidcAuthConfig, OpaServerConfig, PutActionConfig, PutActionOptions, Resource, ResourceStrategy,
    ServerConfig, TargetConfig, TargetTemplateConfig, TargetTemplateItem, TemplateConfig,
};
pub use credential::CredentialConfig;
pub use error::{ConfigError, Result};
pub use glob::{Glob, GlobError};
pub use manager::ConfigManager;
