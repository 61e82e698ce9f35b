//! Configuration model for s3proxy
//!
//! Structures mirror the configuration file. Keys are snake_case. Defaults are
//! applied by serde for plain values and by the loader for values that depend
//! on other fields (OIDC login/callback paths, resource methods).

use crate::credential::CredentialConfig;
use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default business server port
pub const DEFAULT_PORT: u16 = 8080;
/// Default internal server port
pub const DEFAULT_INTERNAL_PORT: u16 = 9090;
/// Default bucket region
pub const DEFAULT_BUCKET_REGION: &str = "us-east-1";
/// Default maximum number of keys gathered by one listing
pub const DEFAULT_BUCKET_S3_LIST_MAX_KEYS: i32 = 1000;
/// Default OIDC group claim
pub const DEFAULT_OIDC_GROUP_CLAIM: &str = "groups";
/// Default OIDC cookie name
pub const DEFAULT_OIDC_COOKIE_NAME: &str = "oidc";

/// Root configuration
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    /// Logging
    #[serde(default)]
    pub log: LogConfig,
    /// Business server
    #[serde(default)]
    pub server: ServerConfig,
    /// Internal server (health, metrics)
    #[serde(default)]
    pub internal_server: InternalServerConfig,
    /// General templates
    #[serde(default)]
    pub templates: TemplateConfig,
    /// Identity providers, referenced by resources
    #[serde(default)]
    pub auth_providers: AuthProviderConfig,
    /// Target list endpoint
    #[serde(default)]
    pub list_targets: ListTargetsConfig,
    /// Proxied buckets
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// Find a target by name
    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Logging configuration
#[derive(Clone, Debug, Deserialize)]
pub struct LogConfig {
    /// Level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Business server configuration
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// Listen address, empty means all interfaces
    #[serde(default)]
    pub listen_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: Option<CorsConfig>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: String::new(),
            port: DEFAULT_PORT,
            cors: None,
            cache: None,
        }
    }
}

/// Internal server configuration
#[derive(Clone, Debug, Deserialize)]
pub struct InternalServerConfig {
    #[serde(default)]
    pub listen_addr: String,
    #[serde(default = "default_internal_port")]
    pub port: u16,
}

fn default_internal_port() -> u16 {
    DEFAULT_INTERNAL_PORT
}

impl Default for InternalServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: String::new(),
            port: DEFAULT_INTERNAL_PORT,
        }
    }
}

/// CORS configuration
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Allow every origin, method and header
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default)]
    pub allow_methods: Vec<String>,
    #[serde(default)]
    pub allow_headers: Vec<String>,
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// Preflight cache duration in seconds
    #[serde(default)]
    pub max_age: Option<u64>,
    #[serde(default)]
    pub allow_credentials: Option<bool>,
}

/// Response cache headers
#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
    /// Force the no-cache header set
    #[serde(default = "default_true")]
    pub no_cache_enabled: bool,
    #[serde(default)]
    pub expires: String,
    #[serde(default)]
    pub cache_control: String,
    #[serde(default)]
    pub pragma: String,
    #[serde(default)]
    pub x_accel_expires: String,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            no_cache_enabled: true,
            expires: String::new(),
            cache_control: String::new(),
            pragma: String::new(),
            x_accel_expires: String::new(),
        }
    }
}

/// General template files, read from the local filesystem
#[derive(Clone, Debug, Deserialize)]
pub struct TemplateConfig {
    #[serde(default = "default_folder_list_template")]
    pub folder_list: String,
    #[serde(default = "default_target_list_template")]
    pub target_list: String,
    #[serde(default = "default_not_found_template")]
    pub not_found: String,
    #[serde(default = "default_internal_server_error_template")]
    pub internal_server_error: String,
    #[serde(default = "default_unauthorized_template")]
    pub unauthorized: String,
    #[serde(default = "default_forbidden_template")]
    pub forbidden: String,
    #[serde(default = "default_bad_request_template")]
    pub bad_request: String,
}

fn default_folder_list_template() -> String {
    "templates/folder-list.tpl".to_string()
}

fn default_target_list_template() -> String {
    "templates/target-list.tpl".to_string()
}

fn default_not_found_template() -> String {
    "templates/not-found.tpl".to_string()
}

fn default_internal_server_error_template() -> String {
    "templates/internal-server-error.tpl".to_string()
}

fn default_unauthorized_template() -> String {
    "templates/unauthorized.tpl".to_string()
}

fn default_forbidden_template() -> String {
    "templates/forbidden.tpl".to_string()
}

fn default_bad_request_template() -> String {
    "templates/bad-request.tpl".to_string()
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            folder_list: default_folder_list_template(),
            target_list: default_target_list_template(),
            not_found: default_not_found_template(),
            internal_server_error: default_internal_server_error_template(),
            unauthorized: default_unauthorized_template(),
            forbidden: default_forbidden_template(),
            bad_request: default_bad_request_template(),
        }
    }
}

/// Declared identity providers
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthProviderConfig {
    #[serde(default)]
    pub basic: BTreeMap<String, BasicAuthConfig>,
    /// Keyed by provider name. Tokens are tried against the providers in
    /// name order, not in declaration order.
    #[serde(default)]
    pub oidc: BTreeMap<String, OidcAuthConfig>,
}

/// Basic authentication provider
#[derive(Clone, Debug, Deserialize)]
pub struct BasicAuthConfig {
    /// Realm sent in the `WWW-Authenticate` challenge
    pub realm: String,
}

/// OpenID Connect provider
#[derive(Clone, Debug, Deserialize)]
pub struct OidcAuthConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<CredentialConfig>,
    pub issuer_url: String,
    /// External base URL of this proxy, the callback path is appended to it
    pub redirect_url: String,
    #[serde(default = "default_oidc_scopes")]
    pub scopes: Vec<String>,
    /// CSRF state sent to and expected back from the provider
    pub state: String,
    #[serde(default = "default_oidc_group_claim")]
    pub group_claim: String,
    #[serde(default = "default_oidc_cookie_name")]
    pub cookie_name: String,
    /// Require `email_verified = true` in tokens
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub cookie_secure: bool,
    /// Defaults to `/auth/<provider>`
    #[serde(default)]
    pub login_path: String,
    /// Defaults to `/auth/<provider>/callback`
    #[serde(default)]
    pub callback_path: String,
}

fn default_oidc_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string(), "email".to_string()]
}

fn default_oidc_group_claim() -> String {
    DEFAULT_OIDC_GROUP_CLAIM.to_string()
}

fn default_oidc_cookie_name() -> String {
    DEFAULT_OIDC_COOKIE_NAME.to_string()
}

impl OidcAuthConfig {
    /// Fill login and callback paths derived from the provider name
    pub fn apply_defaults(&mut self, name: &str) {
        if self.login_path.is_empty() {
            self.login_path = format!("/auth/{name}");
        }
        if self.callback_path.is_empty() {
            self.callback_path = format!("/auth/{name}/callback");
        }
    }

    /// Resolved client secret, empty for public clients
    pub fn client_secret(&self) -> &str {
        self.client_secret
            .as_ref()
            .map(CredentialConfig::value)
            .unwrap_or_default()
    }
}

/// Target list endpoint
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListTargetsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mount: MountConfig,
    #[serde(default)]
    pub resource: Option<Resource>,
}

/// Where a target is exposed
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MountConfig {
    /// Host or host glob, empty for any host
    #[serde(default)]
    pub host: String,
    /// Mount paths, each starting and ending with `/`
    #[serde(default)]
    pub path: Vec<String>,
}

/// A proxied bucket
#[derive(Clone, Debug, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub bucket: BucketConfig,
    pub mount: MountConfig,
    /// Ordered access rules, first match wins
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub templates: Option<TargetTemplateConfig>,
    /// Key rewrites applied to storage keys, first match wins
    #[serde(default)]
    pub key_rewrite_list: Vec<KeyRewrite>,
}

impl TargetConfig {
    /// Rewrite a storage key with the first matching rule.
    ///
    /// The result is the rule target with `$n`/`$name` expanded from the
    /// source captures. Keys matching no rule are returned unchanged.
    pub fn rewrite_key(&self, key: &str) -> String {
        self.key_rewrite_list
            .iter()
            .find_map(|rule| rule.apply(key))
            .unwrap_or_else(|| key.to_string())
    }

    /// GET action when declared and enabled
    pub fn get_action(&self) -> Option<&GetActionConfig> {
        self.actions.get.as_ref().filter(|a| a.enabled)
    }

    /// PUT action when declared and enabled
    pub fn put_action(&self) -> Option<&PutActionConfig> {
        self.actions.put.as_ref().filter(|a| a.enabled)
    }

    /// DELETE action when declared and enabled
    pub fn delete_action(&self) -> Option<&DeleteActionConfig> {
        self.actions.delete.as_ref().filter(|a| a.enabled)
    }
}

/// Storage key rewrite rule
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "RawKeyRewrite")]
pub struct KeyRewrite {
    /// Regex matched against the storage key, compiled at load
    pub source: Regex,
    /// Replacement, may reference captures of `source`
    pub target: String,
}

impl KeyRewrite {
    pub fn new(source: &str, target: impl Into<String>) -> Result<Self, ConfigError> {
        let source = Regex::new(source).map_err(|e| ConfigError::validation("key_rewrite_list", e.to_string()))?;
        Ok(Self {
            source,
            target: target.into(),
        })
    }

    /// Rewritten key, `None` when the source does not match
    pub fn apply(&self, key: &str) -> Option<String> {
        let captures = self.source.captures(key)?;
        let mut rewritten = String::new();
        captures.expand(&self.target, &mut rewritten);
        Some(rewritten)
    }
}

#[derive(Deserialize)]
struct RawKeyRewrite {
    source: String,
    target: String,
}

impl TryFrom<RawKeyRewrite> for KeyRewrite {
    type Error = ConfigError;

    fn try_from(raw: RawKeyRewrite) -> Result<Self, Self::Error> {
        Self::new(&raw.source, raw.target)
    }
}

/// Backing bucket
#[derive(Clone, Debug, Deserialize)]
pub struct BucketConfig {
    pub name: String,
    /// Root prefix under which the target content lives
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_bucket_region")]
    pub region: String,
    /// Custom endpoint for S3 compatible stores
    #[serde(default)]
    pub s3_endpoint: String,
    #[serde(default)]
    pub disable_ssl: bool,
    /// Maximum number of keys gathered by one listing
    #[serde(default = "default_s3_list_max_keys")]
    pub s3_list_max_keys: i32,
    #[serde(default)]
    pub credentials: Option<BucketCredentialConfig>,
}

fn default_bucket_region() -> String {
    DEFAULT_BUCKET_REGION.to_string()
}

fn default_s3_list_max_keys() -> i32 {
    DEFAULT_BUCKET_S3_LIST_MAX_KEYS
}

impl BucketConfig {
    /// Prefix with a trailing `/` appended when it is not empty
    pub fn root_prefix(&self) -> String {
        let mut key = self.prefix.clone();
        if !key.is_empty() && !key.ends_with('/') {
            key.push('/');
        }
        key
    }
}

/// Static bucket credentials
#[derive(Clone, Debug, Deserialize)]
pub struct BucketCredentialConfig {
    pub access_key: CredentialConfig,
    pub secret_key: CredentialConfig,
}

/// Actions allowed on a target
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ActionsConfig {
    #[serde(default)]
    pub get: Option<GetActionConfig>,
    #[serde(default)]
    pub put: Option<PutActionConfig>,
    #[serde(default)]
    pub delete: Option<DeleteActionConfig>,
}

/// GET action
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GetActionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub config: GetActionOptions,
}

/// GET action options
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GetActionOptions {
    /// Answer a missing object with a redirect to the same path plus `/`
    #[serde(default)]
    pub redirect_with_trailing_slash_for_not_found_file: bool,
    /// Object served instead of the listing when present in the folder
    #[serde(default)]
    pub index_document: Option<String>,
}

/// PUT action
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PutActionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub config: PutActionOptions,
}

/// PUT action options
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PutActionOptions {
    /// User metadata stored with every uploaded object
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub storage_class: Option<String>,
    /// Allow uploads to replace an existing object
    #[serde(default)]
    pub allow_override: bool,
}

/// DELETE action
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeleteActionConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Per target template overrides
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TargetTemplateConfig {
    #[serde(default)]
    pub folder_list: Option<TargetTemplateItem>,
    #[serde(default)]
    pub not_found: Option<TargetTemplateItem>,
    #[serde(default)]
    pub internal_server_error: Option<TargetTemplateItem>,
    #[serde(default)]
    pub forbidden: Option<TargetTemplateItem>,
    #[serde(default)]
    pub unauthorized: Option<TargetTemplateItem>,
    #[serde(default)]
    pub bad_request: Option<TargetTemplateItem>,
    /// Body of a successful PUT, 204 without body when absent
    #[serde(default)]
    pub put: Option<TargetTemplateItem>,
    /// Body of a successful DELETE, 204 without body when absent
    #[serde(default)]
    pub delete: Option<TargetTemplateItem>,
}

/// Template location
#[derive(Clone, Debug, Deserialize)]
pub struct TargetTemplateItem {
    pub path: String,
    /// Read the template from the target bucket instead of the filesystem
    #[serde(default)]
    pub in_bucket: bool,
}

/// HTTP methods a resource can allow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Parse a request method, `None` for methods resources cannot name
    pub fn from_request_method(method: &str) -> Option<Self> {
        match method {
            "GET" => Some(Self::Get),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access rule attached to a target or to the target list endpoint
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "RawResource")]
pub struct Resource {
    /// Glob matched against the full request URI
    pub path: String,
    /// Allowed methods, never empty
    pub methods: Vec<HttpMethod>,
    pub strategy: ResourceStrategy,
}

impl Resource {
    /// Name of the referenced provider, `None` for whitelisted resources
    pub fn provider(&self) -> Option<&str> {
        match &self.strategy {
            ResourceStrategy::Whitelist => None,
            ResourceStrategy::Basic { provider, .. }
            | ResourceStrategy::OidcAccessList { provider, .. }
            | ResourceStrategy::OidcPolicyServer { provider, .. } => Some(provider),
        }
    }
}

/// How a matched resource authorizes a request
#[derive(Clone, Debug)]
pub enum ResourceStrategy {
    /// Open to anyone
    Whitelist,
    /// HTTP Basic against an inline credential list
    Basic {
        provider: String,
        credentials: Vec<BasicCredential>,
    },
    /// OIDC principal checked against group/email rules, empty list allows all
    OidcAccessList {
        provider: String,
        accesses: Vec<AuthorizationAccess>,
    },
    /// OIDC principal checked by an external policy server
    OidcPolicyServer {
        provider: String,
        server: OpaServerConfig,
    },
}

/// Inline basic credential
#[derive(Clone, Debug, Deserialize)]
pub struct BasicCredential {
    pub user: String,
    pub password: CredentialConfig,
}

/// External policy server
#[derive(Clone, Debug, Deserialize)]
pub struct OpaServerConfig {
    pub url: String,
    /// Static tags forwarded in the policy input
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Value matcher of an authorization rule
#[derive(Clone, Debug)]
pub enum AccessMatcher {
    Exact(String),
    Regex(Regex),
}

impl AccessMatcher {
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == value,
            Self::Regex(re) => re.is_match(value),
        }
    }
}

/// Group or email rule granting access to an OIDC principal
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "RawAuthorizationAccess")]
pub struct AuthorizationAccess {
    pub group: Option<AccessMatcher>,
    pub email: Option<AccessMatcher>,
}

impl AuthorizationAccess {
    /// Build a rule; regular expressions are compiled here
    pub fn new(group: Option<&str>, email: Option<&str>, regexp: bool) -> Result<Self, ConfigError> {
        let compile = |value: &str, field: &str| -> Result<AccessMatcher, ConfigError> {
            if regexp {
                Regex::new(value)
                    .map(AccessMatcher::Regex)
                    .map_err(|e| ConfigError::validation(field, e.to_string()))
            } else {
                Ok(AccessMatcher::Exact(value.to_string()))
            }
        };

        let group = group
            .filter(|g| !g.is_empty())
            .map(|g| compile(g, "group"))
            .transpose()?;
        let email = email
            .filter(|e| !e.is_empty())
            .map(|e| compile(e, "email"))
            .transpose()?;

        if group.is_none() && email.is_none() {
            return Err(ConfigError::validation(
                "authorization_accesses",
                "group or email must be set",
            ));
        }

        Ok(Self { group, email })
    }
}

#[derive(Deserialize)]
struct RawAuthorizationAccess {
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    regexp: bool,
}

impl TryFrom<RawAuthorizationAccess> for AuthorizationAccess {
    type Error = ConfigError;

    fn try_from(raw: RawAuthorizationAccess) -> Result<Self, Self::Error> {
        Self::new(raw.group.as_deref(), raw.email.as_deref(), raw.regexp)
    }
}

#[derive(Deserialize)]
struct RawResource {
    path: String,
    #[serde(default)]
    methods: Vec<HttpMethod>,
    #[serde(default)]
    white_list: Option<bool>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    basic: Option<RawResourceBasic>,
    #[serde(default)]
    oidc: Option<RawResourceOidc>,
}

#[derive(Deserialize)]
struct RawResourceBasic {
    #[serde(default)]
    credentials: Vec<BasicCredential>,
}

#[derive(Deserialize)]
struct RawResourceOidc {
    #[serde(default)]
    authorization_accesses: Vec<AuthorizationAccess>,
    #[serde(default)]
    authorization_opa_server: Option<OpaServerConfig>,
}

impl TryFrom<RawResource> for Resource {
    type Error = ConfigError;

    fn try_from(raw: RawResource) -> Result<Self, Self::Error> {
        let field = format!("resource {}", raw.path);
        let whitelist = raw.white_list.unwrap_or(false);

        let methods = if raw.methods.is_empty() {
            vec![HttpMethod::Get]
        } else {
            raw.methods
        };

        let provider = raw.provider.filter(|p| !p.is_empty());
        let require_provider = || {
            provider
                .clone()
                .ok_or_else(|| ConfigError::validation(&field, "provider must be set"))
        };

        let strategy = match (whitelist, raw.basic, raw.oidc) {
            (true, None, None) if provider.is_some() => {
                return Err(ConfigError::validation(
                    &field,
                    "provider cannot be set on a white_list resource",
                ));
            }
            (true, None, None) => ResourceStrategy::Whitelist,
            (false, Some(basic), None) => ResourceStrategy::Basic {
                provider: require_provider()?,
                credentials: basic.credentials,
            },
            (false, None, Some(oidc)) => match oidc.authorization_opa_server {
                Some(_) if !oidc.authorization_accesses.is_empty() => {
                    return Err(ConfigError::validation(
                        &field,
                        "authorization_accesses and authorization_opa_server cannot be used together",
                    ));
                }
                Some(server) => ResourceStrategy::OidcPolicyServer {
                    provider: require_provider()?,
                    server,
                },
                None => ResourceStrategy::OidcAccessList {
                    provider: require_provider()?,
                    accesses: oidc.authorization_accesses,
                },
            },
            _ => {
                return Err(ConfigError::validation(
                    &field,
                    "exactly one of white_list, basic or oidc must be declared",
                ));
            }
        };

        Ok(Self {
            path: raw.path,
            methods,
            strategy,
        })
    }
}
