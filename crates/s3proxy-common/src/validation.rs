//! Configuration validation
//!
//! Runs after defaults and credentials have been applied. Checks that serde
//! cannot express: cross references between resources and providers, mount
//! path shapes and action declarations.

use crate::config::{Config, MountConfig, OidcAuthConfig, Resource, ResourceStrategy};
use crate::error::{ConfigError, Result};
use std::collections::HashSet;

/// Validate a fully loaded configuration
pub fn validate(config: &Config) -> Result<()> {
    for (name, provider) in &config.auth_providers.oidc {
        validate_oidc_provider(name, provider)?;
    }

    if config.list_targets.enabled {
        let field = "list_targets";
        if config.list_targets.mount.path.is_empty() {
            return Err(ConfigError::validation(
                format!("{field}.mount.path"),
                "at least one path is required when the target list is enabled",
            ));
        }
        validate_mount(field, &config.list_targets.mount)?;
        if let Some(resource) = &config.list_targets.resource {
            validate_resource(config, &format!("{field}.resource"), resource)?;
        }
    }

    let mut names = HashSet::new();
    for (i, target) in config.targets.iter().enumerate() {
        let field = format!("targets[{i}]");

        if target.name.is_empty() {
            return Err(ConfigError::validation(format!("{field}.name"), "must not be empty"));
        }
        if !names.insert(target.name.as_str()) {
            return Err(ConfigError::validation(
                format!("{field}.name"),
                format!("target {} is declared twice", target.name),
            ));
        }
        if target.bucket.name.is_empty() {
            return Err(ConfigError::validation(
                format!("{field}.bucket.name"),
                "must not be empty",
            ));
        }
        if target.bucket.s3_list_max_keys <= 0 {
            return Err(ConfigError::validation(
                format!("{field}.bucket.s3_list_max_keys"),
                "must be greater than 0",
            ));
        }
        if target.mount.path.is_empty() {
            return Err(ConfigError::validation(
                format!("{field}.mount.path"),
                "at least one path is required",
            ));
        }
        validate_mount(&field, &target.mount)?;

        let actions = &target.actions;
        if actions.get.is_none() && actions.put.is_none() && actions.delete.is_none() {
            return Err(ConfigError::validation(
                format!("{field}.actions"),
                "at least one action must be declared",
            ));
        }
        if target.get_action().is_none()
            && target.put_action().is_none()
            && target.delete_action().is_none()
        {
            return Err(ConfigError::validation(
                format!("{field}.actions"),
                "at least one action must be enabled",
            ));
        }

        for (j, resource) in target.resources.iter().enumerate() {
            let res_field = format!("{field}.resources[{j}]");
            validate_resource(config, &res_field, resource)?;

            if !target
                .mount
                .path
                .iter()
                .any(|mount| resource.path.starts_with(mount.as_str()))
            {
                return Err(ConfigError::validation(
                    format!("{res_field}.path"),
                    format!(
                        "resource path {} must start with one of the target mount paths {:?}",
                        resource.path, target.mount.path
                    ),
                ));
            }
        }
    }

    Ok(())
}

fn validate_mount(field: &str, mount: &MountConfig) -> Result<()> {
    for (i, path) in mount.path.iter().enumerate() {
        if !path.starts_with('/') || !path.ends_with('/') {
            return Err(ConfigError::validation(
                format!("{field}.mount.path[{i}]"),
                format!("mount path {path} must start and end with /"),
            ));
        }
    }
    Ok(())
}

fn validate_oidc_provider(name: &str, provider: &OidcAuthConfig) -> Result<()> {
    let field = format!("auth_providers.oidc.{name}");

    for (key, value) in [
        ("client_id", &provider.client_id),
        ("issuer_url", &provider.issuer_url),
        ("redirect_url", &provider.redirect_url),
        ("state", &provider.state),
    ] {
        if value.is_empty() {
            return Err(ConfigError::validation(format!("{field}.{key}"), "must not be empty"));
        }
    }

    if provider.state.contains(':') {
        return Err(ConfigError::validation(
            format!("{field}.state"),
            "must not contain ':'",
        ));
    }
    if provider.callback_path == "/" {
        return Err(ConfigError::validation(
            format!("{field}.callback_path"),
            "must not be /",
        ));
    }
    if provider.login_path == "/" {
        return Err(ConfigError::validation(
            format!("{field}.login_path"),
            "must not be /",
        ));
    }
    if provider.login_path == provider.callback_path {
        return Err(ConfigError::validation(
            format!("{field}.login_path"),
            "must be different from callback_path",
        ));
    }

    Ok(())
}

fn validate_resource(config: &Config, field: &str, resource: &Resource) -> Result<()> {
    let providers = &config.auth_providers;

    match &resource.strategy {
        ResourceStrategy::Whitelist => {}
        ResourceStrategy::Basic {
            provider,
            credentials,
        } => {
            if !providers.basic.contains_key(provider) {
                return Err(ConfigError::validation(
                    format!("{field}.provider"),
                    format!("basic provider {provider} is not declared"),
                ));
            }
            for (i, credential) in credentials.iter().enumerate() {
                if credential.user.is_empty() {
                    return Err(ConfigError::validation(
                        format!("{field}.basic.credentials[{i}].user"),
                        "must not be empty",
                    ));
                }
                if credential.password.value().is_empty() {
                    return Err(ConfigError::validation(
                        format!("{field}.basic.credentials[{i}].password"),
                        "must not be empty",
                    ));
                }
            }
        }
        ResourceStrategy::OidcAccessList { provider, .. }
        | ResourceStrategy::OidcPolicyServer { provider, .. } => {
            if !providers.oidc.contains_key(provider) {
                return Err(ConfigError::validation(
                    format!("{field}.provider"),
                    format!("oidc provider {provider} is not declared"),
                ));
            }
            if let ResourceStrategy::OidcPolicyServer { server, .. } = &resource.strategy {
                if server.url.is_empty() {
                    return Err(ConfigError::validation(
                        format!("{field}.oidc.authorization_opa_server.url"),
                        "must not be empty",
                    ));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ActionsConfig, BasicAuthConfig, BasicCredential, BucketConfig, DeleteActionConfig,
        GetActionConfig, HttpMethod, TargetConfig,
    };
    use crate::credential::CredentialConfig;

    fn bucket() -> BucketConfig {
        BucketConfig {
            name: "bucket".to_string(),
            prefix: String::new(),
            region: "us-east-1".to_string(),
            s3_endpoint: String::new(),
            disable_ssl: false,
            s3_list_max_keys: 1000,
            credentials: None,
        }
    }

    fn target(mount: &str) -> TargetConfig {
        TargetConfig {
            name: "docs".to_string(),
            bucket: bucket(),
            mount: MountConfig {
                host: String::new(),
                path: vec![mount.to_string()],
            },
            resources: Vec::new(),
            actions: ActionsConfig {
                get: Some(GetActionConfig {
                    enabled: true,
                    ..GetActionConfig::default()
                }),
                ..ActionsConfig::default()
            },
            templates: None,
            key_rewrite_list: Vec::new(),
        }
    }

    fn config_with(target: TargetConfig) -> Config {
        Config {
            targets: vec![target],
            ..Config::default()
        }
    }

    fn basic_resource(path: &str, provider: &str, password: &str) -> Resource {
        Resource {
            path: path.to_string(),
            methods: vec![HttpMethod::Get],
            strategy: ResourceStrategy::Basic {
                provider: provider.to_string(),
                credentials: vec![BasicCredential {
                    user: "user".to_string(),
                    password: CredentialConfig::inline(password),
                }],
            },
        }
    }

    #[test]
    fn test_valid_minimal_target() {
        validate(&config_with(target("/docs/"))).unwrap();
    }

    #[test]
    fn test_mount_path_shape() {
        let err = validate(&config_with(target("/docs"))).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "targets[0].mount.path[0]"));

        assert!(validate(&config_with(target("docs/"))).is_err());
    }

    #[test]
    fn test_actions_must_be_declared_and_enabled() {
        let mut t = target("/docs/");
        t.actions = ActionsConfig::default();
        assert!(validate(&config_with(t)).is_err());

        let mut t = target("/docs/");
        t.actions = ActionsConfig {
            delete: Some(DeleteActionConfig { enabled: false }),
            ..ActionsConfig::default()
        };
        let err = validate(&config_with(t)).unwrap_err();
        assert!(err.to_string().contains("enabled"));
    }

    #[test]
    fn test_resource_provider_must_exist() {
        let mut t = target("/docs/");
        t.resources.push(basic_resource("/docs/*", "missing", "pw"));
        let err = validate(&config_with(t)).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_resource_provider_kind_must_match() {
        let mut t = target("/docs/");
        t.resources.push(Resource {
            path: "/docs/*".to_string(),
            methods: vec![HttpMethod::Get],
            strategy: ResourceStrategy::OidcAccessList {
                provider: "corp".to_string(),
                accesses: Vec::new(),
            },
        });
        let mut config = config_with(t);
        config.auth_providers.basic.insert(
            "corp".to_string(),
            BasicAuthConfig {
                realm: "corp".to_string(),
            },
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_resource_path_must_be_under_mount() {
        let mut t = target("/docs/");
        t.resources.push(basic_resource("/other/*", "corp", "pw"));
        let mut config = config_with(t);
        config.auth_providers.basic.insert(
            "corp".to_string(),
            BasicAuthConfig {
                realm: "corp".to_string(),
            },
        );
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "targets[0].resources[0].path"));
    }

    #[test]
    fn test_empty_basic_password_rejected() {
        let mut t = target("/docs/");
        t.resources.push(basic_resource("/docs/*", "corp", ""));
        let mut config = config_with(t);
        config.auth_providers.basic.insert(
            "corp".to_string(),
            BasicAuthConfig {
                realm: "corp".to_string(),
            },
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_oidc_paths_and_state() {
        let mut provider: OidcAuthConfig = serde_json::from_str(
            r#"{"client_id":"c","issuer_url":"http://idp","redirect_url":"http://proxy","state":"s"}"#,
        )
        .unwrap();
        provider.apply_defaults("corp");
        validate_oidc_provider("corp", &provider).unwrap();

        let mut bad_state = provider.clone();
        bad_state.state = "a:b".to_string();
        assert!(validate_oidc_provider("corp", &bad_state).is_err());

        let mut root_login = provider.clone();
        root_login.login_path = "/".to_string();
        assert!(validate_oidc_provider("corp", &root_login).is_err());

        let mut same = provider;
        same.login_path = same.callback_path.clone();
        assert!(validate_oidc_provider("corp", &same).is_err());
    }
}
