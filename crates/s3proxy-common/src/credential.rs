//! Secret values that can come from a file, an environment variable or the
//! configuration itself.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};

/// A secret reference
///
/// Exactly one source is expected. After [`CredentialConfig::resolve`] the
/// secret is available through [`CredentialConfig::value`] regardless of the
/// source it was declared with.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialConfig {
    /// File holding the secret, surrounding whitespace trimmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Environment variable holding the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// Inline secret
    #[serde(default, skip_serializing)]
    pub value: Option<String>,
}

impl CredentialConfig {
    /// Inline credential, mostly useful in tests
    pub fn inline(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Resolved secret, empty when nothing was resolved
    pub fn value(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }

    /// Load the secret from its declared source into `value`
    ///
    /// `field` is only used to name the credential in errors.
    pub fn resolve(&mut self, field: &str) -> Result<()> {
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            let content =
                std::fs::read_to_string(path).map_err(|source| ConfigError::CredentialFile {
                    path: path.to_string(),
                    source,
                })?;
            self.value = Some(content.trim().to_string());
            return Ok(());
        }

        if let Some(env) = self.env.as_deref().filter(|e| !e.is_empty()) {
            let content = std::env::var(env).unwrap_or_default();
            if content.is_empty() {
                return Err(ConfigError::EmptyEnvCredential(env.to_string()));
            }
            self.value = Some(content);
            return Ok(());
        }

        if self.value.is_some() {
            return Ok(());
        }

        Err(ConfigError::EmptyCredential(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_inline_value() {
        let mut cred = CredentialConfig::inline("secret");
        cred.resolve("cred").unwrap();
        assert_eq!(cred.value(), "secret");
    }

    #[test]
    fn test_file_value_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();

        let mut cred = CredentialConfig {
            path: Some(file.path().display().to_string()),
            ..CredentialConfig::default()
        };
        cred.resolve("cred").unwrap();
        assert_eq!(cred.value(), "from-file");
    }

    #[test]
    fn test_missing_env_is_error() {
        let mut cred = CredentialConfig {
            env: Some("S3PROXY_TEST_CREDENTIAL_THAT_IS_NEVER_SET".to_string()),
            ..CredentialConfig::default()
        };
        let err = cred.resolve("cred").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyEnvCredential(name) if name.ends_with("NEVER_SET")));
    }

    #[test]
    fn test_no_source_is_error() {
        let mut cred = CredentialConfig::default();
        assert!(matches!(
            cred.resolve("targets[0].bucket.credentials.access_key"),
            Err(ConfigError::EmptyCredential(_))
        ));
    }
}
