//! Validated configuration snapshots
//!
//! Requests take one snapshot at their start and keep it until they finish.
//! A reload publishes a new snapshot only after it has been fully loaded and
//! validated, so in-flight requests never observe a partial configuration.

use crate::config::Config;
use crate::error::Result;
use crate::loader;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Holder of the current configuration snapshot
pub struct ConfigManager {
    current: RwLock<Arc<Config>>,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Manager around an already validated configuration, without reload source
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            source: None,
        }
    }

    /// Load the configuration from a file or directory
    pub fn load(source: impl Into<PathBuf>) -> Result<Self> {
        let source = source.into();
        let config = loader::load(&source)?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            source: Some(source),
        })
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    /// Reload from the source, keeping the current snapshot on failure
    pub fn reload(&self) -> Result<Arc<Config>> {
        let Some(source) = &self.source else {
            return Ok(self.snapshot());
        };

        match loader::load(source) {
            Ok(config) => {
                let config = self.replace(config);
                info!("Configuration reloaded from {}", source.display());
                Ok(config)
            }
            Err(e) => {
                error!("Configuration reload failed, keeping previous one: {}", e);
                Err(e)
            }
        }
    }

    /// Publish a new snapshot
    pub fn replace(&self, config: Config) -> Arc<Config> {
        let config = Arc::new(config);
        *self.current.write() = config.clone();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
targets:
  - name: docs
    bucket:
      name: docs-bucket
    mount:
      path: [/docs/]
    actions:
      get:
        enabled: true
"#;

    #[test]
    fn test_snapshot_survives_replace() {
        let manager = ConfigManager::new(Config::default());
        let before = manager.snapshot();
        assert!(before.targets.is_empty());

        let next = loader::load_from_str(BASE, config::FileFormat::Yaml).unwrap();
        manager.replace(next);

        assert!(before.targets.is_empty());
        assert_eq!(manager.snapshot().targets.len(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, BASE).unwrap();

        let manager = ConfigManager::load(&path).unwrap();
        assert_eq!(manager.snapshot().targets[0].name, "docs");

        std::fs::write(&path, BASE.replace("[/docs/]", "[/docs]")).unwrap();
        assert!(manager.reload().is_err());
        assert_eq!(manager.snapshot().targets[0].mount.path, vec!["/docs/"]);

        std::fs::write(&path, BASE.replace("name: docs\n", "name: site\n")).unwrap();
        manager.reload().unwrap();
        assert_eq!(manager.snapshot().targets[0].name, "site");
    }
}
