//! Runtime template rendering
//!
//! Template files are chosen by configuration and may live in the target
//! bucket, so they are loaded and compiled on every use.

use futures::TryStreamExt;
use minijinja::{AutoEscape, Environment};
use s3proxy_storage::{GetRequest, StorageClient, StorageError};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Template loading and rendering errors
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cannot read template {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot load template {key} from bucket: {source}")]
    Storage { key: String, source: StorageError },

    #[error("template {0} is not valid UTF-8")]
    Encoding(String),

    #[error("template rendering failed: {0}")]
    Render(#[from] minijinja::Error),
}

/// Where a template is read from
pub enum TemplateSource {
    File(PathBuf),
    Bucket { key: String, storage: StorageClient },
}

impl TemplateSource {
    pub async fn load(&self) -> Result<String, TemplateError> {
        match self {
            Self::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| TemplateError::Io {
                    path: path.display().to_string(),
                    source,
                }),
            Self::Bucket { key, storage } => {
                let output = storage
                    .get_object(&GetRequest::new(key.clone()))
                    .await
                    .map_err(|source| TemplateError::Storage {
                        key: key.clone(),
                        source,
                    })?;
                let chunks: Vec<bytes::Bytes> = output
                    .body
                    .try_collect()
                    .await
                    .map_err(|e| TemplateError::Storage {
                        key: key.clone(),
                        source: StorageError::Backend(e.to_string()),
                    })?;
                String::from_utf8(chunks.concat()).map_err(|_| TemplateError::Encoding(key.clone()))
            }
        }
    }
}

/// Shared template environment with the proxy filters registered
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.add_filter("human_size", human_size);
        Self { env }
    }

    pub fn render<S: Serialize>(&self, source: &str, context: S) -> Result<String, TemplateError> {
        Ok(self.env.render_str(source, context)?)
    }
}

/// Byte count in base 1024 units, `1.5 KiB`
#[allow(clippy::cast_precision_loss)]
pub fn human_size(bytes: i64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use s3proxy_storage::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1024), "1.0 KiB");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_render_escapes_and_filters() {
        let renderer = TemplateRenderer::new();
        let out = renderer
            .render(
                "{{ name }} {{ size | human_size }}",
                json!({"name": "<b>", "size": 2048}),
            )
            .unwrap();
        assert_eq!(out, "&lt;b&gt; 2.0 KiB");
    }

    #[test]
    fn test_render_error() {
        let renderer = TemplateRenderer::new();
        assert!(matches!(
            renderer.render("{% for %}", json!({})),
            Err(TemplateError::Render(_))
        ));
    }

    #[tokio::test]
    async fn test_load_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nf.tpl");
        std::fs::write(&path, "missing {{ path }}").unwrap();
        assert_eq!(
            TemplateSource::File(path).load().await.unwrap(),
            "missing {{ path }}"
        );
        assert!(matches!(
            TemplateSource::File(dir.path().join("absent.tpl")).load().await,
            Err(TemplateError::Io { .. })
        ));

        let backend = Arc::new(MemoryBackend::new("site"));
        backend.insert("tpl/list.tpl", Bytes::from_static(b"from bucket"), None);
        let storage = StorageClient::new("site", backend, 1000);
        let source = TemplateSource::Bucket {
            key: "tpl/list.tpl".to_string(),
            storage,
        };
        assert_eq!(source.load().await.unwrap(), "from bucket");
    }
}
