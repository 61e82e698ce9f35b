//! Templated responses
//!
//! Every answer that carries a rendered body goes through [`ResponseHandler`].
//! Templates are rendered into memory before the status line is produced, so
//! a failing template turns into an internal error page instead of a
//! truncated success. Object bodies are streamed with [`stream_object`].

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, ETAG, EXPIRES, LAST_MODIFIED,
};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use s3proxy_auth::AuthenticatedUser;
use s3proxy_common::{Config, TargetTemplateConfig, TargetTemplateItem};
use s3proxy_storage::{GetObjectOutput, StorageClient};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt::Display;
use std::sync::Arc;
use tracing::error;

use crate::templates::{TemplateError, TemplateRenderer, TemplateSource};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Template families
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateKind {
    FolderList,
    TargetList,
    NotFound,
    InternalServerError,
    Unauthorized,
    Forbidden,
    BadRequest,
    Put,
    Delete,
}

impl TemplateKind {
    fn target_item(self, templates: &TargetTemplateConfig) -> Option<&TargetTemplateItem> {
        match self {
            Self::FolderList => templates.folder_list.as_ref(),
            Self::NotFound => templates.not_found.as_ref(),
            Self::InternalServerError => templates.internal_server_error.as_ref(),
            Self::Unauthorized => templates.unauthorized.as_ref(),
            Self::Forbidden => templates.forbidden.as_ref(),
            Self::BadRequest => templates.bad_request.as_ref(),
            Self::Put => templates.put.as_ref(),
            Self::Delete => templates.delete.as_ref(),
            Self::TargetList => None,
        }
    }

    fn general_path(self, config: &Config) -> Option<&str> {
        let templates = &config.templates;
        match self {
            Self::FolderList => Some(&templates.folder_list),
            Self::TargetList => Some(&templates.target_list),
            Self::NotFound => Some(&templates.not_found),
            Self::InternalServerError => Some(&templates.internal_server_error),
            Self::Unauthorized => Some(&templates.unauthorized),
            Self::Forbidden => Some(&templates.forbidden),
            Self::BadRequest => Some(&templates.bad_request),
            Self::Put | Self::Delete => None,
        }
    }
}

/// Listing entry handed to the folder list template
#[derive(Clone, Debug, Serialize)]
pub struct EntryView {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub etag: String,
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: i64,
    pub key: String,
    /// Link path under the mount
    pub path: String,
}

struct TargetTemplates {
    overrides: TargetTemplateConfig,
    storage: StorageClient,
}

/// Responder bound to one request
pub struct ResponseHandler {
    renderer: Arc<TemplateRenderer>,
    config: Arc<Config>,
    target: Option<TargetTemplates>,
    path: String,
    user: Option<AuthenticatedUser>,
}

impl ResponseHandler {
    /// Responder using the general template set
    pub fn new(renderer: Arc<TemplateRenderer>, config: Arc<Config>, path: impl Into<String>) -> Self {
        Self {
            renderer,
            config,
            target: None,
            path: path.into(),
            user: None,
        }
    }

    /// Resolve templates through the target overrides first
    #[must_use]
    pub fn with_target(mut self, overrides: Option<&TargetTemplateConfig>, storage: StorageClient) -> Self {
        self.target = Some(TargetTemplates {
            overrides: overrides.cloned().unwrap_or_default(),
            storage,
        });
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: Option<AuthenticatedUser>) -> Self {
        self.user = user;
        self
    }

    fn source(&self, kind: TemplateKind) -> Option<TemplateSource> {
        if let Some(target) = &self.target
            && let Some(item) = kind.target_item(&target.overrides)
        {
            return Some(if item.in_bucket {
                TemplateSource::Bucket {
                    key: item.path.clone(),
                    storage: target.storage.clone(),
                }
            } else {
                TemplateSource::File(item.path.clone().into())
            });
        }

        kind.general_path(&self.config)
            .map(|path| TemplateSource::File(path.into()))
    }

    /// Render `kind`, `None` when no template is configured for it
    async fn render(&self, kind: TemplateKind, mut data: Value) -> Result<Option<String>, TemplateError> {
        let Some(source) = self.source(kind) else {
            return Ok(None);
        };

        if let Value::Object(map) = &mut data {
            map.entry("path").or_insert_with(|| json!(self.path));
            map.insert("user".to_string(), json!(self.user));
        }

        let template = source.load().await?;
        self.renderer.render(&template, data).map(Some)
    }

    async fn templated(&self, kind: TemplateKind, status: StatusCode, data: Value) -> Response {
        match self.render(kind, data).await {
            Ok(Some(body)) => html(status, body),
            Ok(None) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => {
                error!("Template for {:?} failed on {}: {}", kind, self.path, e);
                self.internal_error(&e).await
            }
        }
    }

    /// 500 page, falling back to a fixed body when the template itself fails
    pub async fn internal_error(&self, err: &(dyn Display + Sync)) -> Response {
        let message = err.to_string();
        match self
            .render(TemplateKind::InternalServerError, json!({ "error": message }))
            .await
        {
            Ok(Some(body)) => html(StatusCode::INTERNAL_SERVER_ERROR, body),
            Ok(None) => fallback_internal_error(&message),
            Err(e) => {
                error!("Internal server error template failed on {}: {}", self.path, e);
                fallback_internal_error(&e.to_string())
            }
        }
    }

    pub async fn not_found(&self) -> Response {
        self.templated(TemplateKind::NotFound, StatusCode::NOT_FOUND, json!({}))
            .await
    }

    pub async fn unauthorized(&self, err: &(dyn Display + Sync)) -> Response {
        self.templated(
            TemplateKind::Unauthorized,
            StatusCode::UNAUTHORIZED,
            json!({ "error": err.to_string() }),
        )
        .await
    }

    pub async fn forbidden(&self, err: &(dyn Display + Sync)) -> Response {
        self.templated(
            TemplateKind::Forbidden,
            StatusCode::FORBIDDEN,
            json!({ "error": err.to_string() }),
        )
        .await
    }

    pub async fn bad_request(&self, err: &(dyn Display + Sync)) -> Response {
        self.templated(
            TemplateKind::BadRequest,
            StatusCode::BAD_REQUEST,
            json!({ "error": err.to_string() }),
        )
        .await
    }

    pub async fn folder_list(&self, bucket_name: &str, target_name: &str, entries: &[EntryView]) -> Response {
        self.templated(
            TemplateKind::FolderList,
            StatusCode::OK,
            json!({
                "entries": entries,
                "bucket_name": bucket_name,
                "name": target_name,
            }),
        )
        .await
    }

    pub async fn target_list<T: Serialize + Sync>(&self, targets: &[T]) -> Response {
        self.templated(TemplateKind::TargetList, StatusCode::OK, json!({ "targets": targets }))
            .await
    }

    /// Upload answer, 204 without body unless the target sets a template
    pub async fn put(&self, key: &str, filename: &str, content_type: Option<&str>, size: usize) -> Response {
        self.templated(
            TemplateKind::Put,
            StatusCode::OK,
            json!({
                "key": key,
                "filename": filename,
                "content_type": content_type,
                "content_size": size,
            }),
        )
        .await
    }

    /// Deletion answer, 204 without body unless the target sets a template
    pub async fn delete(&self, key: &str) -> Response {
        self.templated(TemplateKind::Delete, StatusCode::OK, json!({ "key": key }))
            .await
    }
}

fn html(status: StatusCode, body: String) -> Response {
    (status, [(CONTENT_TYPE, HTML_CONTENT_TYPE)], body).into_response()
}

/// Last resort page when the internal error template cannot be rendered
pub fn fallback_internal_error(message: &str) -> Response {
    html(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!(
            "<!DOCTYPE html>\n<html>\n  <body>\n    <h1>Internal Server Error</h1>\n    <p>{message}</p>\n  </body>\n</html>\n"
        ),
    )
}

/// RFC 7231 date, `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// 206 when the backend answered a range that does not span the object
pub fn object_status(content_range: Option<&str>, content_length: i64) -> StatusCode {
    let total = content_range
        .and_then(|range| range.rsplit_once('/'))
        .and_then(|(_, total)| total.trim().parse::<i64>().ok());

    match (content_range, total) {
        (Some(_), Some(total)) if total == content_length => StatusCode::OK,
        (Some(_), _) => StatusCode::PARTIAL_CONTENT,
        (None, _) => StatusCode::OK,
    }
}

/// Stream an object with the headers reported by the backend
pub fn stream_object(output: GetObjectOutput) -> Response {
    let meta = output.metadata;
    let mut headers = HeaderMap::new();

    let mut set = |name: HeaderName, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty())
            && let Ok(value) = HeaderValue::from_str(&value)
        {
            headers.insert(name, value);
        }
    };

    set(CACHE_CONTROL, meta.cache_control);
    set(EXPIRES, meta.expires);
    set(CONTENT_DISPOSITION, meta.content_disposition);
    set(CONTENT_ENCODING, meta.content_encoding);
    set(CONTENT_LANGUAGE, meta.content_language);
    set(CONTENT_LENGTH, Some(meta.content_length.to_string()));
    set(CONTENT_RANGE, meta.content_range.clone());
    set(CONTENT_TYPE, meta.content_type);
    set(ETAG, meta.etag);
    set(LAST_MODIFIED, meta.last_modified.as_ref().map(http_date));

    let status = object_status(meta.content_range.as_deref(), meta.content_length);
    (status, headers, Body::from_stream(output.body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use http_body_util::BodyExt;
    use s3proxy_common::TemplateConfig;
    use s3proxy_storage::{MemoryBackend, ObjectMetadata};
    use std::path::Path;

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn config(dir: &Path) -> Arc<Config> {
        let file = |name: &str| dir.join(name).display().to_string();
        Arc::new(Config {
            templates: TemplateConfig {
                folder_list: file("folder-list.tpl"),
                target_list: file("target-list.tpl"),
                not_found: file("not-found.tpl"),
                internal_server_error: file("internal-server-error.tpl"),
                unauthorized: file("unauthorized.tpl"),
                forbidden: file("forbidden.tpl"),
                bad_request: file("bad-request.tpl"),
            },
            ..Default::default()
        })
    }

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_object_status() {
        assert_eq!(object_status(None, 10), StatusCode::OK);
        assert_eq!(object_status(Some("bytes 0-9/10"), 10), StatusCode::OK);
        assert_eq!(object_status(Some("bytes 2-4/10"), 3), StatusCode::PARTIAL_CONTENT);
        assert_eq!(object_status(Some("bytes 2-4/*"), 3), StatusCode::PARTIAL_CONTENT);
    }

    #[tokio::test]
    async fn test_general_templates() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "not-found.tpl", "nothing at {{ path }}");
        write(dir.path(), "forbidden.tpl", "no: {{ error }}");
        let handler = ResponseHandler::new(Arc::new(TemplateRenderer::new()), config(dir.path()), "/docs/x");

        let response = handler.not_found().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], HTML_CONTENT_TYPE);
        assert_eq!(body_string(response).await, "nothing at /docs/x");

        let response = handler.forbidden(&"denied").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, "no: denied");
    }

    #[tokio::test]
    async fn test_broken_template_becomes_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "folder-list.tpl", "{% for e in entries %}");
        write(dir.path(), "internal-server-error.tpl", "oops: {{ error }}");
        let handler = ResponseHandler::new(Arc::new(TemplateRenderer::new()), config(dir.path()), "/docs/");

        let response = handler.folder_list("bucket", "docs", &[]).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(response).await.starts_with("oops: template rendering failed"));
    }

    #[tokio::test]
    async fn test_fallback_when_internal_template_fails() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ResponseHandler::new(Arc::new(TemplateRenderer::new()), config(dir.path()), "/docs/");

        let response = handler.internal_error(&"backend down").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert!(body.contains("<h1>Internal Server Error</h1>"));
        assert!(body.contains("internal-server-error.tpl"));
    }

    #[tokio::test]
    async fn test_target_overrides() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "not-found.tpl", "general");
        let backend = Arc::new(MemoryBackend::new("site"));
        backend.insert("_tpl/nf.tpl", Bytes::from_static(b"bucket {{ path }}"), None);
        backend.insert("_tpl/put.tpl", Bytes::from_static(b"stored {{ key }}"), None);
        let storage = StorageClient::new("site", backend, 1000);

        let overrides = TargetTemplateConfig {
            not_found: Some(TargetTemplateItem {
                path: "_tpl/nf.tpl".to_string(),
                in_bucket: true,
            }),
            put: Some(TargetTemplateItem {
                path: "_tpl/put.tpl".to_string(),
                in_bucket: true,
            }),
            ..Default::default()
        };
        let handler = ResponseHandler::new(Arc::new(TemplateRenderer::new()), config(dir.path()), "/site/a")
            .with_target(Some(&overrides), storage.clone());

        assert_eq!(body_string(handler.not_found().await).await, "bucket /site/a");

        let response = handler.put("a/b.txt", "b.txt", None, 3).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "stored a/b.txt");

        // no delete template configured
        assert_eq!(handler.delete("a/b.txt").await.status(), StatusCode::NO_CONTENT);

        let plain = ResponseHandler::new(Arc::new(TemplateRenderer::new()), config(dir.path()), "/site/a")
            .with_target(None, storage);
        assert_eq!(body_string(plain.not_found().await).await, "general");
    }

    #[tokio::test]
    async fn test_stream_object_headers() {
        let output = GetObjectOutput {
            metadata: ObjectMetadata {
                content_length: 5,
                content_type: Some("text/plain".to_string()),
                etag: Some("\"abc\"".to_string()),
                cache_control: Some("max-age=60".to_string()),
                ..Default::default()
            },
            body: futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"hello"))]).boxed(),
        };

        let response = stream_object(output);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[CONTENT_LENGTH], "5");
        assert_eq!(response.headers()[ETAG], "\"abc\"");
        assert_eq!(response.headers()[CACHE_CONTROL], "max-age=60");
        assert!(response.headers().get(CONTENT_RANGE).is_none());
        assert_eq!(body_string(response).await, "hello");
    }
}
