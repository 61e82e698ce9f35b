//! Bucket action pipeline
//!
//! One [`BucketState`] is built per target mount path. The handlers turn the
//! request path into a storage key under the bucket root prefix and answer
//! through the target's responder, so per-target templates apply to every
//! outcome.

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{HeaderMap, StatusCode, Uri, request::Parts};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use http::header::{IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE, LOCATION, RANGE};
use s3proxy_auth::AuthenticatedUser;
use s3proxy_common::{GetActionOptions, TargetConfig};
use s3proxy_storage::{EntryKind, GetRequest, ListElement, PutRequest, StorageClient, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::response::{EntryView, ResponseHandler, stream_object};
use crate::state::AppState;

/// Multipart field carrying the uploaded file
pub const UPLOAD_FIELD: &str = "file";

/// Request level failures answered with a templated error
#[derive(Debug, Error)]
pub enum BucketError {
    #[error("cannot decode request path {0}")]
    InvalidPath(String),

    #[error("invalid {header} header: {value}")]
    InvalidHeader { header: &'static str, value: String },

    #[error("can't remove folder {0}")]
    FolderDeletion(String),

    #[error("file detected on path {0} for PUT request and override isn't allowed")]
    OverrideForbidden(String),

    #[error("failed to parse multipart form: {0}")]
    Multipart(String),

    #[error("no {UPLOAD_FIELD} field in multipart form")]
    MissingFile,
}

/// Handler state of one mount path of a target
pub struct BucketState {
    pub app: Arc<AppState>,
    pub target: TargetConfig,
    pub storage: StorageClient,
    /// Mount path, starting and ending with `/`
    pub mount_path: String,
}

impl BucketState {
    pub fn new(app: Arc<AppState>, target: TargetConfig, storage: StorageClient, mount_path: impl Into<String>) -> Self {
        Self {
            app,
            target,
            storage,
            mount_path: mount_path.into(),
        }
    }

    fn responder(&self, parts: &Parts) -> ResponseHandler {
        self.app
            .target_responder(&self.target, parts.uri.path())
            .with_user(parts.extensions.get::<AuthenticatedUser>().cloned())
    }

    /// Path relative to the mount, always starting with `/`
    fn request_path(&self, uri: &Uri) -> Result<String, BucketError> {
        let rest = uri.path().strip_prefix(&self.mount_path).unwrap_or_default();
        let decoded = urlencoding::decode(rest).map_err(|_| BucketError::InvalidPath(uri.path().to_string()))?;
        Ok(format!("/{decoded}"))
    }

    /// Key under the bucket root prefix, before rewriting
    fn start_key(&self, request_path: &str) -> String {
        format!(
            "{}{}",
            self.target.bucket.root_prefix(),
            request_path.trim_start_matches('/')
        )
    }

    /// Storage key of a request path
    fn key(&self, request_path: &str) -> String {
        self.target.rewrite_key(&self.start_key(request_path))
    }

    /// Link of a listed key under this mount
    fn link(&self, key: &str) -> String {
        let root = self.target.bucket.root_prefix();
        let relative = key.strip_prefix(root.as_str()).unwrap_or(key);
        format!("{}/{}", self.mount_path.trim_end_matches('/'), relative)
    }

    fn entry_view(&self, element: ListElement) -> EntryView {
        let path = self.link(&element.key);
        EntryView {
            kind: element.kind.as_str(),
            etag: element.etag,
            name: element.name,
            last_modified: element.last_modified,
            size: element.size,
            key: element.key,
            path,
        }
    }
}

fn is_folder(request_path: &str) -> bool {
    request_path.is_empty() || request_path.ends_with('/')
}

fn header_string(headers: &HeaderMap, name: http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn header_date(
    headers: &HeaderMap,
    name: http::HeaderName,
    label: &'static str,
) -> Result<Option<DateTime<Utc>>, BucketError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let invalid = || BucketError::InvalidHeader {
        header: label,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    };
    let value = value.to_str().map_err(|_| invalid())?;
    DateTime::parse_from_rfc2822(value)
        .map(|date| Some(date.with_timezone(&Utc)))
        .map_err(|_| invalid())
}

/// Get request for `key` carrying the conditional and range headers
fn get_request(key: String, headers: &HeaderMap) -> Result<GetRequest, BucketError> {
    Ok(GetRequest {
        key,
        if_match: header_string(headers, IF_MATCH),
        if_none_match: header_string(headers, IF_NONE_MATCH),
        if_modified_since: header_date(headers, IF_MODIFIED_SINCE, "If-Modified-Since")?,
        if_unmodified_since: header_date(headers, IF_UNMODIFIED_SINCE, "If-Unmodified-Since")?,
        range: header_string(headers, RANGE),
    })
}

/// GET: folder listing, index document or object
pub async fn get_handler(State(bucket): State<Arc<BucketState>>, request: Request) -> Response {
    let (parts, _) = request.into_parts();
    let responder = bucket.responder(&parts);

    let request_path = match bucket.request_path(&parts.uri) {
        Ok(path) => path,
        Err(e) => return responder.internal_error(&e).await,
    };
    let options = bucket
        .target
        .get_action()
        .map(|action| action.config.clone())
        .unwrap_or_default();

    if is_folder(&request_path) {
        list_folder(&bucket, &responder, &parts, &request_path, &options).await
    } else {
        let request = match get_request(bucket.key(&request_path), &parts.headers) {
            Ok(request) => request,
            Err(e) => return responder.bad_request(&e).await,
        };
        fetch_object(&bucket, &responder, &parts.uri, &request, &options).await
    }
}

async fn list_folder(
    bucket: &BucketState,
    responder: &ResponseHandler,
    parts: &Parts,
    request_path: &str,
    options: &GetActionOptions,
) -> Response {
    let key = bucket.key(request_path);
    debug!("Listing {} in bucket {}", key, bucket.storage.bucket());

    let elements = match bucket.storage.list_files_and_directories(&key).await {
        Ok(elements) => elements,
        Err(e) => {
            error!("Listing {} of target {} failed: {}", key, bucket.target.name, e);
            return responder.internal_error(&e).await;
        }
    };

    if let Some(index) = options.index_document.as_deref().filter(|i| !i.is_empty())
        && let Some(entry) = elements
            .iter()
            .find(|e| e.kind == EntryKind::File && e.name == index)
    {
        debug!("Serving index document {} for {}", entry.key, request_path);
        let request = match get_request(entry.key.clone(), &parts.headers) {
            Ok(request) => request,
            Err(e) => return responder.bad_request(&e).await,
        };
        return fetch_object(bucket, responder, &parts.uri, &request, options).await;
    }

    let entries: Vec<EntryView> = elements.into_iter().map(|e| bucket.entry_view(e)).collect();
    responder
        .folder_list(bucket.storage.bucket(), &bucket.target.name, &entries)
        .await
}

async fn fetch_object(
    bucket: &BucketState,
    responder: &ResponseHandler,
    uri: &Uri,
    request: &GetRequest,
    options: &GetActionOptions,
) -> Response {
    match bucket.storage.get_object(request).await {
        Ok(output) => {
            debug!("Streaming {} from bucket {}", request.key, bucket.storage.bucket());
            stream_object(output)
        }
        Err(StorageError::NotFound) => {
            let path = uri.path();
            if options.redirect_with_trailing_slash_for_not_found_file && !path.ends_with('/') {
                debug!("{} not found, redirecting to folder", request.key);
                return (StatusCode::FOUND, [(LOCATION, format!("{path}/"))]).into_response();
            }
            warn!("Object {} not found in target {}", request.key, bucket.target.name);
            responder.not_found().await
        }
        Err(StorageError::NotModified) => (StatusCode::NOT_MODIFIED, Body::empty()).into_response(),
        Err(StorageError::PreconditionFailed) => (StatusCode::PRECONDITION_FAILED, Body::empty()).into_response(),
        Err(e) => {
            error!("Get {} on target {} failed: {}", request.key, bucket.target.name, e);
            responder.internal_error(&e).await
        }
    }
}

/// Uploaded file of a multipart form
struct Upload {
    filename: String,
    content_type: Option<String>,
    data: bytes::Bytes,
}

async fn read_upload(request: Request) -> Result<Upload, BucketError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| BucketError::Multipart(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BucketError::Multipart(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| BucketError::Multipart(e.body_text()))?;
        return Ok(Upload {
            filename,
            content_type,
            data,
        });
    }

    Err(BucketError::MissingFile)
}

/// PUT: store the multipart `file` field under the request path
pub async fn put_handler(State(bucket): State<Arc<BucketState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let responder = bucket.responder(&parts);

    let request_path = match bucket.request_path(&parts.uri) {
        Ok(path) => path,
        Err(e) => return responder.internal_error(&e).await,
    };
    let options = bucket
        .target
        .put_action()
        .map(|action| action.config.clone())
        .unwrap_or_default();

    // malformed forms are answered as internal errors
    let uri_path = parts.uri.path().to_string();
    let upload = match read_upload(Request::from_parts(parts, body)).await {
        Ok(upload) => upload,
        Err(e) => {
            error!("Upload on {} rejected: {}", uri_path, e);
            return responder.internal_error(&e).await;
        }
    };

    let mut key = bucket.start_key(&request_path);
    if !key.is_empty() && !key.ends_with('/') {
        key.push('/');
    }
    key.push_str(&upload.filename);
    let key = bucket.target.rewrite_key(&key);

    if !options.allow_override {
        match bucket.storage.head_object(&key).await {
            Ok(Some(_)) => {
                let e = BucketError::OverrideForbidden(key);
                warn!("{}", e);
                return responder.forbidden(&e).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!("Head {} on target {} failed: {}", key, bucket.target.name, e);
                return responder.internal_error(&e).await;
            }
        }
    }

    let size = upload.data.len();
    let request = PutRequest {
        key: key.clone(),
        body: upload.data,
        content_type: upload.content_type.clone(),
        metadata: options.metadata.clone(),
        storage_class: options.storage_class.clone(),
    };
    if let Err(e) = bucket.storage.put_object(request).await {
        error!("Put {} on target {} failed: {}", key, bucket.target.name, e);
        return responder.internal_error(&e).await;
    }

    info!("Stored {} ({} bytes) on target {}", key, size, bucket.target.name);
    responder
        .put(&key, &upload.filename, upload.content_type.as_deref(), size)
        .await
}

/// DELETE: remove the object at the request path
pub async fn delete_handler(State(bucket): State<Arc<BucketState>>, request: Request) -> Response {
    let (parts, _) = request.into_parts();
    let responder = bucket.responder(&parts);

    let request_path = match bucket.request_path(&parts.uri) {
        Ok(path) => path,
        Err(e) => return responder.internal_error(&e).await,
    };

    if is_folder(&request_path) {
        let e = BucketError::FolderDeletion(request_path);
        error!("{}", e);
        return responder.internal_error(&e).await;
    }

    let key = bucket.key(&request_path);
    match bucket.storage.delete_object(&key).await {
        Ok(()) => {
            info!("Deleted {} on target {}", key, bucket.target.name);
            responder.delete(&key).await
        }
        Err(e) => {
            error!("Delete {} on target {} failed: {}", key, bucket.target.name, e);
            responder.internal_error(&e).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_folder_paths() {
        assert!(is_folder("/"));
        assert!(is_folder("/docs/"));
        assert!(!is_folder("/docs/readme.txt"));
    }

    #[test]
    fn test_conditional_dates() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_date(&headers, IF_MODIFIED_SINCE, "If-Modified-Since").unwrap(), None);

        headers.insert(IF_MODIFIED_SINCE, HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));
        let date = header_date(&headers, IF_MODIFIED_SINCE, "If-Modified-Since").unwrap().unwrap();
        assert_eq!(date.timestamp(), 784_111_777);

        headers.insert(IF_MODIFIED_SINCE, HeaderValue::from_static("06/11/1994"));
        let err = header_date(&headers, IF_MODIFIED_SINCE, "If-Modified-Since").unwrap_err();
        assert_eq!(err.to_string(), "invalid If-Modified-Since header: 06/11/1994");
    }

    #[test]
    fn test_get_request_carries_conditions() {
        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"abc\""));
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-9"));

        let request = get_request("site/index.html".to_string(), &headers).unwrap();
        assert_eq!(request.key, "site/index.html");
        assert_eq!(request.if_none_match.as_deref(), Some("\"abc\""));
        assert_eq!(request.range.as_deref(), Some("bytes=0-9"));
        assert!(request.if_match.is_none());
        assert!(request.if_unmodified_since.is_none());
    }
}
