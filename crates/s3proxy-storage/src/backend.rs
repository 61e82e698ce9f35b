//! Object backend abstraction
//!
//! A backend answers single requests against one bucket. Pagination across
//! listing pages is driven by [`crate::StorageClient`].

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::BTreeMap;

/// Streamed object body
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Kind of listing entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "FILE",
            Self::Folder => "FOLDER",
        }
    }
}

/// Object as reported by a listing page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a delimited listing
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    /// Common prefixes, each ending with the delimiter
    pub common_prefixes: Vec<String>,
    pub objects: Vec<ObjectSummary>,
    /// Number of keys and prefixes returned in this page
    pub key_count: i32,
    /// Token for the next page, `None` when the listing is complete
    pub next_continuation_token: Option<String>,
}

/// Entry of a resolved listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListElement {
    pub kind: EntryKind,
    /// Full object key or common prefix
    pub key: String,
    /// Name relative to the listed prefix, folders keep their trailing `/`
    pub name: String,
    pub size: i64,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object metadata returned by head and get
#[derive(Clone, Debug, Default)]
pub struct ObjectHead {
    pub key: String,
    pub content_length: i64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Get request with its conditional and range headers
#[derive(Clone, Debug, Default)]
pub struct GetRequest {
    pub key: String,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
    /// Raw `Range` header value
    pub range: Option<String>,
}

impl GetRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }
}

/// Response headers of a get
#[derive(Clone, Debug, Default)]
pub struct ObjectMetadata {
    pub cache_control: Option<String>,
    pub expires: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_length: i64,
    pub content_range: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Streamed object
pub struct GetObjectOutput {
    pub metadata: ObjectMetadata,
    pub body: ByteStream,
}

impl std::fmt::Debug for GetObjectOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetObjectOutput")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Upload request
#[derive(Clone, Debug, Default)]
pub struct PutRequest {
    pub key: String,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub storage_class: Option<String>,
}

/// Single bucket object store
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Bucket name, for logs
    fn bucket(&self) -> &str;

    /// Fetch one page of a delimited listing
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: &str,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage>;

    /// Object metadata, `None` when the key does not exist
    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>>;

    /// Stream an object honouring conditionals and range
    async fn get_object(&self, request: &GetRequest) -> Result<GetObjectOutput>;

    async fn put_object(&self, request: PutRequest) -> Result<()>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}
