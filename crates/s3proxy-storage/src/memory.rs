//! In-memory object backend
//!
//! Behaves like a delimited ListObjectsV2 endpoint with a native page cap,
//! evaluates conditional headers and single byte ranges.

use crate::backend::{
    GetObjectOutput, GetRequest, ListPage, ObjectBackend, ObjectHead, ObjectMetadata,
    ObjectSummary, PutRequest,
};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stored object
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub storage_class: Option<String>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

/// Bucket held in process memory
pub struct MemoryBackend {
    bucket: String,
    page_limit: i32,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    list_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_limit: 1000,
            objects: RwLock::new(BTreeMap::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Cap on the number of entries a single page returns
    #[must_use]
    pub fn with_page_limit(mut self, page_limit: i32) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    /// Store an object directly, returning its etag
    pub fn insert(&self, key: impl Into<String>, data: Bytes, content_type: Option<&str>) -> String {
        self.store(
            key.into(),
            StoredObject {
                etag: etag_of(&data),
                data,
                content_type: content_type.map(str::to_string),
                metadata: BTreeMap::new(),
                storage_class: None,
                last_modified: Utc::now().trunc_subsecs(0),
            },
        )
    }

    /// Override the modification time of an existing object
    pub fn set_last_modified(&self, key: &str, last_modified: DateTime<Utc>) {
        if let Some(object) = self.objects.write().get_mut(key) {
            object.last_modified = last_modified.trunc_subsecs(0);
        }
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Number of list requests served so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    fn store(&self, key: String, object: StoredObject) -> String {
        let etag = object.etag.clone();
        self.objects.write().insert(key, object);
        etag
    }
}

fn etag_of(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

fn etag_matches(condition: &str, etag: &str) -> bool {
    let etag = etag.trim_matches('"');
    condition
        .split(',')
        .map(|c| c.trim().trim_start_matches("W/").trim_matches('"'))
        .any(|c| c == "*" || c == etag)
}

/// Resolve a single `bytes=` range against the object length.
/// `Ok(None)` means the header is not a byte range and the full body applies.
fn resolve_range(range: &str, len: u64) -> Result<Option<(u64, u64)>> {
    let Some(spec) = range.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((start, end)) = spec.split_once('-') else {
        return Ok(None);
    };

    let unsatisfiable = || StorageError::Backend(format!("invalid range {range} for length {len}"));

    let (start, end) = match (start.trim(), end.trim()) {
        ("", "") => return Ok(None),
        ("", suffix) => {
            let suffix: u64 = suffix.parse().map_err(|_| unsatisfiable())?;
            if suffix == 0 || len == 0 {
                return Err(unsatisfiable());
            }
            (len.saturating_sub(suffix), len - 1)
        }
        (start, end) => {
            let start: u64 = start.parse().map_err(|_| unsatisfiable())?;
            let end = if end.is_empty() {
                len.saturating_sub(1)
            } else {
                end.parse::<u64>().map_err(|_| unsatisfiable())?.min(len.saturating_sub(1))
            };
            if start >= len || start > end {
                return Err(unsatisfiable());
            }
            (start, end)
        }
    };

    Ok(Some((start, end)))
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(
        &self,
        prefix: &str,
        delimiter: &str,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);

        let objects = self.objects.read();

        // Keys and common prefixes share one lexicographic sequence
        let mut entries: BTreeSet<(String, bool)> = BTreeSet::new();
        for key in objects.keys().filter(|k| k.starts_with(prefix)) {
            let rest = &key[prefix.len()..];
            match rest.find(delimiter).filter(|_| !delimiter.is_empty()) {
                Some(idx) => {
                    let common = format!("{prefix}{}", &rest[..idx + delimiter.len()]);
                    entries.insert((common, true));
                }
                None => {
                    entries.insert((key.clone(), false));
                }
            }
        }

        let limit = usize::try_from(max_keys.min(self.page_limit).max(0)).unwrap_or(0);
        let mut remaining = entries
            .into_iter()
            .filter(|(key, _)| continuation_token.as_ref().is_none_or(|token| key > token))
            .peekable();

        let mut page = ListPage::default();
        let mut last = None;
        while page.key_count < i32::try_from(limit).unwrap_or(i32::MAX) {
            let Some((key, is_prefix)) = remaining.next() else {
                break;
            };
            last = Some(key.clone());
            if is_prefix {
                page.common_prefixes.push(key);
            } else if let Some(object) = objects.get(&key) {
                page.objects.push(ObjectSummary {
                    size: i64::try_from(object.data.len()).unwrap_or(i64::MAX),
                    etag: object.etag.clone(),
                    last_modified: Some(object.last_modified),
                    key,
                });
            }
            page.key_count += 1;
        }

        if remaining.peek().is_some() {
            page.next_continuation_token = last;
        }

        Ok(page)
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>> {
        Ok(self.objects.read().get(key).map(|object| ObjectHead {
            key: key.to_string(),
            content_length: i64::try_from(object.data.len()).unwrap_or(i64::MAX),
            content_type: object.content_type.clone(),
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified),
        }))
    }

    async fn get_object(&self, request: &GetRequest) -> Result<GetObjectOutput> {
        let object = self
            .objects
            .read()
            .get(&request.key)
            .cloned()
            .ok_or(StorageError::NotFound)?;

        if let Some(condition) = &request.if_match {
            if !etag_matches(condition, &object.etag) {
                return Err(StorageError::PreconditionFailed);
            }
        } else if let Some(since) = request.if_unmodified_since {
            if object.last_modified > since {
                return Err(StorageError::PreconditionFailed);
            }
        }

        if let Some(condition) = &request.if_none_match {
            if etag_matches(condition, &object.etag) {
                return Err(StorageError::NotModified);
            }
        } else if let Some(since) = request.if_modified_since {
            if object.last_modified <= since {
                return Err(StorageError::NotModified);
            }
        }

        let total = object.data.len() as u64;
        let range = match &request.range {
            Some(range) => resolve_range(range, total)?,
            None => None,
        };

        let (data, content_range) = match range {
            Some((start, end)) => {
                let slice = object.data.slice(usize::try_from(start).unwrap_or(0)..=usize::try_from(end).unwrap_or(0));
                (slice, Some(format!("bytes {start}-{end}/{total}")))
            }
            None => (object.data.clone(), None),
        };

        let metadata = ObjectMetadata {
            content_length: i64::try_from(data.len()).unwrap_or(i64::MAX),
            content_range,
            content_type: object.content_type.clone(),
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified),
            ..Default::default()
        };

        let body = futures::stream::once(async move { Ok::<_, std::io::Error>(data) });
        Ok(GetObjectOutput {
            metadata,
            body: Box::pin(body),
        })
    }

    async fn put_object(&self, request: PutRequest) -> Result<()> {
        self.store(
            request.key,
            StoredObject {
                etag: etag_of(&request.body),
                data: request.body,
                content_type: request.content_type,
                metadata: request.metadata,
                storage_class: request.storage_class,
                last_modified: Utc::now().trunc_subsecs(0),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use futures::TryStreamExt;

    async fn body_of(output: GetObjectOutput) -> Vec<u8> {
        let chunks: Vec<Bytes> = output.body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_list_page_with_token() {
        let backend = MemoryBackend::new("b").with_page_limit(2);
        for key in ["a", "b/x", "b/y", "c"] {
            backend.insert(key, Bytes::from_static(b"1"), None);
        }

        let first = backend.list_page("", "/", None, 1000).await.unwrap();
        assert_eq!(first.key_count, 2);
        assert_eq!(first.objects[0].key, "a");
        assert_eq!(first.common_prefixes, vec!["b/"]);
        assert_eq!(first.next_continuation_token.as_deref(), Some("b/"));

        let second = backend
            .list_page("", "/", first.next_continuation_token, 1000)
            .await
            .unwrap();
        assert_eq!(second.key_count, 1);
        assert_eq!(second.objects[0].key, "c");
        assert!(second.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn test_get_range() {
        let backend = MemoryBackend::new("b");
        backend.insert("file", Bytes::from_static(b"0123456789"), Some("text/plain"));

        let mut request = GetRequest::new("file");
        request.range = Some("bytes=2-4".to_string());
        let output = backend.get_object(&request).await.unwrap();
        assert_eq!(output.metadata.content_range.as_deref(), Some("bytes 2-4/10"));
        assert_eq!(output.metadata.content_length, 3);
        assert_eq!(body_of(output).await, b"234");

        request.range = Some("bytes=-3".to_string());
        let output = backend.get_object(&request).await.unwrap();
        assert_eq!(body_of(output).await, b"789");

        request.range = Some("bytes=20-".to_string());
        assert!(backend.get_object(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_get_conditionals() {
        let backend = MemoryBackend::new("b");
        let etag = backend.insert("file", Bytes::from_static(b"data"), None);
        let modified = Utc::now().trunc_subsecs(0) - Duration::hours(1);
        backend.set_last_modified("file", modified);

        let mut request = GetRequest::new("file");
        request.if_none_match = Some(etag.clone());
        assert!(matches!(
            backend.get_object(&request).await,
            Err(StorageError::NotModified)
        ));

        let mut request = GetRequest::new("file");
        request.if_modified_since = Some(modified);
        assert!(matches!(
            backend.get_object(&request).await,
            Err(StorageError::NotModified)
        ));

        let mut request = GetRequest::new("file");
        request.if_match = Some("\"other\"".to_string());
        assert!(matches!(
            backend.get_object(&request).await,
            Err(StorageError::PreconditionFailed)
        ));

        let mut request = GetRequest::new("file");
        request.if_unmodified_since = Some(modified - Duration::minutes(5));
        assert!(matches!(
            backend.get_object(&request).await,
            Err(StorageError::PreconditionFailed)
        ));

        let mut request = GetRequest::new("file");
        request.if_match = Some(etag);
        request.if_modified_since = Some(modified - Duration::minutes(5));
        assert!(backend.get_object(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let backend = MemoryBackend::new("b");
        let result = backend.get_object(&GetRequest::new("missing")).await;
        assert!(matches!(result, Err(StorageError::NotFound)));
        assert!(backend.head_object("missing").await.unwrap().is_none());
    }
}
