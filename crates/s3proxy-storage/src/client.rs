//! Per-target storage client
//!
//! Wraps a backend with the target identity, counts every backend operation
//! and drives listing pagination within the configured key budget.

use crate::backend::{
    EntryKind, GetObjectOutput, GetRequest, ListElement, ObjectBackend, ObjectHead, PutRequest,
};
use crate::error::Result;
use metrics::counter;
use std::sync::Arc;
use tracing::debug;

/// Largest page a single list request may ask for
pub const S3_MAX_KEYS: i32 = 1000;

const LIST_DELIMITER: &str = "/";

/// Storage client bound to one target
#[derive(Clone)]
pub struct StorageClient {
    target: String,
    backend: Arc<dyn ObjectBackend>,
    list_max_keys: i32,
}

impl StorageClient {
    pub fn new(target: impl Into<String>, backend: Arc<dyn ObjectBackend>, list_max_keys: i32) -> Self {
        Self {
            target: target.into(),
            backend,
            list_max_keys,
        }
    }

    pub fn bucket(&self) -> &str {
        self.backend.bucket()
    }

    fn record(&self, operation: &'static str) {
        counter!(
            "s3proxy_s3_operations_total",
            "target" => self.target.clone(),
            "bucket" => self.backend.bucket().to_string(),
            "operation" => operation
        )
        .increment(1);
    }

    /// List the direct children of `key`, folders first then files.
    ///
    /// Pages are requested until the backend reports no continuation token or
    /// the key budget is spent. Each page asks for at most the remaining budget.
    pub async fn list_files_and_directories(&self, key: &str) -> Result<Vec<ListElement>> {
        let mut folders = Vec::new();
        let mut files = Vec::new();

        let mut remaining = self.list_max_keys;
        let mut max_keys = self.list_max_keys.min(S3_MAX_KEYS);
        let mut token = None;

        loop {
            debug!(
                "Listing {} in bucket {} (max keys {})",
                key,
                self.bucket(),
                max_keys
            );
            let page = self
                .backend
                .list_page(key, LIST_DELIMITER, token.take(), max_keys)
                .await;
            self.record("list");
            let page = page?;

            remaining -= page.key_count;
            if remaining < max_keys {
                max_keys = remaining;
            }

            for prefix in page.common_prefixes {
                let name = prefix.strip_prefix(key).unwrap_or(&prefix).to_string();
                folders.push(ListElement {
                    kind: EntryKind::Folder,
                    key: prefix,
                    name,
                    size: 0,
                    etag: String::new(),
                    last_modified: None,
                });
            }

            for object in page.objects {
                let name = object.key.strip_prefix(key).unwrap_or(&object.key);
                if name.is_empty() {
                    continue;
                }
                files.push(ListElement {
                    kind: EntryKind::File,
                    name: name.to_string(),
                    key: object.key,
                    size: object.size,
                    etag: object.etag,
                    last_modified: object.last_modified,
                });
            }

            match page.next_continuation_token {
                Some(next) if remaining > 0 => token = Some(next),
                _ => break,
            }
        }

        folders.append(&mut files);
        Ok(folders)
    }

    pub async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>> {
        debug!("Head object {} in bucket {}", key, self.bucket());
        let result = self.backend.head_object(key).await;
        self.record("head");
        result
    }

    pub async fn get_object(&self, request: &GetRequest) -> Result<GetObjectOutput> {
        debug!("Get object {} in bucket {}", request.key, self.bucket());
        let result = self.backend.get_object(request).await;
        self.record("get");
        result
    }

    pub async fn put_object(&self, request: PutRequest) -> Result<()> {
        debug!("Put object {} in bucket {}", request.key, self.bucket());
        let result = self.backend.put_object(request).await;
        self.record("put");
        result
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        debug!("Delete object {} in bucket {}", key, self.bucket());
        let result = self.backend.delete_object(key).await;
        self.record("delete");
        result
    }
}
