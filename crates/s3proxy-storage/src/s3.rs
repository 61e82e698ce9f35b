//! Amazon S3 backend

use crate::backend::{
    GetObjectOutput, GetRequest, ListPage, ObjectBackend, ObjectHead, ObjectMetadata,
    ObjectSummary, PutRequest,
};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::{ByteStream as AwsByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::types::StorageClass;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use s3proxy_common::BucketConfig;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

/// Backend talking to an S3 compatible endpoint
pub struct S3Backend {
    bucket: String,
    client: Client,
}

impl S3Backend {
    /// Build a client from the bucket configuration.
    ///
    /// Static credentials are used when configured, the default provider
    /// chain otherwise. A custom endpoint switches to path-style addressing.
    pub async fn new(config: &BucketConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(credentials) = &config.credentials {
            loader = loader.credentials_provider(Credentials::new(
                credentials.access_key.value(),
                credentials.secret_key.value(),
                None,
                None,
                "s3proxy-config",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if !config.s3_endpoint.is_empty() {
            builder = builder
                .endpoint_url(endpoint_url(&config.s3_endpoint, config.disable_ssl))
                .force_path_style(true);
        }

        Self {
            bucket: config.name.clone(),
            client: Client::from_conf(builder.build()),
        }
    }
}

fn endpoint_url(endpoint: &str, disable_ssl: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if disable_ssl {
        format!("http://{endpoint}")
    } else {
        format!("https://{endpoint}")
    }
}

fn response_status<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

fn backend_error<E>(err: &SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::Backend(DisplayErrorContext(err).to_string())
}

fn to_chrono(value: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

fn to_aws(value: DateTime<Utc>) -> AwsDateTime {
    AwsDateTime::from_secs(value.timestamp())
}

#[async_trait]
impl ObjectBackend for S3Backend {
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
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .delimiter(delimiter)
            .max_keys(max_keys)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| {
                error!("ListObjectsV2 on {} failed: {}", self.bucket, DisplayErrorContext(&e));
                backend_error(&e)
            })?;

        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();
        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    size: object.size().unwrap_or_default(),
                    etag: object.e_tag().unwrap_or_default().to_string(),
                    last_modified: object.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        Ok(ListPage {
            common_prefixes,
            objects,
            key_count: output.key_count().unwrap_or_default(),
            next_continuation_token: output.next_continuation_token().map(str::to_string),
        })
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => Ok(Some(ObjectHead {
                key: key.to_string(),
                content_length: output.content_length().unwrap_or_default(),
                content_type: output.content_type().map(str::to_string),
                etag: output.e_tag().map(str::to_string),
                last_modified: output.last_modified().and_then(to_chrono),
            })),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(None),
            Err(e) if response_status(&e) == Some(404) => Ok(None),
            Err(e) => Err(backend_error(&e)),
        }
    }

    async fn get_object(&self, request: &GetRequest) -> Result<GetObjectOutput> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .set_if_match(request.if_match.clone())
            .set_if_none_match(request.if_none_match.clone())
            .set_if_modified_since(request.if_modified_since.map(to_aws))
            .set_if_unmodified_since(request.if_unmodified_since.map(to_aws))
            .set_range(request.range.clone())
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                if matches!(e.as_service_error(), Some(GetObjectError::NoSuchKey(_))) {
                    return Err(StorageError::NotFound);
                }
                return Err(match response_status(&e) {
                    Some(304) => StorageError::NotModified,
                    Some(412) => StorageError::PreconditionFailed,
                    Some(404) => StorageError::NotFound,
                    _ => backend_error(&e),
                });
            }
        };

        let metadata = ObjectMetadata {
            cache_control: output.cache_control().map(str::to_string),
            expires: output.expires_string().map(str::to_string),
            content_disposition: output.content_disposition().map(str::to_string),
            content_encoding: output.content_encoding().map(str::to_string),
            content_language: output.content_language().map(str::to_string),
            content_length: output.content_length().unwrap_or_default(),
            content_range: output.content_range().map(str::to_string),
            content_type: output.content_type().map(str::to_string),
            etag: output.e_tag().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
        };

        let body = ReaderStream::new(output.body.into_async_read()).boxed();
        Ok(GetObjectOutput { metadata, body })
    }

    async fn put_object(&self, request: PutRequest) -> Result<()> {
        debug!(
            "PutObject {} ({} bytes) in {}",
            request.key,
            request.body.len(),
            self.bucket
        );
        let metadata = (!request.metadata.is_empty())
            .then(|| request.metadata.into_iter().collect());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(request.key)
            .content_length(i64::try_from(request.body.len()).unwrap_or(i64::MAX))
            .body(AwsByteStream::from(request.body))
            .set_content_type(request.content_type)
            .set_metadata(metadata)
            .set_storage_class(request.storage_class.as_deref().map(StorageClass::from))
            .send()
            .await
            .map_err(|e| backend_error(&e))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| backend_error(&e))?;
        Ok(())
    }
}
