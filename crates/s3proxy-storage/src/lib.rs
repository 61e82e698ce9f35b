//! s3proxy Storage - object storage collaborators
//!
//! This crate provides:
//! - The [`ObjectBackend`] trait: one page of listing, head, get, put, delete
//! - [`StorageClient`]: the per-target client used by the bucket pipeline,
//!   which exhausts listing pages up to the configured key budget
//! - [`MemoryBackend`]: an in-process bucket with a configurable native page
//!   size, used by tests and local runs
//! - [`S3Backend`]: Amazon S3 and S3 compatible stores through `aws-sdk-s3`

pub mod backend;
pub mod client;
pub mod error;
pub mod memory;
pub mod s3;

pub use backend::{
    ByteStream, EntryKind, GetRequest, ListElement, ListPage, ObjectBackend, ObjectHead,
    ObjectMetadata, ObjectSummary, GetObjectOutput, PutRequest,
};
pub use client::StorageClient;
pub use error::{Result, StorageError};
pub use memory::MemoryBackend;
pub use s3::S3Backend;
