//! s3proxy - HTTP gateway in front of S3 buckets
//!
//! Targets bind mount paths on a host to a bucket prefix. Each request is
//! dispatched on its host, authorized by the first matching resource of the
//! target and then served by the bucket action pipeline (listing, object
//! streaming, upload, deletion) with templated answers.

pub mod auth_middleware;
pub mod bucket;
pub mod cache_middleware;
pub mod host_router;
pub mod internal_server;
pub mod metrics_middleware;
pub mod oidc_routes;
pub mod request_info;
pub mod response;
pub mod server;
pub mod state;
pub mod target_list;
pub mod templates;

#[cfg(test)]
mod test_support;
