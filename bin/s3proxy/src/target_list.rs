//! Target list endpoint

use axum::Json;
use axum::extract::{Request, State};
use axum::http::header::ACCEPT;
use axum::response::{IntoResponse, Response};
use s3proxy_auth::AuthenticatedUser;
use s3proxy_common::{MountConfig, TargetConfig};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::state::AppState;

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketView {
    pub name: String,
    pub prefix: String,
    pub region: String,
    pub s3_endpoint: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ActionsView {
    pub get: bool,
    pub put: bool,
    pub delete: bool,
}

/// Public view of a target, credentials left out
#[derive(Clone, Debug, Serialize)]
pub struct TargetView {
    pub name: String,
    pub bucket: BucketView,
    pub mount: MountConfig,
    pub actions: ActionsView,
}

impl From<&TargetConfig> for TargetView {
    fn from(target: &TargetConfig) -> Self {
        Self {
            name: target.name.clone(),
            bucket: BucketView {
                name: target.bucket.name.clone(),
                prefix: target.bucket.prefix.clone(),
                region: target.bucket.region.clone(),
                s3_endpoint: target.bucket.s3_endpoint.clone(),
            },
            mount: target.mount.clone(),
            actions: ActionsView {
                get: target.get_action().is_some(),
                put: target.put_action().is_some(),
                delete: target.delete_action().is_some(),
            },
        }
    }
}

/// List configured targets as JSON or through the target list template
pub async fn list_targets(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, _) = request.into_parts();
    let targets: Vec<TargetView> = state.config.targets.iter().map(TargetView::from).collect();

    let wants_json = parts
        .headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains(JSON_CONTENT_TYPE));
    debug!("Listing {} targets (json: {})", targets.len(), wants_json);

    if wants_json {
        return Json(targets).into_response();
    }

    state
        .responder(parts.uri.path())
        .with_user(parts.extensions.get::<AuthenticatedUser>().cloned())
        .target_list(&targets)
        .await
}
