//! Router assembly
//!
//! A router generation is built from one [`AppState`]: OIDC routes are
//! served on every host, every other route is dispatched on the request host
//! first. The listener serves a [`RouterHandle`] whose router is replaced on
//! reload while in-flight requests finish on the generation they started on.

use axum::{
    Router,
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderName, HeaderValue, Method, header::InvalidHeaderValue},
    middleware,
    response::Response,
    routing::{MethodRouter, get},
};
use parking_lot::RwLock;
use s3proxy_auth::AuthError;
use s3proxy_common::{CorsConfig, Resource, TargetConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower::ServiceExt;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, error, info, info_span};
use uuid::Uuid;

use crate::auth_middleware::{AuthScope, auth_layer};
use crate::bucket::{BucketState, delete_handler, get_handler, put_handler};
use crate::cache_middleware::{CacheHeaders, cache_layer};
use crate::host_router::{ANY_HOST, HostRouter};
use crate::metrics_middleware::metrics_layer;
use crate::oidc_routes;
use crate::request_info::request_host;
use crate::state::AppState;
use crate::target_list::list_targets;

/// Upload size accepted on PUT
const MAX_UPLOAD_SIZE: usize = 100 * 1024 * 1024;

/// Router construction errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("path {path} on host {host} is mounted by both {first} and {second}")]
    DuplicateMount {
        host: String,
        path: String,
        first: String,
        second: String,
    },

    #[error("no storage client for target {0}")]
    MissingStorage(String),

    #[error("invalid cache header value: {0}")]
    CacheHeader(#[from] InvalidHeaderValue),

    #[error("invalid cors configuration: {0}")]
    Cors(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Routers grouped by host in first registration order
#[derive(Default)]
struct HostGroups {
    groups: Vec<(String, Router)>,
    mounted: HashMap<(String, String), String>,
}

impl HostGroups {
    fn host_key(host: &str) -> String {
        let host = host.trim().to_ascii_lowercase();
        if host.is_empty() { ANY_HOST.to_string() } else { host }
    }

    /// Claim `path` on `host` for `owner`
    fn claim(&mut self, host: &str, path: &str, owner: &str) -> Result<(), RouterError> {
        let key = (Self::host_key(host), path.to_string());
        if let Some(first) = self.mounted.get(&key) {
            return Err(RouterError::DuplicateMount {
                host: key.0,
                path: key.1,
                first: first.clone(),
                second: owner.to_string(),
            });
        }
        self.mounted.insert(key, owner.to_string());
        Ok(())
    }

    fn add(&mut self, host: &str, router: Router) {
        let host = Self::host_key(host);
        match self.groups.iter_mut().find(|(h, _)| *h == host) {
            Some((_, existing)) => *existing = std::mem::take(existing).merge(router),
            None => self.groups.push((host, router)),
        }
    }
}

/// Routes of `path` and everything below it
fn mount(path: &str, methods: MethodRouter) -> Router {
    Router::new()
        .route(path, methods.clone())
        .route(&format!("{path}{{*rest}}"), methods)
}

fn target_router(state: &Arc<AppState>, target: &TargetConfig, path: &str) -> Result<Router, RouterError> {
    let storage = state
        .storage(&target.name)
        .cloned()
        .ok_or_else(|| RouterError::MissingStorage(target.name.clone()))?;
    let bucket = Arc::new(BucketState::new(state.clone(), target.clone(), storage, path));

    let enabled = target.get_action().is_some() || target.put_action().is_some() || target.delete_action().is_some();
    let mut methods = MethodRouter::new();
    if target.get_action().is_some() {
        methods = methods.get(get_handler);
    }
    if target.put_action().is_some() {
        methods = methods.put(put_handler);
    }
    if target.delete_action().is_some() {
        methods = methods.delete(delete_handler);
    }

    // disabled methods answer 405 before any authorization
    if enabled {
        let scope = Arc::new(AuthScope::new(state.clone(), Some(target.clone()), &target.resources));
        methods = methods.route_layer(middleware::from_fn_with_state(scope, auth_layer));
    }

    Ok(mount(path, methods.with_state(bucket)))
}

fn target_list_router(state: &Arc<AppState>, path: &str, resources: &[Resource]) -> Router {
    let scope = Arc::new(AuthScope::new(state.clone(), None, resources));
    let methods = get(list_targets)
        .route_layer(middleware::from_fn_with_state(scope, auth_layer))
        .with_state(state.clone());
    Router::new().route(path, methods)
}

/// State of the host dispatching fallback
struct HostDispatch {
    state: Arc<AppState>,
    hosts: HostRouter,
}

async fn dispatch_host(State(dispatch): State<Arc<HostDispatch>>, request: Request) -> Response {
    let host = request_host(request.headers(), request.uri());

    match dispatch.hosts.resolve(&host) {
        Ok(Some(router)) => router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|never| match never {}),
        Ok(None) => {
            let path = request.uri().path().to_string();
            drop(request);
            info!("No target mounted for host {} and path {}", host, path);
            dispatch.state.responder(path).not_found().await
        }
        Err(e) => {
            let path = request.uri().path().to_string();
            drop(request);
            error!("Host matching failed for {}: {}", host, e);
            dispatch.state.responder(path).internal_error(&e).await
        }
    }
}

async fn not_found(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    drop(request);
    state.responder(path).not_found().await
}

fn cors_layer(cors: &CorsConfig) -> Result<CorsLayer, RouterError> {
    if cors.allow_all {
        return Ok(CorsLayer::permissive());
    }

    let mut layer = CorsLayer::new();

    if cors.allow_origins.iter().any(|origin| origin == "*") {
        if cors.allow_credentials == Some(true) {
            return Err(RouterError::Cors(
                "credentials cannot be allowed for any origin".to_string(),
            ));
        }
        layer = layer.allow_origin(Any);
    } else if !cors.allow_origins.is_empty() {
        let origins = cors
            .allow_origins
            .iter()
            .map(|origin| HeaderValue::from_str(origin).map_err(|e| RouterError::Cors(format!("origin {origin}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        layer = layer.allow_origin(AllowOrigin::list(origins));
    }

    if !cors.allow_methods.is_empty() {
        let methods = cors
            .allow_methods
            .iter()
            .map(|method| {
                Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|e| RouterError::Cors(format!("method {method}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        layer = layer.allow_methods(methods);
    }

    let header_names = |names: &[String]| {
        names
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| RouterError::Cors(format!("header {name}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()
    };
    if !cors.allow_headers.is_empty() {
        layer = layer.allow_headers(header_names(&cors.allow_headers)?);
    }
    if !cors.expose_headers.is_empty() {
        layer = layer.expose_headers(header_names(&cors.expose_headers)?);
    }
    if let Some(max_age) = cors.max_age {
        layer = layer.max_age(Duration::from_secs(max_age));
    }
    if let Some(credentials) = cors.allow_credentials {
        layer = layer.allow_credentials(credentials);
    }

    Ok(layer)
}

/// Request span carrying a fresh request id
fn request_span(request: &Request) -> Span {
    info_span!(
        "request",
        id = %Uuid::new_v4(),
        method = %request.method(),
        uri = %request.uri(),
    )
}

/// Build the router of one configuration generation
pub fn build_router(state: &Arc<AppState>) -> Result<Router, RouterError> {
    let config = state.config.clone();
    let mut groups = HostGroups::default();

    if config.list_targets.enabled {
        let mount_config = &config.list_targets.mount;
        let resources = config.list_targets.resource.as_slice();
        for path in &mount_config.path {
            groups.claim(&mount_config.host, path, "target list")?;
            groups.add(&mount_config.host, target_list_router(state, path, resources));
        }
        info!("Target list mounted on {:?}", mount_config.path);
    }

    for target in &config.targets {
        for path in &target.mount.path {
            groups.claim(&target.mount.host, path, &target.name)?;
            groups.add(&target.mount.host, target_router(state, target, path)?);
            info!(
                "Target {} mounted on host {:?} path {}",
                target.name,
                HostGroups::host_key(&target.mount.host),
                path
            );
        }
    }

    let mut hosts = HostRouter::new();
    for (host, router) in groups.groups {
        let fallback = Router::new().fallback(not_found).with_state(state.clone());
        hosts.map(&host, fallback.merge(router));
    }

    let dispatch = Arc::new(HostDispatch {
        state: state.clone(),
        hosts,
    });
    let mut router = Router::new()
        .fallback(dispatch_host)
        .with_state(dispatch)
        .merge(oidc_routes::router(state)?);

    let cache = Arc::new(CacheHeaders::new(config.server.cache.as_ref())?);
    router = router.layer(middleware::from_fn_with_state(cache, cache_layer));

    if let Some(cors) = config.server.cors.as_ref().filter(|cors| cors.enabled) {
        router = router.layer(cors_layer(cors)?);
    }

    Ok(router
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE))
        .layer(middleware::from_fn(metrics_layer))
        .layer(TraceLayer::new_for_http().make_span_with(request_span)))
}

/// Live router, replaced on configuration reload
pub struct RouterHandle {
    current: RwLock<Router>,
}

impl RouterHandle {
    pub fn new(router: Router) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(router),
        })
    }

    pub fn current(&self) -> Router {
        self.current.read().clone()
    }

    pub fn swap(&self, router: Router) {
        *self.current.write() = router;
    }

    /// Router forwarding every request to the current generation
    pub fn service(self: &Arc<Self>) -> Router {
        let handle = self.clone();
        Router::new().fallback(move |request: Request| {
            let router = handle.current();
            async move { router.oneshot(request).await.unwrap_or_else(|never| match never {}) }
        })
    }
}
