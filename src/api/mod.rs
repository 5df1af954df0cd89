mod handlers;
pub mod upload;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::{Config, StaticEndpoint};
use crate::error::Result;
use crate::store::{AssetPool, DirAssetPool, DirProjectStore, ProjectStore};
use crate::transfer::{Reconciler, SessionStore, Stager};
use upload::{ARCHIVE_UPLOAD, IMAGE_UPLOAD, MULTIPART_OVERHEAD};

/// JSON bodies (documents sent for packaging or saving).
const DOCUMENT_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub assets: Arc<dyn AssetPool>,
    pub projects: Arc<dyn ProjectStore>,
    pub stager: Stager,
    pub reconciler: Reconciler,
}

impl AppState {
    /// Open the directory stores under the configured data dir.
    pub fn open(config: Config) -> Result<Self> {
        Self::with_sessions(config, SessionStore::default())
    }

    /// Like [`AppState::open`] with a caller-provided session registry,
    /// e.g. one driven by a manual clock.
    pub fn with_sessions(config: Config, sessions: SessionStore) -> Result<Self> {
        let assets = DirAssetPool::open(config.uploads_dir())?;
        let projects = DirProjectStore::open(config.projects_dir())?;
        let stager = Stager::new(config.staging_dir(), sessions.clone())?;
        let reconciler = Reconciler::new(sessions, config.transfer.rewrite);

        Ok(Self {
            config: Arc::new(config),
            assets: Arc::new(assets),
            projects: Arc::new(projects),
            stager,
            reconciler,
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Assets
        .route(
            "/upload",
            post(handlers::upload_image).layer(DefaultBodyLimit::max(
                IMAGE_UPLOAD.max_bytes as usize + MULTIPART_OVERHEAD,
            )),
        )
        .route("/images", get(handlers::list_images))
        // Export
        .route("/package", post(handlers::package_project))
        // Projects
        .route("/projects", get(handlers::list_projects))
        .route("/projects/save", post(handlers::save_project))
        .route("/projects/{name}", get(handlers::get_project))
        // Import
        .route(
            "/projects/load",
            post(handlers::load_archive).layer(DefaultBodyLimit::max(
                ARCHIVE_UPLOAD.max_bytes as usize + MULTIPART_OVERHEAD,
            )),
        )
        .route("/projects/confirm-import", post(handlers::confirm_import))
        .layer(DefaultBodyLimit::max(DOCUMENT_BODY_LIMIT));

    let statics = static_router(&state.config);
    let cors = cors_layer(state.config.cors_origins.as_deref());

    Router::new()
        .nest("/showcomposer/api", api)
        .route("/health", get(handlers::health))
        .route("/environment.js", get(handlers::environment))
        .route("/endpoints", get(handlers::list_endpoints))
        .route("/", get(handlers::redirect_root))
        .fallback_service(statics)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Static directories, including the asset pool at `/uploads`.
///
/// Each endpoint gets its own router that falls back to the next, longest
/// name first, so `showcomposer/uploads` is matched before `showcomposer`.
fn static_router(config: &Config) -> Router {
    let mut endpoints: Vec<StaticEndpoint> = config.endpoints.clone();
    if !endpoints.iter().any(|e| e.name == "uploads") {
        endpoints.push(StaticEndpoint {
            name: "uploads".to_string(),
            path: config.uploads_dir(),
        });
    }
    endpoints.sort_by_key(|e| e.name.len());

    let mut router = Router::new();
    for endpoint in endpoints {
        tracing::info!("Serving {} : {}", endpoint.name, endpoint.path.display());
        router = Router::new()
            .nest_service(&format!("/{}", endpoint.name), ServeDir::new(&endpoint.path))
            .fallback_service(router);
    }
    router
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match o.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin: {}", o);
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}

/// Periodically discard imports that were never confirmed or rejected.
pub fn spawn_session_sweeper(state: &AppState) -> JoinHandle<()> {
    let reconciler = state.reconciler.clone();
    let interval = state
        .config
        .transfer
        .sweep_interval
        .max(std::time::Duration::from_secs(1));
    let ttl = chrono::Duration::from_std(state.config.transfer.session_ttl)
        .unwrap_or_else(|_| chrono::Duration::hours(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let reconciler = reconciler.clone();
            match tokio::task::spawn_blocking(move || reconciler.sweep_expired(ttl)).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Swept {} abandoned imports", n),
                Err(e) => tracing::error!("Session sweep failed: {}", e),
            }
        }
    })
}
