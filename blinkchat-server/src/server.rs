use app_state::AppState;
use axum::{Extension, Router, response::IntoResponse, routing::get, serve};
use shared::config::server::{Config, DatabaseConfig, LogFormat, StorageBackend};
use sqlx::postgres::PgPoolOptions;
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::{
    app_state,
    db::bootstrap,
    middleware::request_context::{self, RequestIdState},
    routes,
    store::Stores,
    tracer,
    ws::handler::ws_upgrade,
};
use axum::http::{HeaderValue, StatusCode, header};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).init();
    } else {
        fmt_builder.with_ansi(true).init();
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool from the given database settings.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(&db.url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Creates the CORS layer for the application.
///
/// An empty origin list allows any origin. Browsers refuse wildcards on
/// credentialed requests, so with credentials enabled the request's own
/// origin is echoed back instead.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use http::{HeaderName, Method};

    let cors_config = &config.server.cors;
    let methods = vec![
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let mut headers = vec![header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT];
    let request_id = HeaderName::from_bytes(config.server.request_id_header.as_bytes()).ok();
    headers.extend(request_id.clone());

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::list(headers))
        .expose_headers(request_id.into_iter().collect::<Vec<_>>())
        .allow_credentials(cors_config.allow_credentials)
        .max_age(Duration::from_secs(cors_config.max_age_seconds));

    cors = if cors_config.allowed_origins.is_empty() {
        if cors_config.allow_credentials {
            cors.allow_origin(AllowOrigin::mirror_request())
        } else {
            cors.allow_origin(AllowOrigin::any())
        }
    } else {
        let origins = cors_config
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors.allow_origin(AllowOrigin::list(origins))
    };

    cors
}

/// Creates the `/api/v1` router: public auth routes plus the bearer-protected API.
pub fn create_api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(routes::auth::create_router_auth(state.clone()))
        .merge(routes::protected::create_router_protected(state))
}

/// Creates the main application router with all middleware and routes.
///
/// Routes are registered first so every layer wraps them; the request id
/// layer is added last and therefore runs first.
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let config = state.config.clone();
    let cors = create_cors_layer(&config);
    let request_id_state = RequestIdState::from_config(&config);

    Router::new()
        .nest("/api/v1", create_api_router(state.clone()))
        .merge(routes::health::create_health_router())
        .route("/ws", get(ws_upgrade))
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Creates the graceful shutdown signal handler.
pub async fn create_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutting down...");
}

/// Build the stores for the configured backend, bootstrapping PostgreSQL.
async fn create_stores(config: &Config) -> Result<(Stores, Option<sqlx::PgPool>), BoxError> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("using in-memory storage");
            Ok((Stores::in_memory(), None))
        }
        StorageBackend::Postgres => {
            info!(host = %config.db.host_for_logs(), "connecting to database");
            let pool = create_database_pool(&config.db).await?;
            bootstrap::ensure_liveness(&pool).await?;
            bootstrap::run(&pool, &config.db).await?;
            bootstrap::ensure_readiness(&pool).await?;
            Ok((Stores::postgres(pool.clone()), Some(pool)))
        }
    }
}

/// Starts the server on an already bound listener and serves until
/// `shutdown` resolves.
///
/// # Errors
/// Returns an error if storage or auth setup fails, or the server stops
/// abnormally.
pub async fn serve_with_listener<F>(
    config: Config,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), BoxError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let (stores, pool) = create_stores(&config).await?;
    let (state, worker) = AppState::new(config, stores, pool)?;
    tokio::spawn(worker.run());

    let app = create_app_router(state, metrics_handle);
    info!(addr = %listener.local_addr()?, "Listening");

    serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

/// Starts the server and binds it to the configured port.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run(config: Config) -> Result<(), BoxError> {
    initialize_tracing(&config);
    info!(%config, "Starting server...");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;

    serve_with_listener(config, listener, create_shutdown_signal()).await
}
