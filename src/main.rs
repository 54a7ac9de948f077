use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[cfg(feature = "dev-tools")]
use axum_sql_viewer::SqlViewerLayer;
#[cfg(feature = "dev-tools")]
use tracing_web_console::TracingLayer;

use live_bus_api::api;
use live_bus_api::cleanup::CleanupManager;
use live_bus_api::config::Config;
use live_bus_api::models;
use live_bus_api::relay::Relay;
use live_bus_api::store::{MemoryStore, SqliteStore, TrackingStore};
use live_bus_api::trips::TripManager;

#[derive(OpenApi)]
#[openapi(
    info(title = "Live Bus API", version = "0.2.0"),
    paths(
        api::auth::login,
        api::auth::logout,
        api::trips::start_trip,
        api::trips::end_trip,
        api::trips::get_active_trip,
        api::trips::get_trip,
        api::trips::get_trip_start,
        api::locations::save_location,
        api::locations::get_history,
        api::locations::get_latest,
        api::locations::get_latest_by_bus,
        api::locations::get_active,
        api::buses::get_active_buses,
        api::stops::get_stop_etas,
        api::health::health_check,
    ),
    components(schemas(
        api::ErrorResponse,
        api::auth::LoginRequest,
        api::auth::LogoutRequest,
        api::trips::StartTripRequest,
        api::trips::EndTripRequest,
        api::trips::ActiveTripResponse,
        api::trips::TripStartResponse,
        api::locations::SaveLocationRequest,
        api::locations::LatestLocationResponse,
        api::stops::StopEta,
        api::health::HealthResponse,
        models::Driver,
        models::Bus,
        models::Trip,
        models::LocationSample,
        models::ActiveBusLocation,
        models::GeoPoint,
        models::DriverStatus,
        models::BusStatus,
        models::TripStatus,
        live_bus_api::trips::Assignment,
        live_bus_api::relay::RelayEvent,
    )),
    tags(
        (name = "auth", description = "Driver login and logout"),
        (name = "trips", description = "Trip lifecycle"),
        (name = "locations", description = "Location samples and history"),
        (name = "buses", description = "Live bus overview"),
        (name = "stops", description = "Stop arrival estimates"),
        (name = "health", description = "Service health check")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    config.retention.validate();

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Select the storage backend
    #[allow(unused_variables)] // pool is only reused when dev-tools is enabled
    let (store, pool, storage_backend): (Arc<dyn TrackingStore>, Option<SqlitePool>, &'static str) =
        match &config.database.url {
            Some(url) => {
                let pool = SqlitePool::connect(url)
                    .await
                    .expect("Failed to connect to SQLite database");

                let migrator = sqlx::migrate!("./migrations");
                tracing::info!(migrations = migrator.migrations.len(), "Found migrations");
                migrator.run(&pool).await.expect("Failed to run migrations");
                tracing::info!("Database migrations completed");

                (Arc::new(SqliteStore::new(pool.clone())), Some(pool), "sqlite")
            }
            None => {
                tracing::warn!(
                    "No database URL configured. Starting with the in-memory store; nothing will survive a restart"
                );
                (Arc::new(MemoryStore::new()), None, "memory")
            }
        };

    // Wire the relay and the trip state machine
    let relay = Relay::new(config.relay.channel_capacity);
    let manager = TripManager::new(store.clone(), relay.clone());

    // Start the retention sweep in the background
    let cleanup = Arc::new(CleanupManager::new(store.clone(), config.retention.clone()));
    tokio::spawn(async move {
        cleanup.start().await;
    });

    // Build the app
    #[allow(unused_mut)] // mut needed when dev-tools feature is enabled
    let mut app = Router::new()
        .route("/", get(root))
        .nest("/api", api::router(store, manager, relay, storage_backend))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Add dev tools only when feature is enabled
    #[cfg(feature = "dev-tools")]
    {
        let tracing_layer = TracingLayer::new("/tracing");
        app = app.merge(tracing_layer.into_router());
        if let Some(pool) = pool {
            app = app.merge(SqlViewerLayer::sqlite("/sql-viewer", pool).into_router());
        }
        tracing::warn!("Dev tools enabled: SQL Viewer and Tracing Console are accessible");
    }

    // Start server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("Failed to bind to port 3000");

    tracing::info!("Server running on http://localhost:3000");
    tracing::info!("Swagger UI: http://localhost:3000/swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "Live Bus API"
}
