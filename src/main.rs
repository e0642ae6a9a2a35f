// =============================================================================
// CINEMA BOOKING SERVICE - Main Entry Point
// =============================================================================
// WHAT THIS SERVICE DOES:
// - Serves the movie catalog and per-showtime seat maps
// - Books and cancels seats without ever selling a seat twice
// - Keeps each movie's average rating in step with its reviews
// - Exposes Prometheus metrics; optionally caches movies in Redis
//
// Storage is PostgreSQL when DATABASE_URL is set, in-memory otherwise.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinema_booking_service::cache::MovieCache;
use cinema_booking_service::config::Config;
use cinema_booking_service::metrics::setup_metrics;
use cinema_booking_service::store::{MemoryStore, PgStore, Store};
use cinema_booking_service::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Environment and logging
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cinema_booking_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Cinema Booking Service...");

    // -------------------------------------------------------------------------
    // STEP 2: Configuration and metrics
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        port = config.port,
        seats_per_showtime = config.seat_layout.capacity(),
        reserve_max_attempts = config.booking.reserve_max_attempts,
        "Configuration loaded"
    );
    if config.admins.is_empty() {
        warn!("ADMIN_EMAILS is empty; catalog administration is disabled");
    }

    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 3: Storage
    // -------------------------------------------------------------------------
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let db = PgStore::connect(url).await?;
            info!("Connected to PostgreSQL");
            db.run_migrations().await?;
            info!("Database migrations completed");
            Arc::new(db)
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    // -------------------------------------------------------------------------
    // STEP 4: Redis cache (optional)
    // -------------------------------------------------------------------------
    let cache = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let conn = redis::aio::ConnectionManager::new(client).await?;
            info!("Connected to Redis");
            MovieCache::new(conn, config.cache_ttl)
        }
        None => {
            info!("REDIS_URL not set; movie cache disabled");
            MovieCache::disabled()
        }
    };

    // -------------------------------------------------------------------------
    // STEP 5: State, routes, server
    // -------------------------------------------------------------------------
    let state = Arc::new(AppState::new(store, &config, cache, Some(metrics_handle)));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Cinema Booking Service is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
