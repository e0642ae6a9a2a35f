// =============================================================================
// CINEMA BOOKING SERVICE - Library Root
// =============================================================================
// Services, shared state and the HTTP router. The binary (main.rs) only
// wires infrastructure; tests build the same router over an in-memory store.
//
// LAYERS:
// - handlers   HTTP surface
// - catalog, inventory, ledger, reviews, rating   business services
// - store      persistence contract (memory / PostgreSQL)
// - cache      optional Redis cache for movie documents
// =============================================================================

pub mod auth;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod inventory;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod rating;
pub mod retry;
pub mod reviews;
pub mod store;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::AdminAllowList;
use crate::cache::MovieCache;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::inventory::SeatInventory;
use crate::ledger::BookingLedger;
use crate::rating::RatingAggregator;
use crate::reviews::ReviewService;
use crate::store::{RetryingStore, Store};

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
/// Shared by all handlers through `State<Arc<AppState>>`.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub catalog: Arc<Catalog>,
    pub inventory: Arc<SeatInventory>,
    pub ledger: BookingLedger,
    pub reviews: ReviewService,
    pub cache: MovieCache,
    pub admins: AdminAllowList,
    /// `None` when no global recorder was installed (tests)
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        config: &Config,
        cache: MovieCache,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        let store: Arc<dyn Store> = Arc::new(RetryingStore::new(
            store,
            config.booking.storage_retry.clone(),
        ));
        let catalog = Arc::new(Catalog::new(
            store.clone(),
            config.seat_layout,
            config.default_showtimes.clone(),
        ));
        let inventory = Arc::new(SeatInventory::new(store.clone(), &config.booking));
        let ledger = BookingLedger::new(store.clone(), catalog.clone(), inventory.clone());
        let ratings = Arc::new(RatingAggregator::new(store.clone()));
        let reviews = ReviewService::new(store.clone(), ratings);

        Self {
            store,
            catalog,
            inventory,
            ledger,
            reviews,
            cache,
            admins: config.admins.clone(),
            metrics_handle,
        }
    }
}

// -----------------------------------------------------------------------------
// ROUTER
// -----------------------------------------------------------------------------
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ----- Health, readiness, metrics -----
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        // ----- Catalog -----
        .route(
            "/api/movies",
            get(handlers::list_movies).post(handlers::create_movie),
        )
        .route("/api/movies/admin", get(handlers::admin_list_movies))
        .route(
            "/api/movies/:movieId",
            get(handlers::get_movie)
                .put(handlers::update_movie)
                .delete(handlers::delete_movie),
        )
        .route("/api/movies/:movieId/showtimes", post(handlers::add_showtime))
        .route(
            "/api/movies/:movieId/showtime/:showtimeId",
            get(handlers::get_availability),
        )
        // ----- Bookings -----
        .route("/api/bookings", post(handlers::create_booking))
        .route("/api/bookings/my-bookings", get(handlers::my_bookings))
        .route("/api/bookings/cancel/:bookingId", put(handlers::cancel_booking))
        .route("/api/bookings/:bookingId/seats/cancel", put(handlers::cancel_seats))
        // ----- Reviews -----
        .route(
            "/api/reviews/:id",
            get(handlers::list_reviews)
                .post(handlers::create_review)
                .put(handlers::update_review)
                .delete(handlers::delete_review),
        )
        // ----- Middleware -----
        .layer(middleware::from_fn(metrics::http_metrics_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
