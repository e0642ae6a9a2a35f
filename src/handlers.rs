// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP request handlers (controller layer). Handlers extract the caller and
// request data, call one service, keep the movie cache in step and shape the
// response. All business rules live in the services.
//
// EXTRACTORS USED:
// - State<Arc<AppState>>: shared services
// - CurrentUser / AdminUser: identity from trusted upstream headers
// - AppPath<T>, AppJson<T>: path parameters and request bodies; malformed
//   input is rejected as 400 INVALID_REQUEST
// =============================================================================

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{AdminUser, CurrentUser};
use crate::cache::Cached;
use crate::error::AppResult;
use crate::extract::{AppJson, AppPath};
use crate::models::*;
use crate::AppState;

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness check
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check. The store must answer; Redis only counts when caching
/// is configured.
///
/// GET /ready
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    let store_healthy = state.store.health_check().await;
    let redis_healthy = state.cache.ping().await;

    let all_healthy = store_healthy && redis_healthy != Some(false);
    let response = ReadinessResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: ReadinessChecks {
            store: store_healthy,
            redis: redis_healthy,
        },
    };

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

/// Prometheus scrape endpoint
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}

// =============================================================================
// MOVIE ENDPOINTS
// =============================================================================

/// GET /api/movies
pub async fn list_movies(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Movie>>> {
    let ticket = match state.cache.get_movie_list().await {
        Cached::Hit(movies) => return Ok(Json(movies)),
        Cached::Miss(ticket) => ticket,
    };
    let movies = state.catalog.list_movies().await?;
    state.cache.put_movie_list(&movies, ticket).await;
    Ok(Json(movies))
}

/// Uncached listing for the admin console.
///
/// GET /api/movies/admin
pub async fn admin_list_movies(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> AppResult<Json<Vec<Movie>>> {
    Ok(Json(state.catalog.list_movies().await?))
}

/// GET /api/movies/:movieId
pub async fn get_movie(
    State(state): State<Arc<AppState>>,
    AppPath(movie_id): AppPath<Uuid>,
) -> AppResult<Json<Movie>> {
    let ticket = match state.cache.get_movie(movie_id).await {
        Cached::Hit(movie) => return Ok(Json(movie)),
        Cached::Miss(ticket) => ticket,
    };
    let movie = state.catalog.get_movie(movie_id).await?;
    state.cache.put_movie(&movie, ticket).await;
    Ok(Json(movie))
}

/// POST /api/movies
pub async fn create_movie(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    AppJson(request): AppJson<CreateMovieRequest>,
) -> AppResult<(StatusCode, Json<Movie>)> {
    let movie = state.catalog.create_movie(request).await?;
    state.cache.invalidate_movie(movie.id).await;
    tracing::info!(movie_id = %movie.id, admin = %admin.id, "Movie created by admin");
    Ok((StatusCode::CREATED, Json(movie)))
}

/// PUT /api/movies/:movieId
pub async fn update_movie(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    AppPath(movie_id): AppPath<Uuid>,
    AppJson(update): AppJson<MovieUpdate>,
) -> AppResult<Json<Movie>> {
    let movie = state.catalog.update_movie(movie_id, update).await?;
    state.cache.invalidate_movie(movie_id).await;
    Ok(Json(movie))
}

/// DELETE /api/movies/:movieId
pub async fn delete_movie(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    AppPath(movie_id): AppPath<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    state.catalog.delete_movie(movie_id).await?;
    state.cache.invalidate_movie(movie_id).await;
    Ok(Json(MessageResponse::new("Movie deleted successfully")))
}

/// POST /api/movies/:movieId/showtimes
pub async fn add_showtime(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    AppPath(movie_id): AppPath<Uuid>,
    AppJson(request): AppJson<AddShowtimeRequest>,
) -> AppResult<(StatusCode, Json<Showtime>)> {
    let showtime = state.catalog.add_showtime(movie_id, request).await?;
    state.cache.invalidate_movie(movie_id).await;
    Ok((StatusCode::CREATED, Json(showtime)))
}

/// Seat map of one showtime, read from the store on every call.
///
/// GET /api/movies/:movieId/showtime/:showtimeId
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    AppPath((movie_id, showtime_id)): AppPath<(Uuid, Uuid)>,
) -> AppResult<Json<ShowtimeAvailability>> {
    let availability = state
        .inventory
        .availability(ShowtimeRef::new(movie_id, showtime_id))
        .await?;
    Ok(Json(availability))
}

// =============================================================================
// BOOKING ENDPOINTS
// =============================================================================

/// POST /api/bookings
///
/// # Response
/// - 201 Created: the booking
/// - 404: movie or showtime absent
/// - 409 SEAT_CONFLICT: `details.seats` lists the taken seats
/// - 422 SEAT_NOT_FOUND: `details.seats` lists seats outside the layout
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(request): AppJson<CreateBookingRequest>,
) -> AppResult<(StatusCode, Json<Booking>)> {
    let booking = state.ledger.create_booking(&user.id, request).await?;
    state.cache.invalidate_movie(booking.movie_id).await;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// GET /api/bookings/my-bookings
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> AppResult<Json<Vec<BookingView>>> {
    Ok(Json(state.ledger.list_bookings(&user.id).await?))
}

/// PUT /api/bookings/cancel/:bookingId
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(booking_id): AppPath<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let booking = state.ledger.cancel_booking(booking_id, &user.id).await?;
    state.cache.invalidate_movie(booking.movie_id).await;
    Ok(Json(MessageResponse::new("Booking cancelled successfully")))
}

/// Returns the updated booking, or a message when the last active seat was
/// cancelled and the booking removed.
///
/// PUT /api/bookings/:bookingId/seats/cancel
pub async fn cancel_seats(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(booking_id): AppPath<Uuid>,
    AppJson(request): AppJson<CancelSeatsRequest>,
) -> AppResult<Response> {
    let booking = state
        .ledger
        .cancel_seats(booking_id, &user.id, &request.seats)
        .await?;
    state.cache.invalidate_movie(booking.movie_id).await;
    if booking.is_fully_cancelled() {
        return Ok(Json(MessageResponse::new("Booking cancelled successfully")).into_response());
    }
    Ok(Json(booking).into_response())
}

// =============================================================================
// REVIEW ENDPOINTS
// =============================================================================
// GET/POST take a movie id, PUT/DELETE a review id; axum needs one parameter
// name per path segment, so all four share `/api/reviews/:id`.

/// GET /api/reviews/:movieId
pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    AppPath(movie_id): AppPath<Uuid>,
) -> AppResult<Json<Vec<Review>>> {
    Ok(Json(state.reviews.list_reviews(movie_id).await?))
}

/// POST /api/reviews/:movieId
pub async fn create_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(movie_id): AppPath<Uuid>,
    AppJson(request): AppJson<ReviewRequest>,
) -> AppResult<(StatusCode, Json<ReviewMutationResponse>)> {
    let response = state.reviews.create_review(movie_id, &user, request).await?;
    state.cache.invalidate_movie(movie_id).await;
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /api/reviews/:reviewId
pub async fn update_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(review_id): AppPath<Uuid>,
    AppJson(request): AppJson<ReviewRequest>,
) -> AppResult<Json<ReviewMutationResponse>> {
    let response = state.reviews.update_review(review_id, &user, request).await?;
    state.cache.invalidate_movie(response.movie_id).await;
    Ok(Json(response))
}

/// DELETE /api/reviews/:reviewId
pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppPath(review_id): AppPath<Uuid>,
) -> AppResult<Json<ReviewMutationResponse>> {
    let response = state.reviews.delete_review(review_id, &user).await?;
    state.cache.invalidate_movie(response.movie_id).await;
    Ok(Json(response))
}
