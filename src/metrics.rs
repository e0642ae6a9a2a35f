// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the booking service, scraped from GET /metrics.
//
// - Counters: requests, bookings by outcome, seat conflicts, retries
// - Histograms: HTTP, database and Redis latency
// Labels stay low-cardinality: no user, booking or seat ids.
// =============================================================================

use std::time::Instant;

use anyhow::Result;
use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// METRIC NAMES
// =============================================================================

/// Labels: method, endpoint, status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Labels: outcome (created/conflict/rejected/failed)
pub const BOOKINGS_TOTAL: &str = "bookings_total";

/// Reserve attempts that found at least one requested seat taken
pub const SEAT_CONFLICTS_TOTAL: &str = "seat_conflicts_total";

/// Reserve+commit rounds repeated after a seat map version conflict
pub const RESERVE_RETRIES_TOTAL: &str = "reserve_retries_total";

/// Labels: scope (booking/seats)
pub const BOOKING_CANCELLATIONS_TOTAL: &str = "booking_cancellations_total";

pub const RATING_RECOMPUTATIONS_TOTAL: &str = "rating_recomputations_total";

/// Labels: operation
pub const DB_QUERY_DURATION_SECONDS: &str = "db_query_duration_seconds";

/// Labels: operation (get/set/delete/ping)
pub const REDIS_OPERATION_DURATION_SECONDS: &str = "redis_operation_duration_seconds";

// =============================================================================
// SETUP
// =============================================================================
/// Install the global Prometheus recorder and return the handle that renders
/// the scrape output.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    // 1ms .. 10s
    let latency_buckets = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(DB_QUERY_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(REDIS_OPERATION_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_counter!(BOOKINGS_TOTAL, "Booking attempts by outcome");
    describe_counter!(
        SEAT_CONFLICTS_TOTAL,
        "Reserve attempts rejected because a requested seat was taken"
    );
    describe_counter!(
        RESERVE_RETRIES_TOTAL,
        "Booking attempts repeated after a concurrent seat map change"
    );
    describe_counter!(BOOKING_CANCELLATIONS_TOTAL, "Cancellations of whole bookings or single seats");
    describe_counter!(RATING_RECOMPUTATIONS_TOTAL, "Average rating recomputations");
    describe_histogram!(DB_QUERY_DURATION_SECONDS, "Database query latency in seconds");
    describe_histogram!(REDIS_OPERATION_DURATION_SECONDS, "Redis operation latency in seconds");

    Ok(handle)
}

// =============================================================================
// HELPERS
// =============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

pub fn record_booking(outcome: &'static str) {
    counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_seat_conflict() {
    counter!(SEAT_CONFLICTS_TOTAL).increment(1);
}

pub fn record_reserve_retry() {
    counter!(RESERVE_RETRIES_TOTAL).increment(1);
}

pub fn record_cancellation(scope: &'static str) {
    counter!(BOOKING_CANCELLATIONS_TOTAL, "scope" => scope).increment(1);
}

pub fn record_rating_recomputation() {
    counter!(RATING_RECOMPUTATIONS_TOTAL).increment(1);
}

pub fn record_db_query(operation: &str, duration_secs: f64) {
    histogram!(
        DB_QUERY_DURATION_SECONDS,
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

pub fn record_redis_operation(operation: &str, duration_secs: f64) {
    histogram!(
        REDIS_OPERATION_DURATION_SECONDS,
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

// =============================================================================
// HTTP MIDDLEWARE
// =============================================================================
/// Records count and latency of every request, labelled by route template
/// (`/api/bookings/:bookingId`) rather than the raw path.
pub async fn http_metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    record_http_request(
        &method,
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
