// =============================================================================
// MODELS MODULE
// =============================================================================
// Data structures shared by the catalog, seat inventory, booking ledger and
// review services, plus the request/response shapes of the HTTP API.
//
// JSON uses camelCase field names (seatNumber, isBooked, ticketPrice, ...).
// =============================================================================

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// CATALOG RECORDS
// =============================================================================

/// A movie with its showtimes. The catalog owns this record; seat flags are
/// only changed through the seat inventory and `average_rating` only through
/// the rating aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: Uuid,
    pub title: String,
    pub genre: String,
    /// Poster reference (URL or asset key)
    pub poster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Price of one seat. Always positive.
    pub ticket_price: f64,
    pub showtimes: Vec<Showtime>,
    /// Mean of all current review ratings, 0 when there are none
    pub average_rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Movie {
    pub fn showtime(&self, showtime_id: Uuid) -> Option<&Showtime> {
        self.showtimes.iter().find(|s| s.id == showtime_id)
    }

    pub fn summary(&self) -> MovieSummary {
        MovieSummary {
            id: self.id,
            title: self.title.clone(),
            poster: self.poster.clone(),
        }
    }
}

/// A scheduled screening with its own seat map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Showtime {
    pub id: Uuid,
    /// Start time label, e.g. "10:00 AM"
    pub time: String,
    /// Seats in layout order (row-major)
    pub seats: Vec<Seat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    /// Unique within a showtime, e.g. "A1"
    pub seat_number: String,
    pub is_booked: bool,
}

impl Seat {
    pub fn free(seat_number: impl Into<String>) -> Self {
        Self {
            seat_number: seat_number.into(),
            is_booked: false,
        }
    }
}

/// Address of one showtime's seat map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowtimeRef {
    pub movie_id: Uuid,
    pub showtime_id: Uuid,
}

impl ShowtimeRef {
    pub fn new(movie_id: Uuid, showtime_id: Uuid) -> Self {
        Self {
            movie_id,
            showtime_id,
        }
    }
}

/// Metadata-only changes an admin may apply to a movie.
/// Showtimes, seats and the rating are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieUpdate {
    pub title: Option<String>,
    pub genre: Option<String>,
    pub poster: Option<String>,
    pub description: Option<String>,
    pub ticket_price: Option<f64>,
}

// =============================================================================
// BOOKING RECORDS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookedSeat {
    pub seat_number: String,
    pub is_cancelled: bool,
}

/// A completed purchase. `total_price` is fixed at creation and never
/// follows later catalog price changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub user_id: String,
    pub movie_id: Uuid,
    pub showtime_id: Uuid,
    pub seats: Vec<BookedSeat>,
    pub total_price: f64,
    pub booking_date: DateTime<Utc>,
}

impl Booking {
    pub fn showtime_ref(&self) -> ShowtimeRef {
        ShowtimeRef::new(self.movie_id, self.showtime_id)
    }

    /// Seat numbers that still hold a seat on the showtime.
    pub fn active_seat_numbers(&self) -> Vec<String> {
        self.seats
            .iter()
            .filter(|s| !s.is_cancelled)
            .map(|s| s.seat_number.clone())
            .collect()
    }

    pub fn is_fully_cancelled(&self) -> bool {
        self.seats.iter().all(|s| s.is_cancelled)
    }

    pub fn mark_cancelled(&mut self, seat_numbers: &[String]) {
        let cancelled: HashSet<&str> = seat_numbers.iter().map(String::as_str).collect();
        for seat in &mut self.seats {
            if cancelled.contains(seat.seat_number.as_str()) {
                seat.is_cancelled = true;
            }
        }
    }
}

// =============================================================================
// REVIEW RECORDS
// =============================================================================

/// One user's review of one movie. At most one per (user, movie).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub movie_id: Uuid,
    /// 1 to 5 inclusive
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// API REQUEST STRUCTURES
// =============================================================================

/// Body of `POST /api/movies`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMovieRequest {
    pub title: String,
    pub genre: String,
    pub poster: String,
    #[serde(default)]
    pub description: Option<String>,
    pub ticket_price: f64,
    /// Showtime labels; the configured defaults are used when absent
    #[serde(default)]
    pub showtimes: Option<Vec<String>>,
}

/// Body of `POST /api/movies/:movieId/showtimes`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddShowtimeRequest {
    pub time: String,
    #[serde(default)]
    pub rows: Option<u8>,
    #[serde(default)]
    pub columns: Option<u8>,
}

/// A requested seat, either `"A1"` or `{ "seatNumber": "A1" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SeatSelection {
    Number(String),
    #[serde(rename_all = "camelCase")]
    Object { seat_number: String },
}

impl SeatSelection {
    pub fn into_seat_number(self) -> String {
        match self {
            SeatSelection::Number(n) => n,
            SeatSelection::Object { seat_number } => seat_number,
        }
    }
}

/// Body of `POST /api/bookings`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub movie_id: Uuid,
    pub showtime_id: Uuid,
    pub seats: Vec<SeatSelection>,
}

/// Body of `PUT /api/bookings/:bookingId/seats/cancel`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSeatsRequest {
    pub seats: Vec<String>,
}

/// Body of review create/update. Rating is range-checked by the service so
/// that out-of-range values surface as INVALID_REQUEST.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub rating: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

// =============================================================================
// API RESPONSE STRUCTURES
// =============================================================================

/// Seat map snapshot for one showtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowtimeAvailability {
    pub movie_id: Uuid,
    pub showtime_id: Uuid,
    pub time: String,
    pub seats: Vec<Seat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieSummary {
    pub id: Uuid,
    pub title: String,
    pub poster: String,
}

/// A booking joined with the display fields of its movie and showtime.
/// `movie` is absent when the movie has since been removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub movie: Option<MovieSummary>,
    pub showtime_label: Option<String>,
}

/// A review plus the movie's rating after the mutation was applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMutationResponse {
    pub movie_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<Review>,
    pub average_rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub store: bool,
    /// `None` when caching is disabled
    pub redis: Option<bool>,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type/code, e.g. "SEAT_CONFLICT"
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Seat numbers or other structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}
