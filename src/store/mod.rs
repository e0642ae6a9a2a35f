// =============================================================================
// STORE MODULE
// =============================================================================
// The persistence boundary. Every backend must uphold one contract:
// a seat-state change and its booking-ledger write are applied together or
// not at all, and only if the showtime's seat map has not changed since it
// was read (version check).
//
// Two implementations:
// - memory::MemoryStore   development and tests
// - postgres::PgStore     production (sqlx / PostgreSQL)
// and one decorator:
// - retrying::RetryingStore  bounded retries of transient failures
// =============================================================================

pub mod memory;
pub mod postgres;
pub mod retrying;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Booking, Movie, MovieUpdate, Review, Seat, Showtime};

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use retrying::RetryingStore;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient failure (connection lost, pool timeout). Safe to retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The showtime's seat map changed after it was read
    #[error("seat map version conflict for showtime {0}")]
    VersionConflict(Uuid),

    /// A record the write depends on does not exist (any more)
    #[error("record missing: {0}")]
    Missing(String),

    /// Uniqueness violation
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// Referential restriction (e.g. deleting a movie with active bookings)
    #[error("record in use: {0}")]
    InUse(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => StoreError::Duplicate(db.message().to_string()),
                Some("23503") => StoreError::InUse(db.message().to_string()),
                // serialization_failure / deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Unavailable(db.message().to_string()),
                _ => StoreError::Backend(err.to_string()),
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// SEAT MAP TYPES
// =============================================================================

/// A showtime's seats as read from storage, with the version token used for
/// the optimistic check in `apply_seat_change`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatMap {
    pub movie_id: Uuid,
    pub showtime_id: Uuid,
    pub time: String,
    pub version: i64,
    pub seats: Vec<Seat>,
}

impl SeatMap {
    pub fn seat(&self, seat_number: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.seat_number == seat_number)
    }
}

/// Set `is_booked = booked` on `seat_numbers`, provided the showtime is still
/// at `expected_version`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatChange {
    pub movie_id: Uuid,
    pub showtime_id: Uuid,
    pub expected_version: i64,
    pub seat_numbers: Vec<String>,
    pub booked: bool,
}

/// The ledger write committed together with a seat change.
#[derive(Debug, Clone, Copy)]
pub enum LedgerWrite<'a> {
    None,
    Insert(&'a Booking),
    /// Flag these seats of an existing booking as cancelled
    MarkCancelled {
        booking_id: Uuid,
        seat_numbers: &'a [String],
    },
    Remove(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    InUse,
}

/// Computes an aggregate rating from the full set of current ratings.
pub type RatingFn = dyn Fn(&[u8]) -> f64 + Send + Sync;

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait]
pub trait Store: Send + Sync {
    // ----- Catalog -----
    async fn insert_movie(&self, movie: &Movie) -> StoreResult<()>;
    async fn get_movie(&self, id: Uuid) -> StoreResult<Option<Movie>>;
    /// Newest first
    async fn list_movies(&self) -> StoreResult<Vec<Movie>>;
    async fn update_movie(&self, id: Uuid, update: &MovieUpdate) -> StoreResult<Option<Movie>>;
    /// Refuses (`InUse`) while any booking references the movie.
    /// Removes the movie's reviews with it.
    async fn delete_movie(&self, id: Uuid) -> StoreResult<DeleteOutcome>;
    /// Returns false when the movie does not exist
    async fn add_showtime(&self, movie_id: Uuid, showtime: &Showtime) -> StoreResult<bool>;

    // ----- Seats -----
    async fn load_seat_map(&self, movie_id: Uuid, showtime_id: Uuid) -> StoreResult<Option<SeatMap>>;

    /// Atomically: check version, flip the listed seats, bump the version and
    /// apply `ledger`. Any failure leaves seats and ledger untouched.
    async fn apply_seat_change(&self, change: &SeatChange, ledger: LedgerWrite<'_>) -> StoreResult<()>;

    // ----- Ledger -----
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;
    /// Newest first
    async fn list_bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>>;

    // ----- Reviews -----
    /// `Duplicate` when the user already reviewed the movie
    async fn insert_review(&self, review: &Review) -> StoreResult<()>;
    async fn get_review(&self, id: Uuid) -> StoreResult<Option<Review>>;
    async fn update_review(&self, review: &Review) -> StoreResult<()>;
    async fn delete_review(&self, id: Uuid) -> StoreResult<bool>;
    async fn list_reviews_for_movie(&self, movie_id: Uuid) -> StoreResult<Vec<Review>>;

    /// Read every current rating of the movie, write `compute(ratings)` as its
    /// average, serialized against other refreshes of the same movie.
    /// Returns `None` when the movie does not exist.
    async fn refresh_average_rating(&self, movie_id: Uuid, compute: &RatingFn) -> StoreResult<Option<f64>>;

    async fn health_check(&self) -> bool;
}
