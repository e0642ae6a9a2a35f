// =============================================================================
// IN-MEMORY STORE
// =============================================================================
// Backend for development and tests. All tables sit behind one lock, so
// `apply_seat_change` is atomic: the version check, seat flips and ledger
// write happen while the write guard is held.
//
// Fault hooks simulate what a shared database does to a writer: transient
// failures, acknowledgements lost after commit, and competing writers.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    DeleteOutcome, LedgerWrite, RatingFn, SeatChange, SeatMap, Store, StoreError, StoreResult,
};
use crate::models::{Booking, Movie, MovieUpdate, Review, Showtime};

#[derive(Default)]
struct Tables {
    movies: HashMap<Uuid, Movie>,
    /// Seat map version per showtime id
    versions: HashMap<Uuid, i64>,
    bookings: HashMap<Uuid, Booking>,
    reviews: HashMap<Uuid, Review>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failing_writes: AtomicU32,
    lost_acks: AtomicU32,
    competing_changes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write operations fail with `StoreError::Unavailable`.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` seat changes commit and then report
    /// `StoreError::Unavailable`, as if the acknowledgement was lost.
    pub fn lose_next_acks(&self, n: u32) {
        self.lost_acks.store(n, Ordering::SeqCst);
    }

    /// Make another writer bump the seat map version right before each of
    /// the next `n` seat changes, so they fail their version check.
    pub fn compete_with_next_seat_changes(&self, n: u32) {
        self.competing_changes.store(n, Ordering::SeqCst);
    }

    fn injected_fault(&self) -> StoreResult<()> {
        if take_one(&self.failing_writes) {
            Err(StoreError::Unavailable("injected write failure".into()))
        } else {
            Ok(())
        }
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_movie(&self, movie: &Movie) -> StoreResult<()> {
        self.injected_fault()?;
        let mut t = self.tables.write().await;
        if t.movies.contains_key(&movie.id) {
            return Err(StoreError::Duplicate(format!("movie {}", movie.id)));
        }
        for showtime in &movie.showtimes {
            t.versions.insert(showtime.id, 0);
        }
        t.movies.insert(movie.id, movie.clone());
        Ok(())
    }

    async fn get_movie(&self, id: Uuid) -> StoreResult<Option<Movie>> {
        Ok(self.tables.read().await.movies.get(&id).cloned())
    }

    async fn list_movies(&self) -> StoreResult<Vec<Movie>> {
        let t = self.tables.read().await;
        let mut movies: Vec<Movie> = t.movies.values().cloned().collect();
        movies.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(movies)
    }

    async fn update_movie(&self, id: Uuid, update: &MovieUpdate) -> StoreResult<Option<Movie>> {
        self.injected_fault()?;
        let mut t = self.tables.write().await;
        let Some(movie) = t.movies.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = &update.title {
            movie.title = title.clone();
        }
        if let Some(genre) = &update.genre {
            movie.genre = genre.clone();
        }
        if let Some(poster) = &update.poster {
            movie.poster = poster.clone();
        }
        if let Some(description) = &update.description {
            movie.description = Some(description.clone());
        }
        if let Some(price) = update.ticket_price {
            movie.ticket_price = price;
        }
        movie.updated_at = Utc::now();
        Ok(Some(movie.clone()))
    }

    async fn delete_movie(&self, id: Uuid) -> StoreResult<DeleteOutcome> {
        self.injected_fault()?;
        let mut t = self.tables.write().await;
        if !t.movies.contains_key(&id) {
            return Ok(DeleteOutcome::NotFound);
        }
        if t.bookings.values().any(|b| b.movie_id == id) {
            return Ok(DeleteOutcome::InUse);
        }
        if let Some(movie) = t.movies.remove(&id) {
            for showtime in &movie.showtimes {
                t.versions.remove(&showtime.id);
            }
        }
        t.reviews.retain(|_, r| r.movie_id != id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn add_showtime(&self, movie_id: Uuid, showtime: &Showtime) -> StoreResult<bool> {
        self.injected_fault()?;
        let mut t = self.tables.write().await;
        let Some(movie) = t.movies.get_mut(&movie_id) else {
            return Ok(false);
        };
        movie.showtimes.push(showtime.clone());
        movie.updated_at = Utc::now();
        t.versions.insert(showtime.id, 0);
        Ok(true)
    }

    async fn load_seat_map(&self, movie_id: Uuid, showtime_id: Uuid) -> StoreResult<Option<SeatMap>> {
        let t = self.tables.read().await;
        let Some(showtime) = t.movies.get(&movie_id).and_then(|m| m.showtime(showtime_id)) else {
            return Ok(None);
        };
        Ok(Some(SeatMap {
            movie_id,
            showtime_id,
            time: showtime.time.clone(),
            version: t.versions.get(&showtime_id).copied().unwrap_or_default(),
            seats: showtime.seats.clone(),
        }))
    }

    async fn apply_seat_change(&self, change: &SeatChange, ledger: LedgerWrite<'_>) -> StoreResult<()> {
        self.injected_fault()?;
        let mut guard = self.tables.write().await;
        let t = &mut *guard;

        if take_one(&self.competing_changes) {
            if let Some(version) = t.versions.get_mut(&change.showtime_id) {
                *version += 1;
            }
        }

        let version = t
            .versions
            .get(&change.showtime_id)
            .copied()
            .ok_or_else(|| StoreError::Missing(format!("showtime {}", change.showtime_id)))?;
        if version != change.expected_version {
            return Err(StoreError::VersionConflict(change.showtime_id));
        }

        // Validate the ledger target before touching anything
        match ledger {
            LedgerWrite::None => {}
            LedgerWrite::Insert(booking) => {
                if t.bookings.contains_key(&booking.id) {
                    return Err(StoreError::Duplicate(format!("booking {}", booking.id)));
                }
            }
            LedgerWrite::MarkCancelled { booking_id, .. } | LedgerWrite::Remove(booking_id) => {
                if !t.bookings.contains_key(&booking_id) {
                    return Err(StoreError::Missing(format!("booking {booking_id}")));
                }
            }
        }

        let showtime = t
            .movies
            .get_mut(&change.movie_id)
            .and_then(|m| m.showtimes.iter_mut().find(|s| s.id == change.showtime_id))
            .ok_or_else(|| StoreError::Missing(format!("showtime {}", change.showtime_id)))?;
        let targets: HashSet<&str> = change.seat_numbers.iter().map(String::as_str).collect();
        for seat in showtime.seats.iter_mut() {
            if targets.contains(seat.seat_number.as_str()) {
                seat.is_booked = change.booked;
            }
        }
        t.versions.insert(change.showtime_id, version + 1);

        match ledger {
            LedgerWrite::None => {}
            LedgerWrite::Insert(booking) => {
                t.bookings.insert(booking.id, booking.clone());
            }
            LedgerWrite::MarkCancelled {
                booking_id,
                seat_numbers,
            } => {
                if let Some(booking) = t.bookings.get_mut(&booking_id) {
                    booking.mark_cancelled(seat_numbers);
                }
            }
            LedgerWrite::Remove(booking_id) => {
                t.bookings.remove(&booking_id);
            }
        }

        if take_one(&self.lost_acks) {
            return Err(StoreError::Unavailable("acknowledgement lost".into()));
        }
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.tables.read().await.bookings.get(&id).cloned())
    }

    async fn list_bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let t = self.tables.read().await;
        let mut bookings: Vec<Booking> = t
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.booking_date.cmp(&a.booking_date));
        Ok(bookings)
    }

    async fn insert_review(&self, review: &Review) -> StoreResult<()> {
        self.injected_fault()?;
        let mut t = self.tables.write().await;
        let duplicate = t
            .reviews
            .values()
            .any(|r| r.user_id == review.user_id && r.movie_id == review.movie_id);
        if duplicate {
            return Err(StoreError::Duplicate(format!(
                "review by {} for movie {}",
                review.user_id, review.movie_id
            )));
        }
        t.reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn get_review(&self, id: Uuid) -> StoreResult<Option<Review>> {
        Ok(self.tables.read().await.reviews.get(&id).cloned())
    }

    async fn update_review(&self, review: &Review) -> StoreResult<()> {
        self.injected_fault()?;
        let mut t = self.tables.write().await;
        match t.reviews.get_mut(&review.id) {
            Some(existing) => {
                *existing = review.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(format!("review {}", review.id))),
        }
    }

    async fn delete_review(&self, id: Uuid) -> StoreResult<bool> {
        self.injected_fault()?;
        Ok(self.tables.write().await.reviews.remove(&id).is_some())
    }

    async fn list_reviews_for_movie(&self, movie_id: Uuid) -> StoreResult<Vec<Review>> {
        let t = self.tables.read().await;
        let mut reviews: Vec<Review> = t
            .reviews
            .values()
            .filter(|r| r.movie_id == movie_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }

    async fn refresh_average_rating(&self, movie_id: Uuid, compute: &RatingFn) -> StoreResult<Option<f64>> {
        self.injected_fault()?;
        let mut guard = self.tables.write().await;
        let t = &mut *guard;
        let ratings: Vec<u8> = t
            .reviews
            .values()
            .filter(|r| r.movie_id == movie_id)
            .map(|r| r.rating)
            .collect();
        let Some(movie) = t.movies.get_mut(&movie_id) else {
            return Ok(None);
        };
        let average = compute(&ratings);
        movie.average_rating = average;
        Ok(Some(average))
    }

    async fn health_check(&self) -> bool {
        true
    }
}
