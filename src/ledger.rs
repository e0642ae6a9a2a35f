// =============================================================================
// BOOKING LEDGER
// =============================================================================
// Booking lifecycle on top of the seat inventory.
//
// Create: reserve seats -> commit seats + booking row as one store write.
// Cancel: lock showtime -> re-read booking -> release its active seats +
//         remove (or partially cancel) the booking as one store write.
//
// A version conflict means another process changed the seat map between our
// read and our write; the whole reserve/commit round is repeated a bounded
// number of times. Business rejections are never retried.
// =============================================================================

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::{AppError, AppResult};
use crate::inventory::SeatInventory;
use crate::metrics;
use crate::models::{BookedSeat, Booking, BookingView, CreateBookingRequest, ShowtimeRef};
use crate::store::{LedgerWrite, Store, StoreError};

pub struct BookingLedger {
    store: Arc<dyn Store>,
    catalog: Arc<Catalog>,
    inventory: Arc<SeatInventory>,
}

impl BookingLedger {
    pub fn new(store: Arc<dyn Store>, catalog: Arc<Catalog>, inventory: Arc<SeatInventory>) -> Self {
        Self {
            store,
            catalog,
            inventory,
        }
    }

    // -------------------------------------------------------------------------
    // CREATE
    // -------------------------------------------------------------------------

    pub async fn create_booking(&self, user_id: &str, req: CreateBookingRequest) -> AppResult<Booking> {
        let showtime = ShowtimeRef::new(req.movie_id, req.showtime_id);
        let requested: Vec<String> = req
            .seats
            .into_iter()
            .map(|s| s.into_seat_number())
            .collect();
        let seat_numbers = unique_seats(&requested)?;

        let (movie, _) = self.catalog.resolve_showtime(showtime).await?;
        let booking = Booking {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            movie_id: showtime.movie_id,
            showtime_id: showtime.showtime_id,
            seats: seat_numbers
                .iter()
                .map(|n| BookedSeat {
                    seat_number: n.clone(),
                    is_cancelled: false,
                })
                .collect(),
            total_price: seat_numbers.len() as f64 * movie.ticket_price,
            booking_date: Utc::now(),
        };

        for attempt in 1..=self.inventory.max_attempts() {
            let reservation = match self.inventory.reserve(showtime, &seat_numbers).await {
                Ok(reservation) => reservation,
                Err(e) => {
                    if matches!(e, AppError::SeatConflict { .. }) {
                        metrics::record_seat_conflict();
                        metrics::record_booking("conflict");
                    } else {
                        metrics::record_booking("rejected");
                    }
                    return Err(e);
                }
            };

            match reservation.commit(LedgerWrite::Insert(&booking)).await {
                Ok(()) => {
                    metrics::record_booking("created");
                    info!(
                        booking_id = %booking.id,
                        user_id = %booking.user_id,
                        showtime_id = %booking.showtime_id,
                        seats = ?seat_numbers,
                        total_price = booking.total_price,
                        "Booking created"
                    );
                    return Ok(booking);
                }
                Err(e) => {
                    // A commit whose acknowledgement was lost shows up here as
                    // either a version conflict or a storage error.
                    if self.booking_exists(booking.id).await {
                        metrics::record_booking("created");
                        info!(booking_id = %booking.id, "Booking found after ambiguous commit");
                        return Ok(booking);
                    }
                    match e {
                        StoreError::VersionConflict(_) => {
                            metrics::record_reserve_retry();
                            warn!(showtime_id = %showtime.showtime_id, attempt, "Seat map changed before commit, retrying");
                        }
                        other => {
                            metrics::record_booking("failed");
                            return Err(other.into());
                        }
                    }
                }
            }
        }

        metrics::record_seat_conflict();
        metrics::record_booking("conflict");
        Err(AppError::SeatConflict {
            seats: seat_numbers.into_iter().collect(),
        })
    }

    // -------------------------------------------------------------------------
    // CANCEL
    // -------------------------------------------------------------------------

    /// Cancel a whole booking: free its still-active seats and delete it.
    /// Returns the booking as it was before removal.
    /// A booking that does not belong to `user_id` is reported as not found.
    pub async fn cancel_booking(&self, booking_id: Uuid, user_id: &str) -> AppResult<Booking> {
        let owned = self.owned_booking(booking_id, user_id).await?;
        let showtime = owned.showtime_ref();

        for attempt in 1..=self.inventory.max_attempts() {
            let guard = self.inventory.acquire(showtime).await?;
            let Some(booking) = self.store.get_booking(booking_id).await? else {
                if attempt > 1 {
                    // our earlier ambiguous commit went through
                    return Ok(owned);
                }
                return Err(booking_not_found(booking_id));
            };

            let active: BTreeSet<String> = booking.active_seat_numbers().into_iter().collect();
            let release = self.inventory.prepare_release(guard, &active).await?;
            match release.commit(LedgerWrite::Remove(booking_id)).await {
                Ok(()) => {
                    metrics::record_cancellation("booking");
                    info!(booking_id = %booking_id, user_id, seats = ?active, "Booking cancelled");
                    return Ok(booking);
                }
                Err(StoreError::VersionConflict(_)) => {
                    metrics::record_reserve_retry();
                    warn!(booking_id = %booking_id, attempt, "Seat map changed during cancellation, retrying");
                }
                Err(StoreError::Missing(_)) => return Err(booking_not_found(booking_id)),
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::StorageUnavailable(format!(
            "showtime {} kept changing during cancellation",
            showtime.showtime_id
        )))
    }

    /// Cancel some seats of a booking. Seats already cancelled are skipped.
    /// Returns the booking with those seats flagged; once no active seat is
    /// left the booking is removed from the ledger.
    pub async fn cancel_seats(
        &self,
        booking_id: Uuid,
        user_id: &str,
        seats: &[String],
    ) -> AppResult<Booking> {
        let requested = unique_seats(seats)?;
        let showtime = self.owned_booking(booking_id, user_id).await?.showtime_ref();

        for attempt in 1..=self.inventory.max_attempts() {
            let guard = self.inventory.acquire(showtime).await?;
            let mut booking = self
                .store
                .get_booking(booking_id)
                .await?
                .ok_or_else(|| booking_not_found(booking_id))?;

            let foreign: Vec<&str> = requested
                .iter()
                .filter(|n| !booking.seats.iter().any(|s| &s.seat_number == *n))
                .map(String::as_str)
                .collect();
            if !foreign.is_empty() {
                return Err(AppError::InvalidRequest(format!(
                    "seats not part of booking: {}",
                    foreign.join(", ")
                )));
            }

            let active = booking.active_seat_numbers();
            let to_cancel: BTreeSet<String> = requested
                .iter()
                .filter(|n| active.contains(*n))
                .cloned()
                .collect();
            if to_cancel.is_empty() {
                return Ok(booking);
            }

            let removes_booking = to_cancel.len() == active.len();
            let cancelled: Vec<String> = to_cancel.iter().cloned().collect();
            let ledger = if removes_booking {
                LedgerWrite::Remove(booking_id)
            } else {
                LedgerWrite::MarkCancelled {
                    booking_id,
                    seat_numbers: &cancelled,
                }
            };

            let release = self.inventory.prepare_release(guard, &to_cancel).await?;
            match release.commit(ledger).await {
                Ok(()) => {
                    metrics::record_cancellation("seats");
                    info!(booking_id = %booking_id, user_id, seats = ?cancelled, removes_booking, "Seats cancelled");
                    booking.mark_cancelled(&cancelled);
                    return Ok(booking);
                }
                Err(StoreError::VersionConflict(_)) => {
                    metrics::record_reserve_retry();
                    warn!(booking_id = %booking_id, attempt, "Seat map changed during seat cancellation, retrying");
                }
                Err(StoreError::Missing(_)) => return Err(booking_not_found(booking_id)),
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::StorageUnavailable(format!(
            "showtime {} kept changing during cancellation",
            showtime.showtime_id
        )))
    }

    // -------------------------------------------------------------------------
    // HISTORY
    // -------------------------------------------------------------------------

    /// The user's bookings, newest first, joined with movie display fields.
    pub async fn list_bookings(&self, user_id: &str) -> AppResult<Vec<BookingView>> {
        let bookings = self.store.list_bookings_for_user(user_id).await?;

        let mut movies = HashMap::new();
        for booking in &bookings {
            if !movies.contains_key(&booking.movie_id) {
                let movie = self.store.get_movie(booking.movie_id).await?;
                movies.insert(booking.movie_id, movie);
            }
        }

        Ok(bookings
            .into_iter()
            .map(|booking| {
                let movie = movies.get(&booking.movie_id).and_then(Option::as_ref);
                BookingView {
                    movie: movie.map(|m| m.summary()),
                    showtime_label: movie
                        .and_then(|m| m.showtime(booking.showtime_id))
                        .map(|s| s.time.clone()),
                    booking,
                }
            })
            .collect())
    }

    async fn owned_booking(&self, booking_id: Uuid, user_id: &str) -> AppResult<Booking> {
        match self.store.get_booking(booking_id).await? {
            Some(booking) if booking.user_id == user_id => Ok(booking),
            _ => Err(booking_not_found(booking_id)),
        }
    }

    async fn booking_exists(&self, booking_id: Uuid) -> bool {
        matches!(self.store.get_booking(booking_id).await, Ok(Some(_)))
    }
}

/// Seat numbers as a set. Empty selections and repeated seats are rejected.
fn unique_seats(seats: &[String]) -> AppResult<BTreeSet<String>> {
    if seats.is_empty() {
        return Err(AppError::InvalidRequest("no seats selected".into()));
    }
    let set: BTreeSet<String> = seats.iter().cloned().collect();
    if set.len() != seats.len() {
        return Err(AppError::InvalidRequest("a seat is selected more than once".into()));
    }
    Ok(set)
}

fn booking_not_found(booking_id: Uuid) -> AppError {
    AppError::not_found(format!("booking {booking_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SeatLayout;
    use crate::config::BookingConfig;
    use crate::models::{CreateMovieRequest, MovieUpdate, SeatSelection};
    use crate::retry::RetryConfig;
    use crate::store::{MemoryStore, RetryingStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        catalog: Arc<Catalog>,
        ledger: BookingLedger,
        showtime: ShowtimeRef,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let retrying: Arc<dyn Store> = Arc::new(RetryingStore::new(store.clone(), RetryConfig::immediate(2)));
        let catalog = Arc::new(Catalog::new(
            retrying.clone(),
            SeatLayout::new(1, 3).unwrap(),
            vec!["07:00 PM".into()],
        ));
        let inventory = Arc::new(SeatInventory::new(retrying.clone(), &BookingConfig::default()));
        let ledger = BookingLedger::new(retrying, catalog.clone(), inventory);

        let movie = catalog
            .create_movie(CreateMovieRequest {
                title: "Heat".into(),
                genre: "Crime".into(),
                poster: "heat.jpg".into(),
                description: None,
                ticket_price: 9.5,
                showtimes: None,
            })
            .await
            .unwrap();
        let showtime = ShowtimeRef::new(movie.id, movie.showtimes[0].id);
        Fixture {
            store,
            catalog,
            ledger,
            showtime,
        }
    }

    fn request(showtime: ShowtimeRef, seats: &[&str]) -> CreateBookingRequest {
        CreateBookingRequest {
            movie_id: showtime.movie_id,
            showtime_id: showtime.showtime_id,
            seats: seats
                .iter()
                .map(|s| SeatSelection::Number(s.to_string()))
                .collect(),
        }
    }

    async fn booked_seats(f: &Fixture) -> Vec<String> {
        f.store
            .load_seat_map(f.showtime.movie_id, f.showtime.showtime_id)
            .await
            .unwrap()
            .unwrap()
            .seats
            .into_iter()
            .filter(|s| s.is_booked)
            .map(|s| s.seat_number)
            .collect()
    }

    #[tokio::test]
    async fn price_is_fixed_at_booking_time() {
        let f = fixture().await;
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1", "A2"]))
            .await
            .unwrap();
        assert_eq!(booking.total_price, 19.0);

        f.catalog
            .update_movie(
                f.showtime.movie_id,
                MovieUpdate {
                    ticket_price: Some(20.0),
                    ..MovieUpdate::default()
                },
            )
            .await
            .unwrap();
        let stored = f.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.total_price, 19.0);
    }

    #[tokio::test]
    async fn rejects_empty_and_repeated_seats() {
        let f = fixture().await;
        assert!(matches!(
            f.ledger.create_booking("u1", request(f.showtime, &[])).await,
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            f.ledger.create_booking("u1", request(f.showtime, &["A1", "A1"])).await,
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn missing_movie_and_showtime() {
        let f = fixture().await;
        let err = f
            .ledger
            .create_booking("u1", request(ShowtimeRef::new(Uuid::new_v4(), f.showtime.showtime_id), &["A1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref what) if what.starts_with("movie")));

        let err = f
            .ledger
            .create_booking("u1", request(ShowtimeRef::new(f.showtime.movie_id, Uuid::new_v4()), &["A1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref what) if what.starts_with("showtime")));
    }

    #[tokio::test]
    async fn storage_failure_leaves_no_booked_seat() {
        let f = fixture().await;
        f.store.fail_next_writes(2);
        let err = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StorageUnavailable(_)));
        assert!(booked_seats(&f).await.is_empty());
        assert!(f.ledger.list_bookings("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_round_trip_restores_seats() {
        let f = fixture().await;
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1", "A2"]))
            .await
            .unwrap();
        assert_eq!(booked_seats(&f).await, vec!["A1", "A2"]);

        f.ledger.cancel_booking(booking.id, "u1").await.unwrap();
        assert!(booked_seats(&f).await.is_empty());
        assert!(f.ledger.list_bookings("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_by_other_user_is_not_found() {
        let f = fixture().await;
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1"]))
            .await
            .unwrap();
        assert!(matches!(
            f.ledger.cancel_booking(booking.id, "u2").await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(booked_seats(&f).await, vec!["A1"]);
    }

    #[tokio::test]
    async fn cancel_after_storage_failure_can_be_retried() {
        let f = fixture().await;
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1", "A3"]))
            .await
            .unwrap();

        f.store.fail_next_writes(2);
        assert!(f.ledger.cancel_booking(booking.id, "u1").await.is_err());
        assert_eq!(booked_seats(&f).await, vec!["A1", "A3"]);

        f.ledger.cancel_booking(booking.id, "u1").await.unwrap();
        assert!(booked_seats(&f).await.is_empty());
    }

    #[tokio::test]
    async fn partial_then_full_seat_cancellation() {
        let f = fixture().await;
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1", "A2"]))
            .await
            .unwrap();

        let updated = f
            .ledger
            .cancel_seats(booking.id, "u1", &["A1".into()])
            .await
            .unwrap();
        assert_eq!(updated.active_seat_numbers(), vec!["A2"]);
        assert_eq!(booked_seats(&f).await, vec!["A2"]);

        // A1 can be resold while the booking still lists it as cancelled
        f.ledger
            .create_booking("u2", request(f.showtime, &["A1"]))
            .await
            .unwrap();

        // cancelling the whole booking must not free the resold seat
        f.ledger.cancel_booking(booking.id, "u1").await.unwrap();
        assert_eq!(booked_seats(&f).await, vec!["A1"]);
    }

    #[tokio::test]
    async fn cancelling_last_seat_removes_booking() {
        let f = fixture().await;
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A2"]))
            .await
            .unwrap();
        let result = f
            .ledger
            .cancel_seats(booking.id, "u1", &["A2".into()])
            .await
            .unwrap();
        assert!(result.is_fully_cancelled());
        assert!(f.store.get_booking(booking.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_seats_outside_booking_is_invalid() {
        let f = fixture().await;
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1"]))
            .await
            .unwrap();
        assert!(matches!(
            f.ledger.cancel_seats(booking.id, "u1", &["A3".into()]).await,
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn history_is_newest_first_and_joined() {
        let f = fixture().await;
        let first = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1"]))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A2"]))
            .await
            .unwrap();

        let history = f.ledger.list_bookings("u1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].booking.id, second.id);
        assert_eq!(history[1].booking.id, first.id);
        assert_eq!(history[0].movie.as_ref().unwrap().title, "Heat");
        assert_eq!(history[0].showtime_label.as_deref(), Some("07:00 PM"));
    }

    #[tokio::test]
    async fn competing_writer_forces_fresh_round() {
        let f = fixture().await;
        f.store.compete_with_next_seat_changes(1);
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1"]))
            .await
            .unwrap();
        assert_eq!(booked_seats(&f).await, vec!["A1"]);
        assert!(f.store.get_booking(booking.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn endless_competition_ends_in_seat_conflict() {
        let f = fixture().await;
        f.store
            .compete_with_next_seat_changes(BookingConfig::default().reserve_max_attempts);
        match f.ledger.create_booking("u1", request(f.showtime, &["A1", "A2"])).await {
            Err(AppError::SeatConflict { seats }) => assert_eq!(seats, vec!["A1", "A2"]),
            other => panic!("expected SeatConflict, got {other:?}"),
        }
        assert!(booked_seats(&f).await.is_empty());
        assert!(f.ledger.list_bookings("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lost_ack_on_create_reports_the_committed_booking() {
        let f = fixture().await;
        f.store.lose_next_acks(1);
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A3"]))
            .await
            .unwrap();

        let history = f.ledger.list_bookings("u1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].booking.id, booking.id);
        assert_eq!(booked_seats(&f).await, vec!["A3"]);
    }

    #[tokio::test]
    async fn lost_ack_on_cancel_reports_success() {
        let f = fixture().await;
        let booking = f
            .ledger
            .create_booking("u1", request(f.showtime, &["A1", "A2"]))
            .await
            .unwrap();

        f.store.lose_next_acks(1);
        let cancelled = f.ledger.cancel_booking(booking.id, "u1").await.unwrap();
        assert_eq!(cancelled.id, booking.id);
        assert!(booked_seats(&f).await.is_empty());
        assert!(f.store.get_booking(booking.id).await.unwrap().is_none());
    }
}
