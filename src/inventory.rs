// =============================================================================
// SEAT INVENTORY
// =============================================================================
// The only component that changes seat flags.
//
// CONCURRENCY MODEL:
// - Every reserve/release on a showtime runs inside that showtime's
//   critical section (a tokio mutex keyed by showtime id). Different
//   showtimes never share a lock.
// - Inside the section the seat map is read, the request is checked against
//   it, and a pending change is built. Nothing is written yet.
// - The pending change is written by `commit` together with its ledger write
//   in one store operation, guarded by the seat map version that was read.
//   The version check covers writers in other processes; the mutex covers
//   this one.
// - Dropping a Reservation (rollback, failed commit, abandoned request)
//   releases the section without having written anything, so no seat is
//   ever left booked without its booking.
// =============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BookingConfig;
use crate::error::{AppError, AppResult};
use crate::models::{ShowtimeAvailability, ShowtimeRef};
use crate::store::{LedgerWrite, SeatChange, SeatMap, Store, StoreError, StoreResult};

/// Lock table size above which idle entries are pruned
const LOCK_TABLE_PRUNE_AT: usize = 1024;

pub struct SeatInventory {
    store: Arc<dyn Store>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    lock_timeout: Duration,
    max_attempts: u32,
}

/// Exclusive access to one showtime's seat map
pub struct ShowtimeGuard {
    showtime: ShowtimeRef,
    _guard: OwnedMutexGuard<()>,
}

impl ShowtimeGuard {
    pub fn showtime(&self) -> ShowtimeRef {
        self.showtime
    }
}

impl SeatInventory {
    pub fn new(store: Arc<dyn Store>, config: &BookingConfig) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            lock_timeout: config.lock_timeout,
            max_attempts: config.reserve_max_attempts,
        }
    }

    /// Enter the showtime's critical section, waiting at most the configured
    /// lock timeout.
    pub async fn acquire(&self, showtime: ShowtimeRef) -> AppResult<ShowtimeGuard> {
        if self.locks.len() > LOCK_TABLE_PRUNE_AT {
            self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        let lock = self.locks.entry(showtime.showtime_id).or_default().clone();

        let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                warn!(showtime_id = %showtime.showtime_id, "Timed out waiting for showtime lock");
                AppError::StorageUnavailable(format!("showtime {} is busy", showtime.showtime_id))
            })?;

        Ok(ShowtimeGuard {
            showtime,
            _guard: guard,
        })
    }

    // -------------------------------------------------------------------------
    // RESERVE
    // -------------------------------------------------------------------------

    /// Claim every seat in `seat_numbers` or none of them.
    ///
    /// Fails with `SeatNotFound` if any seat is not in the layout and with
    /// `SeatConflict` (naming the taken seats) if any is already booked.
    /// The returned Reservation holds the showtime's critical section until
    /// it is committed or dropped.
    pub async fn reserve(
        &self,
        showtime: ShowtimeRef,
        seat_numbers: &BTreeSet<String>,
    ) -> AppResult<Reservation> {
        if seat_numbers.is_empty() {
            return Err(AppError::InvalidRequest("no seats selected".into()));
        }

        let guard = self.acquire(showtime).await?;
        let map = self.load(showtime).await?;

        let unknown: Vec<String> = seat_numbers
            .iter()
            .filter(|n| map.seat(n).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            warn!(showtime_id = %showtime.showtime_id, seats = ?unknown, "Reserve rejected: unknown seats");
            return Err(AppError::SeatNotFound { seats: unknown });
        }

        let taken: Vec<String> = seat_numbers
            .iter()
            .filter(|n| map.seat(n).is_some_and(|s| s.is_booked))
            .cloned()
            .collect();
        if !taken.is_empty() {
            warn!(showtime_id = %showtime.showtime_id, seats = ?taken, "Reserve rejected: seats taken");
            return Err(AppError::SeatConflict { seats: taken });
        }

        debug!(showtime_id = %showtime.showtime_id, seats = ?seat_numbers, version = map.version, "Seats reserved");
        Ok(Reservation {
            pending: PendingChange {
                guard,
                change: SeatChange {
                    movie_id: showtime.movie_id,
                    showtime_id: showtime.showtime_id,
                    expected_version: map.version,
                    seat_numbers: seat_numbers.iter().cloned().collect(),
                    booked: true,
                },
                store: self.store.clone(),
            },
        })
    }

    // -------------------------------------------------------------------------
    // RELEASE
    // -------------------------------------------------------------------------

    /// Mark seats free. Already-free seats are left alone, so repeating a
    /// release is a no-op.
    pub async fn release(&self, showtime: ShowtimeRef, seat_numbers: &BTreeSet<String>) -> AppResult<()> {
        for attempt in 1..=self.max_attempts {
            let guard = self.acquire(showtime).await?;
            let release = self.prepare_release(guard, seat_numbers).await?;
            if release.is_noop() {
                return Ok(());
            }
            match release.commit(LedgerWrite::None).await {
                Ok(()) => return Ok(()),
                Err(StoreError::VersionConflict(_)) => {
                    debug!(showtime_id = %showtime.showtime_id, attempt, "Seat map moved during release, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AppError::StorageUnavailable(format!(
            "showtime {} kept changing during release",
            showtime.showtime_id
        )))
    }

    /// Build a release of `seat_numbers` inside an already-held critical
    /// section. Only seats that are currently booked are flipped.
    pub async fn prepare_release(
        &self,
        guard: ShowtimeGuard,
        seat_numbers: &BTreeSet<String>,
    ) -> AppResult<Release> {
        let showtime = guard.showtime();
        let map = self.load(showtime).await?;

        let unknown: Vec<String> = seat_numbers
            .iter()
            .filter(|n| map.seat(n).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(AppError::SeatNotFound { seats: unknown });
        }

        let booked: Vec<String> = seat_numbers
            .iter()
            .filter(|n| map.seat(n).is_some_and(|s| s.is_booked))
            .cloned()
            .collect();

        Ok(Release {
            pending: PendingChange {
                guard,
                change: SeatChange {
                    movie_id: showtime.movie_id,
                    showtime_id: showtime.showtime_id,
                    expected_version: map.version,
                    seat_numbers: booked,
                    booked: false,
                },
                store: self.store.clone(),
            },
        })
    }

    // -------------------------------------------------------------------------
    // AVAILABILITY
    // -------------------------------------------------------------------------

    /// Committed seat map of a showtime, in layout order. Takes no lock.
    pub async fn availability(&self, showtime: ShowtimeRef) -> AppResult<ShowtimeAvailability> {
        let map = self.load(showtime).await?;
        Ok(ShowtimeAvailability {
            movie_id: map.movie_id,
            showtime_id: map.showtime_id,
            time: map.time,
            seats: map.seats,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn load(&self, showtime: ShowtimeRef) -> AppResult<SeatMap> {
        let map = self
            .store
            .load_seat_map(showtime.movie_id, showtime.showtime_id)
            .await?;

        match map {
            Some(map) => Ok(map),
            None => {
                let movie_exists = self.store.get_movie(showtime.movie_id).await?.is_some();
                Err(if movie_exists {
                    AppError::not_found(format!("showtime {}", showtime.showtime_id))
                } else {
                    AppError::not_found(format!("movie {}", showtime.movie_id))
                })
            }
        }
    }
}

// =============================================================================
// PENDING CHANGES
// =============================================================================

struct PendingChange {
    guard: ShowtimeGuard,
    change: SeatChange,
    store: Arc<dyn Store>,
}

impl PendingChange {
    /// Write the seat change and `ledger` as one unit. A version conflict is
    /// returned to the caller to re-decide.
    async fn commit(self, ledger: LedgerWrite<'_>) -> StoreResult<()> {
        let change = &self.change;
        let result = self.store.apply_seat_change(change, ledger).await;

        match &result {
            Ok(()) => info!(
                showtime_id = %change.showtime_id,
                seats = ?change.seat_numbers,
                booked = change.booked,
                "Seat change committed"
            ),
            Err(e) => warn!(
                showtime_id = %change.showtime_id,
                seats = ?change.seat_numbers,
                error = %e,
                "Seat change not committed; seats unchanged"
            ),
        }
        drop(self.guard);
        result
    }
}

/// Seats tentatively claimed on one showtime. Commit to persist them with a
/// ledger write; drop or `rollback` to give them back.
pub struct Reservation {
    pending: PendingChange,
}

impl Reservation {
    pub fn showtime(&self) -> ShowtimeRef {
        self.pending.guard.showtime()
    }

    /// Reserved seat numbers, sorted
    pub fn seat_numbers(&self) -> &[String] {
        &self.pending.change.seat_numbers
    }

    pub async fn commit(self, ledger: LedgerWrite<'_>) -> StoreResult<()> {
        self.pending.commit(ledger).await
    }

    pub fn rollback(self) {
        debug!(
            showtime_id = %self.pending.change.showtime_id,
            seats = ?self.pending.change.seat_numbers,
            "Reservation rolled back"
        );
    }
}

/// Seats about to be freed on one showtime.
pub struct Release {
    pending: PendingChange,
}

impl Release {
    /// Seats that are booked now and will be freed by `commit`
    pub fn seat_numbers(&self) -> &[String] {
        &self.pending.change.seat_numbers
    }

    pub fn is_noop(&self) -> bool {
        self.pending.change.seat_numbers.is_empty()
    }

    pub async fn commit(self, ledger: LedgerWrite<'_>) -> StoreResult<()> {
        self.pending.commit(ledger).await
    }
}
