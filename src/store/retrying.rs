// =============================================================================
// RETRYING STORE
// =============================================================================
// Decorator that retries every storage call failing with a transient error
// (StoreError::Unavailable) with bounded exponential backoff. Services hold
// the decorated store, so no call site retries on its own.
//
// Only identical calls are repeated. A seat change retried after a lost
// acknowledgement fails its version check instead of applying twice.
// =============================================================================

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{DeleteOutcome, LedgerWrite, RatingFn, SeatChange, SeatMap, Store, StoreError, StoreResult};
use crate::models::{Booking, Movie, MovieUpdate, Review, Showtime};
use crate::retry::{retry_with_backoff, RetryConfig};

pub struct RetryingStore {
    inner: Arc<dyn Store>,
    retry: RetryConfig,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn Store>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    async fn retried<T, F, Fut>(&self, operation_name: &str, operation: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        retry_with_backoff(&self.retry, operation, StoreError::is_transient, operation_name).await
    }
}

#[async_trait]
impl Store for RetryingStore {
    async fn insert_movie(&self, movie: &Movie) -> StoreResult<()> {
        let inner = &*self.inner;
        self.retried("insert_movie", move || inner.insert_movie(movie)).await
    }

    async fn get_movie(&self, id: Uuid) -> StoreResult<Option<Movie>> {
        let inner = &*self.inner;
        self.retried("get_movie", move || inner.get_movie(id)).await
    }

    async fn list_movies(&self) -> StoreResult<Vec<Movie>> {
        let inner = &*self.inner;
        self.retried("list_movies", move || inner.list_movies()).await
    }

    async fn update_movie(&self, id: Uuid, update: &MovieUpdate) -> StoreResult<Option<Movie>> {
        let inner = &*self.inner;
        self.retried("update_movie", move || inner.update_movie(id, update)).await
    }

    async fn delete_movie(&self, id: Uuid) -> StoreResult<DeleteOutcome> {
        let inner = &*self.inner;
        self.retried("delete_movie", move || inner.delete_movie(id)).await
    }

    async fn add_showtime(&self, movie_id: Uuid, showtime: &Showtime) -> StoreResult<bool> {
        let inner = &*self.inner;
        self.retried("add_showtime", move || inner.add_showtime(movie_id, showtime)).await
    }

    async fn load_seat_map(&self, movie_id: Uuid, showtime_id: Uuid) -> StoreResult<Option<SeatMap>> {
        let inner = &*self.inner;
        self.retried("load_seat_map", move || inner.load_seat_map(movie_id, showtime_id)).await
    }

    async fn apply_seat_change(&self, change: &SeatChange, ledger: LedgerWrite<'_>) -> StoreResult<()> {
        let inner = &*self.inner;
        self.retried("apply_seat_change", move || inner.apply_seat_change(change, ledger)).await
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let inner = &*self.inner;
        self.retried("get_booking", move || inner.get_booking(id)).await
    }

    async fn list_bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let inner = &*self.inner;
        self.retried("list_bookings_for_user", move || inner.list_bookings_for_user(user_id)).await
    }

    async fn insert_review(&self, review: &Review) -> StoreResult<()> {
        let inner = &*self.inner;
        self.retried("insert_review", move || inner.insert_review(review)).await
    }

    async fn get_review(&self, id: Uuid) -> StoreResult<Option<Review>> {
        let inner = &*self.inner;
        self.retried("get_review", move || inner.get_review(id)).await
    }

    async fn update_review(&self, review: &Review) -> StoreResult<()> {
        let inner = &*self.inner;
        self.retried("update_review", move || inner.update_review(review)).await
    }

    async fn delete_review(&self, id: Uuid) -> StoreResult<bool> {
        let inner = &*self.inner;
        self.retried("delete_review", move || inner.delete_review(id)).await
    }

    async fn list_reviews_for_movie(&self, movie_id: Uuid) -> StoreResult<Vec<Review>> {
        let inner = &*self.inner;
        self.retried("list_reviews_for_movie", move || inner.list_reviews_for_movie(movie_id)).await
    }

    async fn refresh_average_rating(&self, movie_id: Uuid, compute: &RatingFn) -> StoreResult<Option<f64>> {
        let inner = &*self.inner;
        self.retried("refresh_average_rating", move || {
            inner.refresh_average_rating(movie_id, compute)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}
