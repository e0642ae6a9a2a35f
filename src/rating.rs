// =============================================================================
// RATING AGGREGATOR
// =============================================================================
// Average rating maintenance. The average is always recomputed from the full
// review set of a movie and overwritten; no running sum or count is kept.
// =============================================================================

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::store::Store;

/// Arithmetic mean of `ratings`, 0 for an empty set.
pub fn mean_rating(ratings: &[u8]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let total: u64 = ratings.iter().map(|&r| u64::from(r)).sum();
    total as f64 / ratings.len() as f64
}

pub struct RatingAggregator {
    store: Arc<dyn Store>,
}

impl RatingAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recompute and persist the movie's average rating, returning it.
    pub async fn recompute(&self, movie_id: Uuid) -> AppResult<f64> {
        let average = self
            .store
            .refresh_average_rating(movie_id, &mean_rating)
            .await?
            .ok_or_else(|| AppError::not_found(format!("movie {movie_id}")))?;

        metrics::record_rating_recomputation();
        debug!(movie_id = %movie_id, average, "Average rating recomputed");
        Ok(average)
    }
}
