// =============================================================================
// REVIEWS MODULE
// =============================================================================
// Review CRUD. Every mutation recomputes the movie's average rating before
// returning, so the response always carries the post-mutation average.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{AppError, AppResult};
use crate::models::{Review, ReviewMutationResponse, ReviewRequest};
use crate::rating::RatingAggregator;
use crate::store::{Store, StoreError};

pub struct ReviewService {
    store: Arc<dyn Store>,
    ratings: Arc<RatingAggregator>,
}

impl ReviewService {
    pub fn new(store: Arc<dyn Store>, ratings: Arc<RatingAggregator>) -> Self {
        Self { store, ratings }
    }

    pub async fn create_review(
        &self,
        movie_id: Uuid,
        user: &CurrentUser,
        req: ReviewRequest,
    ) -> AppResult<ReviewMutationResponse> {
        let rating = validate_rating(req.rating)?;
        if self.store.get_movie(movie_id).await?.is_none() {
            return Err(AppError::not_found(format!("movie {movie_id}")));
        }

        let now = Utc::now();
        let review = Review {
            id: Uuid::new_v4(),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            movie_id,
            rating,
            comment: clean_comment(req.comment),
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_review(&review).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => return Err(AppError::DuplicateReview),
            Err(e) => return Err(e.into()),
        }
        info!(review_id = %review.id, movie_id = %movie_id, user_id = %user.id, rating, "Review created");

        let average_rating = self.ratings.recompute(movie_id).await?;
        Ok(ReviewMutationResponse {
            movie_id: review.movie_id,
            review: Some(review),
            average_rating,
        })
    }

    pub async fn update_review(
        &self,
        review_id: Uuid,
        user: &CurrentUser,
        req: ReviewRequest,
    ) -> AppResult<ReviewMutationResponse> {
        let rating = validate_rating(req.rating)?;
        let mut review = self.owned_review(review_id, user).await?;

        review.rating = rating;
        review.comment = clean_comment(req.comment);
        review.updated_at = Utc::now();
        self.store.update_review(&review).await?;
        info!(review_id = %review_id, movie_id = %review.movie_id, rating, "Review updated");

        let average_rating = self.ratings.recompute(review.movie_id).await?;
        Ok(ReviewMutationResponse {
            movie_id: review.movie_id,
            review: Some(review),
            average_rating,
        })
    }

    pub async fn delete_review(&self, review_id: Uuid, user: &CurrentUser) -> AppResult<ReviewMutationResponse> {
        let review = self.owned_review(review_id, user).await?;
        if !self.store.delete_review(review_id).await? {
            return Err(AppError::not_found(format!("review {review_id}")));
        }
        info!(review_id = %review_id, movie_id = %review.movie_id, "Review deleted");

        let average_rating = self.ratings.recompute(review.movie_id).await?;
        Ok(ReviewMutationResponse {
            movie_id: review.movie_id,
            review: None,
            average_rating,
        })
    }

    /// Reviews of a movie, newest first
    pub async fn list_reviews(&self, movie_id: Uuid) -> AppResult<Vec<Review>> {
        Ok(self.store.list_reviews_for_movie(movie_id).await?)
    }

    async fn owned_review(&self, review_id: Uuid, user: &CurrentUser) -> AppResult<Review> {
        let review = self
            .store
            .get_review(review_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("review {review_id}")))?;
        if review.user_id != user.id {
            return Err(AppError::Forbidden(format!(
                "review {review_id} belongs to another user"
            )));
        }
        Ok(review)
    }
}

fn validate_rating(rating: i64) -> AppResult<u8> {
    match u8::try_from(rating) {
        Ok(r @ 1..=5) => Ok(r),
        _ => Err(AppError::InvalidRequest(
            "rating must be an integer from 1 to 5".into(),
        )),
    }
}

fn clean_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}
