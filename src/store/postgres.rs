// =============================================================================
// POSTGRES STORE
// =============================================================================
// PostgreSQL implementation of the Store contract using SQLx.
//
// Seat maps live in their own table keyed by (showtime_id, seat_number) and
// every showtime row carries a `version` counter. A seat change is one
// transaction: conditional version bump, seat flag update, ledger write.
// If the version moved, the UPDATE matches zero rows and the transaction is
// rolled back.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    DeleteOutcome, LedgerWrite, RatingFn, SeatChange, SeatMap, Store, StoreError, StoreResult,
};
use crate::metrics;
use crate::models::{BookedSeat, Booking, Movie, MovieUpdate, Review, Seat, Showtime};

// -----------------------------------------------------------------------------
// ROW TYPES
// -----------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct MovieRow {
    id: Uuid,
    title: String,
    genre: String,
    poster: String,
    description: Option<String>,
    ticket_price: f64,
    average_rating: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ShowtimeRow {
    id: Uuid,
    movie_id: Uuid,
    time_label: String,
}

#[derive(Debug, FromRow)]
struct SeatRow {
    showtime_id: Uuid,
    seat_number: String,
    is_booked: bool,
}

#[derive(Debug, FromRow)]
struct SeatMapRow {
    time_label: String,
    version: i64,
    seat_number: Option<String>,
    is_booked: Option<bool>,
}

#[derive(Debug, FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: String,
    movie_id: Uuid,
    showtime_id: Uuid,
    total_price: f64,
    booking_date: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct BookingSeatRow {
    booking_id: Uuid,
    seat_number: String,
    is_cancelled: bool,
}

#[derive(Debug, FromRow)]
struct ReviewRow {
    id: Uuid,
    user_id: String,
    user_name: Option<String>,
    movie_id: Uuid,
    rating: i16,
    comment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReviewRow> for Review {
    type Error = StoreError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        let rating = u8::try_from(row.rating)
            .map_err(|_| StoreError::Backend(format!("rating {} out of range", row.rating)))?;
        Ok(Review {
            id: row.id,
            user_id: row.user_id,
            user_name: row.user_name,
            movie_id: row.movie_id,
            rating,
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const MOVIE_COLUMNS: &str = "id, title, genre, poster, description, ticket_price, \
                             average_rating, created_at, updated_at";
const REVIEW_COLUMNS: &str =
    "id, user_id, user_name, movie_id, rating, comment, created_at, updated_at";

// -----------------------------------------------------------------------------
// STORE
// -----------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    /// Create tables and indexes if they don't exist. Idempotent.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS movies (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                genre TEXT NOT NULL,
                poster TEXT NOT NULL,
                description TEXT,
                ticket_price DOUBLE PRECISION NOT NULL,
                average_rating DOUBLE PRECISION NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                CONSTRAINT positive_price CHECK (ticket_price > 0),
                CONSTRAINT rating_range CHECK (average_rating >= 0 AND average_rating <= 5)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS showtimes (
                id UUID PRIMARY KEY,
                movie_id UUID NOT NULL REFERENCES movies(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                time_label TEXT NOT NULL,
                -- Bumped on every seat change; optimistic concurrency token
                version BIGINT NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS seats (
                showtime_id UUID NOT NULL REFERENCES showtimes(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                seat_number TEXT NOT NULL,
                is_booked BOOLEAN NOT NULL DEFAULT FALSE,
                PRIMARY KEY (showtime_id, seat_number)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bookings (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                movie_id UUID NOT NULL REFERENCES movies(id) ON DELETE RESTRICT,
                showtime_id UUID NOT NULL REFERENCES showtimes(id) ON DELETE RESTRICT,
                total_price DOUBLE PRECISION NOT NULL,
                booking_date TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS booking_seats (
                booking_id UUID NOT NULL REFERENCES bookings(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                seat_number TEXT NOT NULL,
                is_cancelled BOOLEAN NOT NULL DEFAULT FALSE,
                PRIMARY KEY (booking_id, seat_number)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                user_name TEXT,
                movie_id UUID NOT NULL REFERENCES movies(id) ON DELETE CASCADE,
                rating SMALLINT NOT NULL,
                comment TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                CONSTRAINT rating_bounds CHECK (rating BETWEEN 1 AND 5),
                CONSTRAINT one_review_per_user UNIQUE (user_id, movie_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_showtimes_movie ON showtimes(movie_id)",
            "CREATE INDEX IF NOT EXISTS idx_bookings_user ON bookings(user_id, booking_date DESC)",
            "CREATE INDEX IF NOT EXISTS idx_reviews_movie ON reviews(movie_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to run schema migration")?;
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // ASSEMBLY HELPERS
    // -------------------------------------------------------------------------

    /// Attach showtimes and seats to movie rows, preserving row order.
    async fn assemble_movies(&self, rows: Vec<MovieRow>) -> StoreResult<Vec<Movie>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let movie_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let showtime_rows = sqlx::query_as::<_, ShowtimeRow>(
            r#"
            SELECT id, movie_id, time_label
            FROM showtimes
            WHERE movie_id = ANY($1)
            ORDER BY position ASC
            "#,
        )
        .bind(&movie_ids)
        .fetch_all(&self.pool)
        .await?;

        let showtime_ids: Vec<Uuid> = showtime_rows.iter().map(|s| s.id).collect();
        let seat_rows = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT showtime_id, seat_number, is_booked
            FROM seats
            WHERE showtime_id = ANY($1)
            ORDER BY position ASC
            "#,
        )
        .bind(&showtime_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut seats_by_showtime: HashMap<Uuid, Vec<Seat>> = HashMap::new();
        for seat in seat_rows {
            seats_by_showtime.entry(seat.showtime_id).or_default().push(Seat {
                seat_number: seat.seat_number,
                is_booked: seat.is_booked,
            });
        }

        let mut showtimes_by_movie: HashMap<Uuid, Vec<Showtime>> = HashMap::new();
        for showtime in showtime_rows {
            let seats = seats_by_showtime.remove(&showtime.id).unwrap_or_default();
            showtimes_by_movie.entry(showtime.movie_id).or_default().push(Showtime {
                id: showtime.id,
                time: showtime.time_label,
                seats,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| Movie {
                showtimes: showtimes_by_movie.remove(&row.id).unwrap_or_default(),
                id: row.id,
                title: row.title,
                genre: row.genre,
                poster: row.poster,
                description: row.description,
                ticket_price: row.ticket_price,
                average_rating: row.average_rating,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect())
    }

    async fn assemble_bookings(&self, rows: Vec<BookingRow>) -> StoreResult<Vec<Booking>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let seat_rows = sqlx::query_as::<_, BookingSeatRow>(
            r#"
            SELECT booking_id, seat_number, is_cancelled
            FROM booking_seats
            WHERE booking_id = ANY($1)
            ORDER BY position ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut seats: HashMap<Uuid, Vec<BookedSeat>> = HashMap::new();
        for seat in seat_rows {
            seats.entry(seat.booking_id).or_default().push(BookedSeat {
                seat_number: seat.seat_number,
                is_cancelled: seat.is_cancelled,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| Booking {
                seats: seats.remove(&row.id).unwrap_or_default(),
                id: row.id,
                user_id: row.user_id,
                movie_id: row.movie_id,
                showtime_id: row.showtime_id,
                total_price: row.total_price,
                booking_date: row.booking_date,
            })
            .collect())
    }

    async fn insert_showtime(
        tx: &mut Transaction<'_, Postgres>,
        movie_id: Uuid,
        position: i32,
        showtime: &Showtime,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO showtimes (id, movie_id, position, time_label, version)
            VALUES ($1, $2, $3, $4, 0)
            "#,
        )
        .bind(showtime.id)
        .bind(movie_id)
        .bind(position)
        .bind(&showtime.time)
        .execute(&mut **tx)
        .await?;

        let numbers: Vec<String> = showtime.seats.iter().map(|s| s.seat_number.clone()).collect();
        let booked: Vec<bool> = showtime.seats.iter().map(|s| s.is_booked).collect();
        sqlx::query(
            r#"
            INSERT INTO seats (showtime_id, position, seat_number, is_booked)
            SELECT $1, t.ord::INTEGER, t.seat_number, t.is_booked
            FROM UNNEST($2::TEXT[], $3::BOOLEAN[]) WITH ORDINALITY
                 AS t(seat_number, is_booked, ord)
            "#,
        )
        .bind(showtime.id)
        .bind(numbers)
        .bind(booked)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn write_ledger(tx: &mut Transaction<'_, Postgres>, ledger: LedgerWrite<'_>) -> StoreResult<()> {
        match ledger {
            LedgerWrite::None => Ok(()),
            LedgerWrite::Insert(booking) => {
                sqlx::query(
                    r#"
                    INSERT INTO bookings (id, user_id, movie_id, showtime_id, total_price, booking_date)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(booking.id)
                .bind(&booking.user_id)
                .bind(booking.movie_id)
                .bind(booking.showtime_id)
                .bind(booking.total_price)
                .bind(booking.booking_date)
                .execute(&mut **tx)
                .await?;

                let numbers: Vec<String> =
                    booking.seats.iter().map(|s| s.seat_number.clone()).collect();
                let cancelled: Vec<bool> = booking.seats.iter().map(|s| s.is_cancelled).collect();
                sqlx::query(
                    r#"
                    INSERT INTO booking_seats (booking_id, position, seat_number, is_cancelled)
                    SELECT $1, t.ord::INTEGER, t.seat_number, t.is_cancelled
                    FROM UNNEST($2::TEXT[], $3::BOOLEAN[]) WITH ORDINALITY
                         AS t(seat_number, is_cancelled, ord)
                    "#,
                )
                .bind(booking.id)
                .bind(numbers)
                .bind(cancelled)
                .execute(&mut **tx)
                .await?;
                Ok(())
            }
            LedgerWrite::MarkCancelled {
                booking_id,
                seat_numbers,
            } => {
                let result = sqlx::query(
                    r#"
                    UPDATE booking_seats
                    SET is_cancelled = TRUE
                    WHERE booking_id = $1 AND seat_number = ANY($2)
                    "#,
                )
                .bind(booking_id)
                .bind(seat_numbers.to_vec())
                .execute(&mut **tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::Missing(format!("booking {booking_id}")));
                }
                Ok(())
            }
            LedgerWrite::Remove(booking_id) => {
                let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
                    .bind(booking_id)
                    .execute(&mut **tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::Missing(format!("booking {booking_id}")));
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_movie(&self, movie: &Movie) -> StoreResult<()> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO movies (id, title, genre, poster, description, ticket_price,
                                average_rating, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(movie.id)
        .bind(&movie.title)
        .bind(&movie.genre)
        .bind(&movie.poster)
        .bind(&movie.description)
        .bind(movie.ticket_price)
        .bind(movie.average_rating)
        .bind(movie.created_at)
        .bind(movie.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, showtime) in movie.showtimes.iter().enumerate() {
            Self::insert_showtime(&mut tx, movie.id, position as i32, showtime).await?;
        }

        tx.commit().await?;
        metrics::record_db_query("insert", start.elapsed().as_secs_f64());
        Ok(())
    }

    async fn get_movie(&self, id: Uuid) -> StoreResult<Option<Movie>> {
        let start = Instant::now();
        let row = sqlx::query_as::<_, MovieRow>(&format!(
            "SELECT {MOVIE_COLUMNS} FROM movies WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let movie = match row {
            Some(row) => self.assemble_movies(vec![row]).await?.pop(),
            None => None,
        };
        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(movie)
    }

    async fn list_movies(&self) -> StoreResult<Vec<Movie>> {
        let start = Instant::now();
        let rows = sqlx::query_as::<_, MovieRow>(&format!(
            "SELECT {MOVIE_COLUMNS} FROM movies ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        let movies = self.assemble_movies(rows).await?;
        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(movies)
    }

    async fn update_movie(&self, id: Uuid, update: &MovieUpdate) -> StoreResult<Option<Movie>> {
        let start = Instant::now();
        let row = sqlx::query_as::<_, MovieRow>(&format!(
            r#"
            UPDATE movies
            SET title = COALESCE($2, title),
                genre = COALESCE($3, genre),
                poster = COALESCE($4, poster),
                description = COALESCE($5, description),
                ticket_price = COALESCE($6, ticket_price),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {MOVIE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.title)
        .bind(&update.genre)
        .bind(&update.poster)
        .bind(&update.description)
        .bind(update.ticket_price)
        .fetch_optional(&self.pool)
        .await?;

        let movie = match row {
            Some(row) => self.assemble_movies(vec![row]).await?.pop(),
            None => None,
        };
        metrics::record_db_query("update", start.elapsed().as_secs_f64());
        Ok(movie)
    }

    async fn delete_movie(&self, id: Uuid) -> StoreResult<DeleteOutcome> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM movies WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(DeleteOutcome::NotFound);
        }

        let (in_use,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM bookings WHERE movie_id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if in_use {
            return Ok(DeleteOutcome::InUse);
        }

        match sqlx::query("DELETE FROM movies WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)
        {
            Ok(_) => {}
            // A booking slipped in between the check and the delete
            Err(StoreError::InUse(_)) => return Ok(DeleteOutcome::InUse),
            Err(e) => return Err(e),
        }

        tx.commit().await?;
        Ok(DeleteOutcome::Deleted)
    }

    async fn add_showtime(&self, movie_id: Uuid, showtime: &Showtime) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM movies WHERE id = $1 FOR UPDATE")
            .bind(movie_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(false);
        }

        let (position,): (i32,) = sqlx::query_as(
            "SELECT COALESCE(MAX(position) + 1, 0)::INTEGER FROM showtimes WHERE movie_id = $1",
        )
        .bind(movie_id)
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_showtime(&mut tx, movie_id, position, showtime).await?;
        sqlx::query("UPDATE movies SET updated_at = NOW() WHERE id = $1")
            .bind(movie_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn load_seat_map(&self, movie_id: Uuid, showtime_id: Uuid) -> StoreResult<Option<SeatMap>> {
        let start = Instant::now();

        // One statement, one snapshot: the version and the seat flags
        // always belong together.
        let rows = sqlx::query_as::<_, SeatMapRow>(
            r#"
            SELECT st.time_label, st.version, s.seat_number, s.is_booked
            FROM showtimes st
            LEFT JOIN seats s ON s.showtime_id = st.id
            WHERE st.id = $1 AND st.movie_id = $2
            ORDER BY s.position ASC
            "#,
        )
        .bind(showtime_id)
        .bind(movie_id)
        .fetch_all(&self.pool)
        .await?;

        metrics::record_db_query("select", start.elapsed().as_secs_f64());

        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let time = first.time_label.clone();
        let version = first.version;
        let seats = rows
            .into_iter()
            .filter_map(|row| {
                Some(Seat {
                    seat_number: row.seat_number?,
                    is_booked: row.is_booked.unwrap_or(false),
                })
            })
            .collect();

        Ok(Some(SeatMap {
            movie_id,
            showtime_id,
            time,
            version,
            seats,
        }))
    }

    async fn apply_seat_change(&self, change: &SeatChange, ledger: LedgerWrite<'_>) -> StoreResult<()> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        let bumped = sqlx::query(
            r#"
            UPDATE showtimes
            SET version = version + 1
            WHERE id = $1 AND movie_id = $2 AND version = $3
            "#,
        )
        .bind(change.showtime_id)
        .bind(change.movie_id)
        .bind(change.expected_version)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM showtimes WHERE id = $1 AND movie_id = $2")
                    .bind(change.showtime_id)
                    .bind(change.movie_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            // Dropping `tx` rolls back
            return Err(match exists {
                Some(_) => StoreError::VersionConflict(change.showtime_id),
                None => StoreError::Missing(format!("showtime {}", change.showtime_id)),
            });
        }

        sqlx::query(
            r#"
            UPDATE seats
            SET is_booked = $3
            WHERE showtime_id = $1 AND seat_number = ANY($2)
            "#,
        )
        .bind(change.showtime_id)
        .bind(change.seat_numbers.clone())
        .bind(change.booked)
        .execute(&mut *tx)
        .await?;

        Self::write_ledger(&mut tx, ledger).await?;

        tx.commit().await?;
        metrics::record_db_query("seat_change", start.elapsed().as_secs_f64());
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(
            r#"
            SELECT id, user_id, movie_id, showtime_id, total_price, booking_date
            FROM bookings
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.assemble_bookings(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_bookings_for_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let start = Instant::now();
        let rows = sqlx::query_as::<_, BookingRow>(
            r#"
            SELECT id, user_id, movie_id, showtime_id, total_price, booking_date
            FROM bookings
            WHERE user_id = $1
            ORDER BY booking_date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let bookings = self.assemble_bookings(rows).await?;
        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(bookings)
    }

    async fn insert_review(&self, review: &Review) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reviews (id, user_id, user_name, movie_id, rating, comment, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(review.id)
        .bind(&review.user_id)
        .bind(&review.user_name)
        .bind(review.movie_id)
        .bind(i16::from(review.rating))
        .bind(&review.comment)
        .bind(review.created_at)
        .bind(review.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_review(&self, id: Uuid) -> StoreResult<Option<Review>> {
        sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Review::try_from)
        .transpose()
    }

    async fn update_review(&self, review: &Review) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reviews
            SET rating = $2, comment = $3, user_name = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(review.id)
        .bind(i16::from(review.rating))
        .bind(&review.comment)
        .bind(&review.user_name)
        .bind(review.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("review {}", review.id)));
        }
        Ok(())
    }

    async fn delete_review(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_reviews_for_movie(&self, movie_id: Uuid) -> StoreResult<Vec<Review>> {
        sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE movie_id = $1 ORDER BY created_at DESC"
        ))
        .bind(movie_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Review::try_from)
        .collect()
    }

    async fn refresh_average_rating(&self, movie_id: Uuid, compute: &RatingFn) -> StoreResult<Option<f64>> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent refreshes of the same movie; each
        // statement below then sees every review committed before it.
        let locked: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM movies WHERE id = $1 FOR UPDATE")
            .bind(movie_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(None);
        }

        let rows: Vec<(i16,)> = sqlx::query_as("SELECT rating FROM reviews WHERE movie_id = $1")
            .bind(movie_id)
            .fetch_all(&mut *tx)
            .await?;
        let ratings: Vec<u8> = rows
            .into_iter()
            .map(|(r,)| u8::try_from(r).map_err(|_| StoreError::Backend(format!("rating {r} out of range"))))
            .collect::<StoreResult<_>>()?;
        let average = compute(&ratings);

        sqlx::query("UPDATE movies SET average_rating = $2 WHERE id = $1")
            .bind(movie_id)
            .bind(average)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        metrics::record_db_query("rating_refresh", start.elapsed().as_secs_f64());
        Ok(Some(average))
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
