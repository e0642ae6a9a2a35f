// =============================================================================
// CATALOG MODULE
// =============================================================================
// Movie and showtime records: creation with generated seat layouts, metadata
// updates, lookups. No seat or rating logic lives here; seat flags belong to
// the seat inventory and the rating to the rating aggregator.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    AddShowtimeRequest, CreateMovieRequest, Movie, MovieUpdate, Seat, Showtime, ShowtimeRef,
};
use crate::store::{DeleteOutcome, Store};

// -----------------------------------------------------------------------------
// SEAT LAYOUT
// -----------------------------------------------------------------------------

/// Rows × columns seat grid. Seat numbers are `{RowLetter}{Column}`,
/// rows lettered from "A", columns numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatLayout {
    rows: u8,
    columns: u8,
}

impl SeatLayout {
    pub const MAX_ROWS: u8 = 26;
    pub const MAX_COLUMNS: u8 = 99;

    pub fn new(rows: u8, columns: u8) -> AppResult<Self> {
        if rows == 0 || rows > Self::MAX_ROWS {
            return Err(AppError::InvalidRequest(format!(
                "rows must be between 1 and {}",
                Self::MAX_ROWS
            )));
        }
        if columns == 0 || columns > Self::MAX_COLUMNS {
            return Err(AppError::InvalidRequest(format!(
                "columns must be between 1 and {}",
                Self::MAX_COLUMNS
            )));
        }
        Ok(Self { rows, columns })
    }

    pub fn capacity(&self) -> usize {
        usize::from(self.rows) * usize::from(self.columns)
    }

    /// All seats, free, in row-major order.
    pub fn generate(&self) -> Vec<Seat> {
        (0..self.rows)
            .flat_map(|row| {
                let letter = char::from(b'A' + row);
                (1..=self.columns).map(move |col| Seat::free(format!("{letter}{col}")))
            })
            .collect()
    }
}

impl Default for SeatLayout {
    fn default() -> Self {
        Self { rows: 8, columns: 10 }
    }
}

// -----------------------------------------------------------------------------
// CATALOG SERVICE
// -----------------------------------------------------------------------------

pub struct Catalog {
    store: Arc<dyn Store>,
    layout: SeatLayout,
    default_showtimes: Vec<String>,
}

impl Catalog {
    pub fn new(store: Arc<dyn Store>, layout: SeatLayout, default_showtimes: Vec<String>) -> Self {
        Self {
            store,
            layout,
            default_showtimes,
        }
    }

    pub async fn create_movie(&self, req: CreateMovieRequest) -> AppResult<Movie> {
        let title = required("title", &req.title)?;
        let genre = required("genre", &req.genre)?;
        let poster = required("poster", &req.poster)?;
        validate_price(req.ticket_price)?;

        let labels = req
            .showtimes
            .unwrap_or_else(|| self.default_showtimes.clone());
        let showtimes = labels
            .iter()
            .map(|label| {
                Ok(Showtime {
                    id: Uuid::new_v4(),
                    time: required("showtime", label)?,
                    seats: self.layout.generate(),
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let now = Utc::now();
        let movie = Movie {
            id: Uuid::new_v4(),
            title,
            genre,
            poster,
            description: req.description.filter(|d| !d.trim().is_empty()),
            ticket_price: req.ticket_price,
            showtimes,
            average_rating: 0.0,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_movie(&movie).await?;
        info!(movie_id = %movie.id, title = %movie.title, showtimes = movie.showtimes.len(), "Movie created");
        Ok(movie)
    }

    pub async fn get_movie(&self, id: Uuid) -> AppResult<Movie> {
        self.store
            .get_movie(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("movie {id}")))
    }

    pub async fn list_movies(&self) -> AppResult<Vec<Movie>> {
        Ok(self.store.list_movies().await?)
    }

    pub async fn update_movie(&self, id: Uuid, update: MovieUpdate) -> AppResult<Movie> {
        let update = MovieUpdate {
            title: update.title.map(|t| required("title", &t)).transpose()?,
            genre: update.genre.map(|g| required("genre", &g)).transpose()?,
            poster: update.poster.map(|p| required("poster", &p)).transpose()?,
            description: update.description,
            ticket_price: update.ticket_price,
        };
        if let Some(price) = update.ticket_price {
            validate_price(price)?;
        }

        let movie = self
            .store
            .update_movie(id, &update)
            .await?
            .ok_or_else(|| AppError::not_found(format!("movie {id}")))?;
        info!(movie_id = %id, "Movie updated");
        Ok(movie)
    }

    pub async fn delete_movie(&self, id: Uuid) -> AppResult<()> {
        match self.store.delete_movie(id).await? {
            DeleteOutcome::Deleted => {
                info!(movie_id = %id, "Movie deleted");
                Ok(())
            }
            DeleteOutcome::NotFound => Err(AppError::not_found(format!("movie {id}"))),
            DeleteOutcome::InUse => Err(AppError::Conflict(format!(
                "movie {id} has active bookings"
            ))),
        }
    }

    pub async fn add_showtime(&self, movie_id: Uuid, req: AddShowtimeRequest) -> AppResult<Showtime> {
        let layout = match (req.rows, req.columns) {
            (None, None) => self.layout,
            (rows, columns) => SeatLayout::new(
                rows.unwrap_or(self.layout.rows),
                columns.unwrap_or(self.layout.columns),
            )?,
        };
        let showtime = Showtime {
            id: Uuid::new_v4(),
            time: required("time", &req.time)?,
            seats: layout.generate(),
        };

        if !self.store.add_showtime(movie_id, &showtime).await? {
            return Err(AppError::not_found(format!("movie {movie_id}")));
        }
        info!(movie_id = %movie_id, showtime_id = %showtime.id, seats = showtime.seats.len(), "Showtime added");
        Ok(showtime)
    }

    /// Resolve a movie and one of its showtimes, distinguishing which is absent.
    pub async fn resolve_showtime(&self, showtime: ShowtimeRef) -> AppResult<(Movie, Showtime)> {
        let movie = self.get_movie(showtime.movie_id).await?;
        let found = movie
            .showtime(showtime.showtime_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("showtime {}", showtime.showtime_id)))?;
        Ok((movie, found))
    }
}

fn required(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidRequest(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn validate_price(price: f64) -> AppResult<()> {
    if !price.is_finite() || price <= 0.0 {
        return Err(AppError::InvalidRequest(
            "ticketPrice must be a positive number".into(),
        ));
    }
    Ok(())
}
