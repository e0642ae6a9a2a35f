//! End-to-end booking and rating behaviour against the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use cinema_booking_service::cache::MovieCache;
use cinema_booking_service::config::Config;
use cinema_booking_service::error::AppError;
use cinema_booking_service::models::{
    CreateBookingRequest, CreateMovieRequest, ReviewRequest, SeatSelection, ShowtimeRef,
};
use cinema_booking_service::auth::CurrentUser;
use cinema_booking_service::store::MemoryStore;
use cinema_booking_service::AppState;

fn app_state(rows: &str, columns: &str) -> Arc<AppState> {
    let config = Config::from_lookup(|key| match key {
        "SEAT_ROWS" => Some(rows.to_string()),
        "SEAT_COLUMNS" => Some(columns.to_string()),
        "DEFAULT_SHOWTIMES" => Some("08:00 PM".to_string()),
        "STORAGE_RETRY_DELAY_MS" => Some("0".to_string()),
        _ => None,
    })
    .unwrap();
    Arc::new(AppState::new(
        Arc::new(MemoryStore::new()),
        &config,
        MovieCache::disabled(),
        None,
    ))
}

async fn showtime(state: &AppState, price: f64) -> ShowtimeRef {
    let movie = state
        .catalog
        .create_movie(CreateMovieRequest {
            title: "Metropolis".into(),
            genre: "Sci-Fi".into(),
            poster: "metropolis.jpg".into(),
            description: None,
            ticket_price: price,
            showtimes: None,
        })
        .await
        .unwrap();
    ShowtimeRef::new(movie.id, movie.showtimes[0].id)
}

fn booking(st: ShowtimeRef, seats: &[&str]) -> CreateBookingRequest {
    CreateBookingRequest {
        movie_id: st.movie_id,
        showtime_id: st.showtime_id,
        seats: seats
            .iter()
            .map(|s| SeatSelection::Number(s.to_string()))
            .collect(),
    }
}

async fn booked(state: &AppState, st: ShowtimeRef) -> BTreeSet<String> {
    state
        .inventory
        .availability(st)
        .await
        .unwrap()
        .seats
        .into_iter()
        .filter(|s| s.is_booked)
        .map(|s| s.seat_number)
        .collect()
}

fn set(seats: &[&str]) -> BTreeSet<String> {
    seats.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_concurrent_bookings_sell_each_seat_once() {
    let state = app_state("1", "3");
    let st = showtime(&state, 10.0).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            state
                .ledger
                .create_booking(&format!("user-{i}"), booking(st, &["A1", "A2"]))
                .await
        }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(AppError::SeatConflict { seats }) => {
                assert!(!seats.is_empty());
                assert!(seats.iter().all(|s| s == "A1" || s == "A2"));
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(booked(&state, st).await, set(&["A1", "A2"]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_concurrent_bookings_all_succeed() {
    let state = app_state("2", "5");
    let st = showtime(&state, 10.0).await;

    let seats = ["A1", "A2", "A3", "A4", "A5", "B1", "B2", "B3", "B4", "B5"];
    let mut tasks = Vec::new();
    for (i, seat) in seats.iter().enumerate() {
        let state = state.clone();
        let seat = seat.to_string();
        tasks.push(tokio::spawn(async move {
            state
                .ledger
                .create_booking(&format!("user-{i}"), booking(st, &[seat.as_str()]))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(booked(&state, st).await, set(&seats));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn showtimes_do_not_contend() {
    let state = app_state("1", "2");
    let first = showtime(&state, 5.0).await;
    let second = showtime(&state, 5.0).await;

    // holding one showtime's section must not block the other
    let held = state.inventory.reserve(first, &set(&["A1"])).await.unwrap();
    state
        .ledger
        .create_booking("u1", booking(second, &["A1"]))
        .await
        .unwrap();
    held.rollback();

    assert!(booked(&state, first).await.is_empty());
    assert_eq!(booked(&state, second).await, set(&["A1"]));
}

#[tokio::test]
async fn seat_conflict_scenario() {
    let state = app_state("1", "3");
    let st = showtime(&state, 12.0).await;

    let first = state
        .ledger
        .create_booking("u1", booking(st, &["A1", "A2"]))
        .await
        .unwrap();
    assert_eq!(first.total_price, 24.0);

    match state.ledger.create_booking("u2", booking(st, &["A2", "A3"])).await {
        Err(AppError::SeatConflict { seats }) => assert_eq!(seats, vec!["A2"]),
        other => panic!("expected SeatConflict, got {other:?}"),
    }
    assert_eq!(booked(&state, st).await, set(&["A1", "A2"]));

    state.ledger.cancel_booking(first.id, "u1").await.unwrap();
    assert!(booked(&state, st).await.is_empty());
    assert!(state.ledger.list_bookings("u1").await.unwrap().is_empty());

    state
        .ledger
        .create_booking("u2", booking(st, &["A1", "A2", "A3"]))
        .await
        .unwrap();
    assert_eq!(booked(&state, st).await, set(&["A1", "A2", "A3"]));
}

#[tokio::test]
async fn release_twice_equals_release_once() {
    let state = app_state("1", "3");
    let st = showtime(&state, 12.0).await;
    state
        .ledger
        .create_booking("u1", booking(st, &["A1", "A3"]))
        .await
        .unwrap();

    state.inventory.release(st, &set(&["A3"])).await.unwrap();
    let once = state.inventory.availability(st).await.unwrap();
    state.inventory.release(st, &set(&["A3"])).await.unwrap();
    assert_eq!(state.inventory.availability(st).await.unwrap(), once);
}

#[tokio::test]
async fn rating_scenario() {
    let state = app_state("1", "1");
    let st = showtime(&state, 12.0).await;
    let user = |id: &str| CurrentUser {
        id: id.to_string(),
        email: None,
        name: None,
    };
    let rate = |rating| ReviewRequest {
        rating,
        comment: None,
    };

    assert_eq!(state.catalog.get_movie(st.movie_id).await.unwrap().average_rating, 0.0);

    let first = state
        .reviews
        .create_review(st.movie_id, &user("u1"), rate(4))
        .await
        .unwrap();
    assert_eq!(first.average_rating, 4.0);

    let second = state
        .reviews
        .create_review(st.movie_id, &user("u2"), rate(2))
        .await
        .unwrap();
    assert_eq!(second.average_rating, 3.0);

    let deleted = state
        .reviews
        .delete_review(first.review.unwrap().id, &user("u1"))
        .await
        .unwrap();
    assert_eq!(deleted.average_rating, 2.0);
    assert_eq!(state.catalog.get_movie(st.movie_id).await.unwrap().average_rating, 2.0);

    state
        .reviews
        .delete_review(second.review.unwrap().id, &user("u2"))
        .await
        .unwrap();
    assert_eq!(state.catalog.get_movie(st.movie_id).await.unwrap().average_rating, 0.0);
}
