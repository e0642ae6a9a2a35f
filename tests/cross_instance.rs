//! Two service instances over one shared store, as two processes sharing a
//! database. Each instance has its own showtime locks, so only the store's
//! version check keeps them from overselling.

use std::collections::BTreeSet;
use std::sync::Arc;

use cinema_booking_service::cache::MovieCache;
use cinema_booking_service::config::Config;
use cinema_booking_service::error::AppError;
use cinema_booking_service::models::{
    CreateBookingRequest, CreateMovieRequest, SeatSelection, ShowtimeRef,
};
use cinema_booking_service::store::MemoryStore;
use cinema_booking_service::AppState;

fn instance(store: Arc<MemoryStore>) -> Arc<AppState> {
    let config = Config::from_lookup(|key| match key {
        "SEAT_ROWS" => Some("2".to_string()),
        "SEAT_COLUMNS" => Some("5".to_string()),
        "DEFAULT_SHOWTIMES" => Some("09:00 PM".to_string()),
        "RESERVE_MAX_ATTEMPTS" => Some("12".to_string()),
        "STORAGE_RETRY_DELAY_MS" => Some("0".to_string()),
        _ => None,
    })
    .unwrap();
    Arc::new(AppState::new(store, &config, MovieCache::disabled(), None))
}

async fn pair() -> (Arc<AppState>, Arc<AppState>, ShowtimeRef) {
    let store = Arc::new(MemoryStore::new());
    let first = instance(store.clone());
    let second = instance(store);
    let movie = first
        .catalog
        .create_movie(CreateMovieRequest {
            title: "Rashomon".into(),
            genre: "Drama".into(),
            poster: "rashomon.jpg".into(),
            description: None,
            ticket_price: 6.0,
            showtimes: None,
        })
        .await
        .unwrap();
    let showtime = ShowtimeRef::new(movie.id, movie.showtimes[0].id);
    (first, second, showtime)
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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_bookings_across_instances_sell_once() {
    let (first, second, st) = pair().await;
    let requests: [&[&str]; 6] = [
        &["A1", "A2"],
        &["A2", "A3"],
        &["A1", "A3"],
        &["A3", "A1"],
        &["A3", "A2"],
        &["A1", "A2", "A3"],
    ];

    for round in 0..40 {
        let mut tasks = Vec::new();
        for (i, seats) in requests.iter().enumerate() {
            let state = if i % 2 == 0 { first.clone() } else { second.clone() };
            let request = booking(st, seats);
            tasks.push(tokio::spawn(async move {
                state.ledger.create_booking(&format!("user-{i}"), request).await
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(created) => winners.push(created),
                Err(AppError::SeatConflict { .. }) => {}
                Err(other) => panic!("round {round}: unexpected error {other:?}"),
            }
        }

        // any two of the requests share a seat
        assert_eq!(winners.len(), 1, "round {round}");
        let winner = winners.remove(0);
        let expected: BTreeSet<String> = winner.active_seat_numbers().into_iter().collect();
        assert_eq!(booked(&first, st).await, expected);

        // cancel through the other instance's view of the store
        let canceller = if round % 2 == 0 { &second } else { &first };
        canceller
            .ledger
            .cancel_booking(winner.id, &winner.user_id)
            .await
            .unwrap();
        assert!(booked(&first, st).await.is_empty(), "round {round}");
        assert!(booked(&second, st).await.is_empty(), "round {round}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_bookings_across_instances_all_succeed() {
    let (first, second, st) = pair().await;
    let seats = ["A1", "A2", "A3", "A4", "A5", "B1", "B2", "B3", "B4", "B5"];

    let mut tasks = Vec::new();
    for (i, seat) in seats.iter().enumerate() {
        let state = if i % 2 == 0 { first.clone() } else { second.clone() };
        let request = booking(st, &[*seat]);
        tasks.push(tokio::spawn(async move {
            state.ledger.create_booking(&format!("user-{i}"), request).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let all: BTreeSet<String> = seats.iter().map(|s| s.to_string()).collect();
    assert_eq!(booked(&first, st).await, all);
    assert_eq!(booked(&second, st).await, all);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancel_and_rebook_across_instances() {
    let (first, second, st) = pair().await;
    let original = first
        .ledger
        .create_booking("u1", booking(st, &["B1", "B2"]))
        .await
        .unwrap();

    let cancel = {
        let first = first.clone();
        tokio::spawn(async move { first.ledger.cancel_booking(original.id, "u1").await })
    };
    let other = {
        let second = second.clone();
        tokio::spawn(async move {
            second
                .ledger
                .create_booking("u2", booking(st, &["B3"]))
                .await
        })
    };
    cancel.await.unwrap().unwrap();
    other.await.unwrap().unwrap();

    let expected: BTreeSet<String> = ["B3".to_string()].into_iter().collect();
    assert_eq!(booked(&second, st).await, expected);
}
