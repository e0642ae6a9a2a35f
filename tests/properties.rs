//! Randomised properties of the booking ledger and rating aggregator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use proptest::prelude::*;

use cinema_booking_service::auth::CurrentUser;
use cinema_booking_service::cache::MovieCache;
use cinema_booking_service::config::Config;
use cinema_booking_service::error::AppError;
use cinema_booking_service::models::{
    CreateBookingRequest, CreateMovieRequest, ReviewRequest, SeatSelection, ShowtimeRef,
};
use cinema_booking_service::rating::mean_rating;
use cinema_booking_service::store::MemoryStore;
use cinema_booking_service::AppState;

const LAYOUT: [&str; 8] = ["A1", "A2", "A3", "A4", "B1", "B2", "B3", "B4"];

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn setup(price: f64) -> (Arc<AppState>, ShowtimeRef) {
    let config = Config::from_lookup(|key| match key {
        "SEAT_ROWS" => Some("2".to_string()),
        "SEAT_COLUMNS" => Some("4".to_string()),
        "DEFAULT_SHOWTIMES" => Some("06:00 PM".to_string()),
        "STORAGE_RETRY_DELAY_MS" => Some("0".to_string()),
        _ => None,
    })
    .unwrap();
    let state = Arc::new(AppState::new(
        Arc::new(MemoryStore::new()),
        &config,
        MovieCache::disabled(),
        None,
    ));
    let movie = state
        .catalog
        .create_movie(CreateMovieRequest {
            title: "Stalker".into(),
            genre: "Sci-Fi".into(),
            poster: "stalker.jpg".into(),
            description: None,
            ticket_price: price,
            showtimes: None,
        })
        .await
        .unwrap();
    let showtime = ShowtimeRef::new(movie.id, movie.showtimes[0].id);
    (state, showtime)
}

fn request(st: ShowtimeRef, seats: &BTreeSet<String>) -> CreateBookingRequest {
    CreateBookingRequest {
        movie_id: st.movie_id,
        showtime_id: st.showtime_id,
        seats: seats.iter().cloned().map(SeatSelection::Number).collect(),
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

/// Splits the layout into two disjoint sets: 1 goes to the first, 2 to the
/// second, 0 to neither.
fn partition(owners: &[u8]) -> (BTreeSet<String>, BTreeSet<String>) {
    let pick = |owner: u8| -> BTreeSet<String> {
        LAYOUT
            .iter()
            .zip(owners)
            .filter(|(_, o)| **o == owner)
            .map(|(s, _)| s.to_string())
            .collect()
    };
    (pick(1), pick(2))
}

#[derive(Debug, Clone)]
enum ReviewOp {
    Create { user: usize, rating: i64 },
    Update { user: usize, rating: i64 },
    Delete { user: usize },
}

fn review_op() -> impl Strategy<Value = ReviewOp> {
    prop_oneof![
        (0..4usize, 1..=5i64).prop_map(|(user, rating)| ReviewOp::Create { user, rating }),
        (0..4usize, 1..=5i64).prop_map(|(user, rating)| ReviewOp::Update { user, rating }),
        (0..4usize).prop_map(|user| ReviewOp::Delete { user }),
    ]
}

fn reviewer(index: usize) -> CurrentUser {
    CurrentUser {
        id: format!("reviewer-{index}"),
        email: None,
        name: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn disjoint_bookings_succeed_and_cancel_restores(
        owners in prop::collection::vec(0u8..3, LAYOUT.len()),
        price in 1u32..50,
    ) {
        let (first, second) = partition(&owners);
        prop_assume!(!first.is_empty() && !second.is_empty());

        runtime().block_on(async {
            let price = f64::from(price);
            let (state, st) = setup(price).await;

            let a = state.ledger.create_booking("u1", request(st, &first)).await.unwrap();
            let b = state.ledger.create_booking("u2", request(st, &second)).await.unwrap();
            assert_eq!(a.total_price, first.len() as f64 * price);
            assert_eq!(b.total_price, second.len() as f64 * price);

            let both: BTreeSet<String> = first.union(&second).cloned().collect();
            assert_eq!(booked(&state, st).await, both);

            state.ledger.cancel_booking(a.id, "u1").await.unwrap();
            assert_eq!(booked(&state, st).await, second);
            state.ledger.cancel_booking(b.id, "u2").await.unwrap();
            assert!(booked(&state, st).await.is_empty());
        });
    }

    #[test]
    fn overlapping_booking_changes_nothing(
        owners in prop::collection::vec(0u8..3, LAYOUT.len()),
        shared in 0..LAYOUT.len(),
    ) {
        let (mut first, mut second) = partition(&owners);
        let shared_seat = LAYOUT[shared].to_string();
        first.insert(shared_seat.clone());
        second.insert(shared_seat);

        runtime().block_on(async {
            let (state, st) = setup(10.0).await;
            state.ledger.create_booking("u1", request(st, &first)).await.unwrap();

            match state.ledger.create_booking("u2", request(st, &second)).await {
                Err(AppError::SeatConflict { seats }) => {
                    let expected: Vec<String> = first.intersection(&second).cloned().collect();
                    assert_eq!(seats, expected);
                }
                other => panic!("expected SeatConflict, got {other:?}"),
            }
            assert_eq!(booked(&state, st).await, first);
            assert!(state.ledger.list_bookings("u2").await.unwrap().is_empty());
        });
    }

    #[test]
    fn average_matches_current_reviews(ops in prop::collection::vec(review_op(), 1..40)) {
        runtime().block_on(async {
            let (state, st) = setup(10.0).await;
            let movie_id = st.movie_id;
            // reviewer -> (review id, rating)
            let mut current = BTreeMap::new();

            for op in ops {
                match op {
                    ReviewOp::Create { user, rating } => {
                        let result = state
                            .reviews
                            .create_review(movie_id, &reviewer(user), ReviewRequest { rating, comment: None })
                            .await;
                        match result {
                            Ok(created) => {
                                let review = created.review.unwrap();
                                current.insert(user, (review.id, review.rating));
                            }
                            Err(AppError::DuplicateReview) => assert!(current.contains_key(&user)),
                            Err(other) => panic!("unexpected error {other:?}"),
                        }
                    }
                    ReviewOp::Update { user, rating } => {
                        if let Some((id, _)) = current.get(&user).copied() {
                            state
                                .reviews
                                .update_review(id, &reviewer(user), ReviewRequest { rating, comment: None })
                                .await
                                .unwrap();
                            current.insert(user, (id, rating as u8));
                        }
                    }
                    ReviewOp::Delete { user } => {
                        if let Some((id, _)) = current.remove(&user) {
                            state.reviews.delete_review(id, &reviewer(user)).await.unwrap();
                        }
                    }
                }

                let ratings: Vec<u8> = current.values().map(|(_, rating)| *rating).collect();
                let average = state.catalog.get_movie(movie_id).await.unwrap().average_rating;
                assert!((average - mean_rating(&ratings)).abs() < 1e-9);
            }
        });
    }
}
