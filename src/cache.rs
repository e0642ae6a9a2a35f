// =============================================================================
// MOVIE CACHE
// =============================================================================
// Read-through Redis cache for movie documents (GET /api/movies/:id and the
// movie list). Entries expire after the configured TTL and are deleted on
// every write that changes a movie: metadata, showtimes, seat state, rating.
//
// FILL GUARD:
// A reader that missed fills the cache with what it read from the store.
// If a write invalidated the movie in between, that document is already
// stale. Every invalidation therefore bumps a generation counter, and a fill
// is only stored (by a Lua script, atomically) while the generation is still
// the one the reader saw before reading the store.
//
// The cache is optional. Without REDIS_URL, or when Redis errors, every call
// degrades to a miss; a cache problem never fails a request.
// Seat availability is always served from the store, never from here.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::metrics;
use crate::models::Movie;
use crate::retry::{retry_with_backoff, RetryConfig};

const MOVIE_LIST_KEY: &str = "movies:all";
const GENERATION_KEY: &str = "movies:generation";

fn movie_key(id: Uuid) -> String {
    format!("movie:{id}")
}

// =============================================================================
// BACKEND
// =============================================================================

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Current generation and the value stored under `key`
    async fn lookup(&self, key: &str) -> RedisResult<(u64, Option<String>)>;

    /// Store `value` under `key` for `ttl_secs`, unless the generation has
    /// moved past `generation`. Returns whether it was stored.
    async fn fill(&self, key: &str, value: String, ttl_secs: u64, generation: u64) -> RedisResult<bool>;

    /// Bump the generation and delete `keys` in one transaction
    async fn invalidate(&self, keys: &[String]) -> RedisResult<()>;

    async fn ping(&self) -> RedisResult<()>;
}

const FILL_SCRIPT: &str = r"
if (redis.call('GET', KEYS[1]) or '0') == ARGV[1] then
  redis.call('SETEX', KEYS[2], ARGV[2], ARGV[3])
  return 1
end
return 0
";

pub struct RedisBackend {
    conn: ConnectionManager,
    fill_script: redis::Script,
}

impl RedisBackend {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            fill_script: redis::Script::new(FILL_SCRIPT),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn lookup(&self, key: &str) -> RedisResult<(u64, Option<String>)> {
        let (generation, value): (Option<u64>, Option<String>) = redis::pipe()
            .cmd("GET")
            .arg(GENERATION_KEY)
            .cmd("GET")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok((generation.unwrap_or(0), value))
    }

    async fn fill(&self, key: &str, value: String, ttl_secs: u64, generation: u64) -> RedisResult<bool> {
        let stored: i64 = self
            .fill_script
            .key(GENERATION_KEY)
            .key(key)
            .arg(generation)
            .arg(ttl_secs)
            .arg(value)
            .invoke_async(&mut self.conn.clone())
            .await?;
        Ok(stored == 1)
    }

    async fn invalidate(&self, keys: &[String]) -> RedisResult<()> {
        redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(GENERATION_KEY)
            .ignore()
            .cmd("DEL")
            .arg(keys)
            .ignore()
            .query_async(&mut self.conn.clone())
            .await
    }

    async fn ping(&self) -> RedisResult<()> {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.conn.clone())
            .await
            .map(|_| ())
    }
}

// =============================================================================
// MOVIE CACHE
// =============================================================================

/// Result of a cache read. A miss carries the ticket needed to fill the
/// entry afterwards.
pub enum Cached<T> {
    Hit(T),
    Miss(FillTicket),
}

/// Generation observed by a missed read. `None` when caching is off or the
/// read failed; such a ticket never fills.
#[derive(Debug, Clone, Copy)]
pub struct FillTicket(Option<u64>);

#[derive(Clone)]
pub struct MovieCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
    invalidate_retry: RetryConfig,
}

impl MovieCache {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self::with_backend(Arc::new(RedisBackend::new(conn)), ttl)
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend: Some(backend),
            ttl,
            invalidate_retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(20),
                backoff_multiplier: 2.0,
                max_delay: Duration::from_millis(200),
            },
        }
    }

    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: Duration::ZERO,
            invalidate_retry: RetryConfig::immediate(1),
        }
    }

    pub async fn get_movie(&self, id: Uuid) -> Cached<Movie> {
        self.get(&movie_key(id)).await
    }

    pub async fn put_movie(&self, movie: &Movie, ticket: FillTicket) {
        self.put(&movie_key(movie.id), movie, ticket).await;
    }

    pub async fn get_movie_list(&self) -> Cached<Vec<Movie>> {
        self.get(MOVIE_LIST_KEY).await
    }

    pub async fn put_movie_list(&self, movies: &[Movie], ticket: FillTicket) {
        self.put(MOVIE_LIST_KEY, movies, ticket).await;
    }

    /// Drop the movie's document and the list that contains it, and turn
    /// away fills started before this call.
    pub async fn invalidate_movie(&self, id: Uuid) {
        let Some(backend) = &self.backend else { return };
        let keys = [movie_key(id), MOVIE_LIST_KEY.to_string()];
        let start = Instant::now();
        let result = retry_with_backoff(
            &self.invalidate_retry,
            || backend.invalidate(&keys),
            |_| true,
            "cache_invalidate",
        )
        .await;
        metrics::record_redis_operation("delete", start.elapsed().as_secs_f64());
        if let Err(e) = result {
            error!(movie_id = %id, error = %e, "Failed to invalidate movie cache; entry may be stale until it expires");
        }
    }

    /// `None` when caching is disabled.
    pub async fn ping(&self) -> Option<bool> {
        let backend = self.backend.as_ref()?;
        let start = Instant::now();
        let healthy = backend.ping().await.is_ok();
        metrics::record_redis_operation("ping", start.elapsed().as_secs_f64());
        Some(healthy)
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Cached<T> {
        let Some(backend) = &self.backend else {
            return Cached::Miss(FillTicket(None));
        };
        let start = Instant::now();
        let cached = backend.lookup(key).await;
        metrics::record_redis_operation("get", start.elapsed().as_secs_f64());

        match cached {
            Ok((generation, Some(json))) => match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!(key, "Cache hit");
                    Cached::Hit(value)
                }
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable cache entry");
                    Cached::Miss(FillTicket(Some(generation)))
                }
            },
            Ok((generation, None)) => Cached::Miss(FillTicket(Some(generation))),
            Err(e) => {
                warn!(key, error = %e, "Cache read failed");
                Cached::Miss(FillTicket(None))
            }
        }
    }

    async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T, ticket: FillTicket) {
        let (Some(backend), FillTicket(Some(generation))) = (&self.backend, ticket) else {
            return;
        };
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        let start = Instant::now();
        let result = backend
            .fill(key, json, self.ttl.as_secs().max(1), generation)
            .await;
        metrics::record_redis_operation("set", start.elapsed().as_secs_f64());
        match result {
            Ok(true) => {}
            Ok(false) => debug!(key, "Cache fill skipped; entry invalidated meanwhile"),
            Err(e) => warn!(key, error = %e, "Cache write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Redis stand-in with the same generation semantics
    #[derive(Default)]
    struct FakeBackend {
        generation: Mutex<u64>,
        entries: Mutex<HashMap<String, String>>,
        failing_invalidations: AtomicU32,
    }

    #[async_trait]
    impl CacheBackend for FakeBackend {
        async fn lookup(&self, key: &str) -> RedisResult<(u64, Option<String>)> {
            let generation = *self.generation.lock().unwrap();
            Ok((generation, self.entries.lock().unwrap().get(key).cloned()))
        }

        async fn fill(&self, key: &str, value: String, _ttl_secs: u64, generation: u64) -> RedisResult<bool> {
            if *self.generation.lock().unwrap() != generation {
                return Ok(false);
            }
            self.entries.lock().unwrap().insert(key.to_string(), value);
            Ok(true)
        }

        async fn invalidate(&self, keys: &[String]) -> RedisResult<()> {
            let failed = self
                .failing_invalidations
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(redis::RedisError::from((redis::ErrorKind::IoError, "connection reset")));
            }
            *self.generation.lock().unwrap() += 1;
            let mut entries = self.entries.lock().unwrap();
            for key in keys {
                entries.remove(key);
            }
            Ok(())
        }

        async fn ping(&self) -> RedisResult<()> {
            Ok(())
        }
    }

    fn movie(average_rating: f64) -> Movie {
        Movie {
            id: Uuid::nil(),
            title: "Psycho".into(),
            genre: "Horror".into(),
            poster: "psycho.jpg".into(),
            description: None,
            ticket_price: 9.0,
            showtimes: vec![],
            average_rating,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cache() -> (Arc<FakeBackend>, MovieCache) {
        let backend = Arc::new(FakeBackend::default());
        let cache = MovieCache::with_backend(backend.clone(), Duration::from_secs(60));
        (backend, cache)
    }

    fn miss<T>(cached: Cached<T>) -> FillTicket {
        match cached {
            Cached::Hit(_) => panic!("expected a miss"),
            Cached::Miss(ticket) => ticket,
        }
    }

    #[tokio::test]
    async fn fill_is_served_until_invalidated() {
        let (_, cache) = cache();
        let ticket = miss(cache.get_movie(Uuid::nil()).await);
        cache.put_movie(&movie(4.0), ticket).await;

        match cache.get_movie(Uuid::nil()).await {
            Cached::Hit(cached) => assert_eq!(cached.average_rating, 4.0),
            Cached::Miss(_) => panic!("expected a hit"),
        }

        cache.invalidate_movie(Uuid::nil()).await;
        miss(cache.get_movie(Uuid::nil()).await);
    }

    #[tokio::test]
    async fn fill_started_before_invalidation_is_discarded() {
        let (_, cache) = cache();

        // reader misses and reads the old average from the store
        let ticket = miss(cache.get_movie(Uuid::nil()).await);
        let stale = movie(4.0);

        // a review lands and invalidates before the reader fills
        cache.invalidate_movie(Uuid::nil()).await;
        cache.put_movie(&stale, ticket).await;

        let ticket = miss(cache.get_movie(Uuid::nil()).await);
        cache.put_movie(&movie(3.0), ticket).await;
        match cache.get_movie(Uuid::nil()).await {
            Cached::Hit(cached) => assert_eq!(cached.average_rating, 3.0),
            Cached::Miss(_) => panic!("expected a hit"),
        }
    }

    #[tokio::test]
    async fn list_fill_is_guarded_too() {
        let (_, cache) = cache();
        let ticket = miss(cache.get_movie_list().await);
        cache.invalidate_movie(Uuid::new_v4()).await;
        cache.put_movie_list(&[movie(1.0)], ticket).await;
        miss(cache.get_movie_list().await);
    }

    #[tokio::test]
    async fn failed_invalidation_is_retried() {
        let (backend, cache) = cache();
        let ticket = miss(cache.get_movie(Uuid::nil()).await);
        cache.put_movie(&movie(5.0), ticket).await;

        backend.failing_invalidations.store(2, Ordering::SeqCst);
        cache.invalidate_movie(Uuid::nil()).await;
        miss(cache.get_movie(Uuid::nil()).await);
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = MovieCache::disabled();
        let ticket = miss(cache.get_movie(Uuid::new_v4()).await);
        cache.put_movie(&movie(2.0), ticket).await;
        miss(cache.get_movie(Uuid::nil()).await);
        miss(cache.get_movie_list().await);
        assert!(cache.ping().await.is_none());
        cache.invalidate_movie(Uuid::new_v4()).await;
    }

    #[test]
    fn keys_are_namespaced() {
        let id = Uuid::nil();
        assert_eq!(movie_key(id), "movie:00000000-0000-0000-0000-000000000000");
    }
}
