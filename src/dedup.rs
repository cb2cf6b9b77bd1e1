use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use async_trait::async_trait;

type DedupKey = (i64, i64);

// Expired entries are swept lazily, once per this many check-and-mark calls.
const SWEEP_INTERVAL: u64 = 1024;

/// Time-windowed membership set over (source chat id, message id).
/// `check_and_mark` is atomic: of N concurrent calls for the same key,
/// exactly one sees "new".
///
/// A cache error must never fail the pipeline; callers degrade to
/// treating the message as new.
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Returns true when the key was unseen within the TTL window.
    async fn check_and_mark(&self, source_chat_id: i64, message_id: i64) -> anyhow::Result<bool>;
}

pub struct InMemoryDedupCache {
    ttl: Duration,
    entries: flurry::HashMap<DedupKey, Instant>,
    calls: AtomicU64,
}

impl InMemoryDedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: flurry::HashMap::new(),
            calls: AtomicU64::new(0),
        }
    }

    fn check_and_mark_impl(&self, key: DedupKey) -> bool {
        let now = Instant::now();
        let guard = self.entries.guard();
        let new = match self.entries.try_insert(key, now, &guard) {
            Ok(_) => true,
            Err(occupied) => {
                if now.duration_since(*occupied.current) >= self.ttl {
                    // the previous sighting aged out of the window
                    self.entries.insert(key, now, &guard);
                    true
                } else {
                    false
                }
            }
        };
        if self.calls.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep(now);
        }
        new
    }

    fn sweep(&self, now: Instant) {
        let guard = self.entries.guard();
        for (key, marked_at) in self.entries.iter(&guard) {
            if now.duration_since(*marked_at) >= self.ttl {
                self.entries.remove(key, &guard);
            }
        }
    }
}

#[async_trait]
impl DedupCache for InMemoryDedupCache {
    async fn check_and_mark(&self, source_chat_id: i64, message_id: i64) -> anyhow::Result<bool> {
        Ok(self.check_and_mark_impl((source_chat_id, message_id)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use super::*;

    #[tokio::test]
    async fn first_sighting_is_new_second_is_not() {
        let cache = InMemoryDedupCache::new(Duration::from_secs(3600));
        assert!(cache.check_and_mark(-100, 1).await.unwrap());
        assert!(!cache.check_and_mark(-100, 1).await.unwrap());
        // a different message id is a different key
        assert!(cache.check_and_mark(-100, 2).await.unwrap());
        // same message id from another chat too
        assert!(cache.check_and_mark(-200, 1).await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_are_treated_as_new() {
        let cache = InMemoryDedupCache::new(Duration::ZERO);
        assert!(cache.check_and_mark(-100, 1).await.unwrap());
        assert!(cache.check_and_mark(-100, 1).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_marks_admit_exactly_one() {
        let cache = Arc::new(InMemoryDedupCache::new(Duration::from_secs(3600)));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.check_and_mark(-100, 42).await.unwrap() })
            })
            .collect();
        let mut new_count = 0;
        for task in tasks {
            if task.await.unwrap() {
                new_count += 1;
            }
        }
        assert_eq!(new_count, 1);
    }

    #[tokio::test]
    async fn sweep_drops_expired_keys() {
        let cache = InMemoryDedupCache::new(Duration::ZERO);
        cache.check_and_mark(-100, 1).await.unwrap();
        cache.sweep(Instant::now());
        assert!(cache.entries.pin().is_empty());
    }
}
