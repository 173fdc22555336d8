//! Thread-safe LRU cache of decoded chunk payloads.
//!
//! Decoding a chunk means factoring a large integer; programs repeat
//! chunks constantly (every `ADD` is the same integer), so a small LRU
//! map pays for itself immediately. One process-wide instance backs
//! [`crate::decode`]; explicit instances exist for cold-cache testing.

use std::num::NonZeroUsize;
use std::time::Duration;

use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;

use factor_primes::Prime;

use crate::Chunk;

const DEFAULT_CAPACITY: usize = 1024;

struct Entry {
    payload: Vec<(Prime, u32)>,
    decode_time: Option<Duration>,
}

struct Inner {
    map: LruCache<Chunk, Entry>,
    hits: u64,
    misses: u64,
    time_saved: Duration,
    timed_hits: u64,
}

/// LRU map from chunk integer to peeled payload, thread-safe, with
/// hit/miss statistics and an average-decode-time-saved estimate.
pub struct InstructionCache {
    inner: Mutex<Inner>,
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to decode.
    pub misses: u64,
    /// Entries currently held.
    pub size: usize,
    /// `hits / (hits + misses)`, 0 when empty.
    pub hit_rate: f64,
    /// Mean decode time saved per hit, over hits whose entry recorded a
    /// decode time.
    pub avg_decode_time_saved: Duration,
}

impl InstructionCache {
    /// A cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                map: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                time_saved: Duration::ZERO,
                timed_hits: 0,
            }),
        }
    }

    /// Look up a chunk, refreshing its LRU position. Returns an
    /// independent copy of the payload.
    pub fn get(&self, chunk: &Chunk) -> Option<Vec<(Prime, u32)>> {
        let mut inner = self.inner.lock();
        match inner.map.get(chunk) {
            Some(entry) => {
                let payload = entry.payload.clone();
                let saved = entry.decode_time;
                inner.hits += 1;
                if let Some(saved) = saved {
                    inner.time_saved += saved;
                    inner.timed_hits += 1;
                }
                Some(payload)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert a decoded payload, evicting the least-recently-used entry
    /// when full. `decode_time` feeds the time-saved estimate.
    pub fn put(&self, chunk: Chunk, payload: Vec<(Prime, u32)>, decode_time: Option<Duration>) {
        let mut inner = self.inner.lock();
        inner.map.put(
            chunk,
            Entry {
                payload,
                decode_time,
            },
        );
    }

    /// Drop all entries and reset the statistics.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.time_saved = Duration::ZERO;
        inner.timed_hits = 0;
    }

    /// Snapshot the statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            avg_decode_time_saved: if inner.timed_hits == 0 {
                Duration::ZERO
            } else {
                inner.time_saved / inner.timed_hits as u32
            },
        }
    }
}

lazy_static! {
    static ref GLOBAL: InstructionCache = InstructionCache::new(DEFAULT_CAPACITY);
}

/// The process-wide instruction cache used by [`crate::decode`].
pub fn instruction_cache() -> &'static InstructionCache {
    &GLOBAL
}
