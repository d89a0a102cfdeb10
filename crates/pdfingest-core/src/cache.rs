//! Result cache with single-flight computation
//!
//! Completed results live in an LRU keyed by fingerprint. A request that
//! misses while another thread is computing the same fingerprint waits for
//! that computation instead of starting its own.
//!
//! # Thread Safety
//!
//! One `parking_lot::Mutex` guards the index of completed and in-flight
//! entries. It is never held while a computation runs or while a caller
//! waits on a flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, ParseError};
use crate::extract::ExtractionResult;
use crate::source::Fingerprint;

/// Outcome shared with every caller of one flight
pub type CacheOutcome = Result<Arc<ExtractionResult>, CacheError>;

/// Cache bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Completed results kept
    pub max_entries: usize,
    /// Total bytes of cached page text, if bounded
    pub max_text_bytes: Option<usize>,
    /// Results older than this are recomputed, if set
    pub max_age_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            max_text_bytes: None,
            max_age_secs: None,
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Served from a completed entry
    pub hits: u64,
    /// Not served from a completed entry (includes callers that joined a flight)
    pub misses: u64,
    /// Computations started
    pub computations: u64,
    /// Entries dropped by capacity, size or age
    pub evictions: u64,
    pub entries: usize,
    pub text_bytes: usize,
}

struct Ready {
    result: Arc<ExtractionResult>,
    inserted: Instant,
    bytes: usize,
}

/// One pending computation; resolved exactly once
struct Flight {
    outcome: Mutex<Option<CacheOutcome>>,
    resolved: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            resolved: Condvar::new(),
        }
    }

    fn resolve(&self, outcome: CacheOutcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.resolved.notify_all();
    }

    fn wait(&self) -> CacheOutcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.resolved.wait(&mut slot);
        }
    }
}

struct Index {
    ready: LruCache<Fingerprint, Ready>,
    pending: HashMap<Fingerprint, Arc<Flight>>,
    text_bytes: usize,
}

/// Thread-safe fingerprint → result cache
pub struct ResultCache {
    config: CacheConfig,
    index: Mutex<Index>,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            index: Mutex::new(Index {
                ready: LruCache::unbounded(),
                pending: HashMap::new(),
                text_bytes: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the cached result for `fingerprint`, computing it at most
    /// once across concurrent callers.
    ///
    /// Failures are handed to every waiting caller and are not cached.
    pub fn get_or_compute<F>(&self, fingerprint: Fingerprint, compute: F) -> CacheOutcome
    where
        F: FnOnce() -> Result<ExtractionResult, ParseError>,
    {
        let flight = {
            let mut index = self.index.lock();
            if let Some(result) = self.lookup(&mut index, &fingerprint) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint.short(), "Cache hit");
                return Ok(result);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);

            if let Some(flight) = index.pending.get(&fingerprint) {
                let flight = Arc::clone(flight);
                drop(index);
                debug!(fingerprint = %fingerprint.short(), "Joining in-flight extraction");
                return flight.wait();
            }

            let flight = Arc::new(Flight::new());
            index.pending.insert(fingerprint, Arc::clone(&flight));
            flight
        };

        let guard = FlightGuard {
            cache: self,
            fingerprint,
            flight,
            completed: false,
        };
        self.computations.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %fingerprint.short(), "Cache miss, computing");

        let outcome = compute()
            .map(Arc::new)
            .map_err(CacheError::ComputationFailed);
        guard.complete(outcome)
    }

    /// Completed result, if present and fresh. Does not count as a hit.
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<Arc<ExtractionResult>> {
        let index = self.index.lock();
        let entry = index.ready.peek(fingerprint)?;
        if self.is_expired(entry) {
            return None;
        }
        Some(Arc::clone(&entry.result))
    }

    /// Drop the completed entry for `fingerprint`. In-flight computations
    /// are unaffected.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let mut index = self.index.lock();
        match index.ready.pop(fingerprint) {
            Some(entry) => {
                index.text_bytes -= entry.bytes;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut index = self.index.lock();
        index.ready.clear();
        index.text_bytes = 0;
    }

    /// Completed entries held
    pub fn len(&self) -> usize {
        self.index.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Computations currently running
    pub fn in_flight(&self) -> usize {
        self.index.lock().pending.len()
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, text_bytes) = {
            let index = self.index.lock();
            (index.ready.len(), index.text_bytes)
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
            text_bytes,
        }
    }

    fn is_expired(&self, entry: &Ready) -> bool {
        self.config
            .max_age()
            .is_some_and(|max_age| entry.inserted.elapsed() >= max_age)
    }

    fn lookup(&self, index: &mut Index, fingerprint: &Fingerprint) -> Option<Arc<ExtractionResult>> {
        let entry = index.ready.get(fingerprint)?;
        if !self.is_expired(entry) {
            return Some(Arc::clone(&entry.result));
        }

        if let Some(expired) = index.ready.pop(fingerprint) {
            index.text_bytes -= expired.bytes;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint.short(), "Cached result expired");
        }
        None
    }

    fn store(&self, index: &mut Index, fingerprint: Fingerprint, result: Arc<ExtractionResult>) {
        let bytes = result.text_bytes();
        if self.config.max_text_bytes.is_some_and(|max| bytes > max) {
            debug!(fingerprint = %fingerprint.short(), bytes, "Result larger than cache bound, not retained");
            return;
        }

        let entry = Ready {
            result,
            inserted: Instant::now(),
            bytes,
        };
        if let Some(previous) = index.ready.put(fingerprint, entry) {
            index.text_bytes -= previous.bytes;
        }
        index.text_bytes += bytes;

        while index.ready.len() > self.config.max_entries
            || self
                .config
                .max_text_bytes
                .is_some_and(|max| index.text_bytes > max)
        {
            let Some((evicted, entry)) = index.ready.pop_lru() else {
                break;
            };
            index.text_bytes -= entry.bytes;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %evicted.short(), "Evicted least recently used result");
        }
    }
}

/// Owns the pending marker of a flight. Dropping it without completing,
/// e.g. while unwinding from a panicking computation, releases waiters
/// with [`CacheError::Abandoned`].
struct FlightGuard<'c> {
    cache: &'c ResultCache,
    fingerprint: Fingerprint,
    flight: Arc<Flight>,
    completed: bool,
}

impl FlightGuard<'_> {
    fn complete(mut self, outcome: CacheOutcome) -> CacheOutcome {
        {
            let mut index = self.cache.index.lock();
            self.remove_pending(&mut index);
            if let Ok(result) = &outcome {
                self.cache.store(&mut index, self.fingerprint, Arc::clone(result));
            }
        }
        self.flight.resolve(outcome.clone());
        self.completed = true;
        outcome
    }

    fn remove_pending(&self, index: &mut Index) {
        if index
            .pending
            .get(&self.fingerprint)
            .is_some_and(|current| Arc::ptr_eq(current, &self.flight))
        {
            index.pending.remove(&self.fingerprint);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        {
            let mut index = self.cache.index.lock();
            self.remove_pending(&mut index);
        }
        debug!(fingerprint = %self.fingerprint.short(), "Extraction abandoned");
        self.flight.resolve(Err(CacheError::Abandoned));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Barrier};
    use std::thread;

    use crate::extract::PageEntry;

    fn sample(text: &str) -> ExtractionResult {
        ExtractionResult {
            fingerprint: Fingerprint::of(text.as_bytes()).to_hex(),
            pages: vec![PageEntry {
                page_number: 1,
                lines: vec![text.to_string()],
                width: 612.0,
                height: 792.0,
                rotation: 0,
                image_count: 0,
                char_count: text.chars().count(),
                diagnostics: Vec::new(),
            }],
            metadata: BTreeMap::new(),
            declared_page_count: 1,
            recovered: false,
            warnings: Vec::new(),
        }
    }

    fn fp(label: &str) -> Fingerprint {
        Fingerprint::of(label.as_bytes())
    }

    fn bounded(max_entries: usize) -> ResultCache {
        ResultCache::new(CacheConfig {
            max_entries,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn test_second_request_is_a_hit() {
        let cache = ResultCache::default();
        let first = cache.get_or_compute(fp("a"), || Ok(sample("a"))).unwrap();
        let second = cache
            .get_or_compute(fp("a"), || panic!("must not recompute"))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.computations), (1, 1, 1));
        assert_eq!(stats.text_bytes, 1);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = ResultCache::default();
        let failure = || Err(ParseError::MalformedHeader("empty input".into()));

        let err = cache.get_or_compute(fp("bad"), failure).unwrap_err();
        assert!(matches!(err, CacheError::ComputationFailed(ParseError::MalformedHeader(_))));
        assert!(cache.get_or_compute(fp("bad"), failure).is_err());

        assert_eq!(cache.stats().computations, 2);
        assert!(cache.is_empty());
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = bounded(2);
        cache.get_or_compute(fp("a"), || Ok(sample("a"))).unwrap();
        cache.get_or_compute(fp("b"), || Ok(sample("b"))).unwrap();
        // Touch "a" so "b" becomes least recently used
        cache.get_or_compute(fp("a"), || Ok(sample("a"))).unwrap();
        cache.get_or_compute(fp("c"), || Ok(sample("c"))).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&fp("a")).is_some());
        assert!(cache.peek(&fp("b")).is_none());
        assert_eq!(cache.stats().evictions, 1);

        let before = cache.stats().computations;
        cache.get_or_compute(fp("b"), || Ok(sample("b"))).unwrap();
        assert_eq!(cache.stats().computations, before + 1);
    }

    #[test]
    fn test_text_byte_bound() {
        let cache = ResultCache::new(CacheConfig {
            max_text_bytes: Some(10),
            ..CacheConfig::default()
        });

        let big = cache
            .get_or_compute(fp("big"), || Ok(sample("far more than ten bytes")))
            .unwrap();
        assert_eq!(big.page_texts(), vec!["far more than ten bytes"]);
        assert!(cache.is_empty());

        cache.get_or_compute(fp("x"), || Ok(sample("123456"))).unwrap();
        cache.get_or_compute(fp("y"), || Ok(sample("abcdef"))).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.peek(&fp("y")).is_some());
        assert!(cache.stats().text_bytes <= 10);
    }

    #[test]
    fn test_expired_entries_are_recomputed() {
        let cache = ResultCache::new(CacheConfig {
            max_age_secs: Some(0),
            ..CacheConfig::default()
        });
        cache.get_or_compute(fp("a"), || Ok(sample("a"))).unwrap();
        cache.get_or_compute(fp("a"), || Ok(sample("a"))).unwrap();
        assert_eq!(cache.stats().computations, 2);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = ResultCache::default();
        cache.get_or_compute(fp("a"), || Ok(sample("a"))).unwrap();
        cache.get_or_compute(fp("b"), || Ok(sample("b"))).unwrap();

        assert!(cache.invalidate(&fp("a")));
        assert!(!cache.invalidate(&fp("a")));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().text_bytes, 0);
    }

    #[test]
    fn test_concurrent_requests_share_one_computation() {
        let cache = ResultCache::default();
        let runs = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        let results: Vec<CacheOutcome> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.get_or_compute(fp("shared"), || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(sample("shared"))
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
    }

    #[test]
    fn test_concurrent_failure_reaches_every_waiter() {
        let cache = ResultCache::default();
        let barrier = Barrier::new(4);

        let results: Vec<CacheOutcome> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.get_or_compute(fp("broken"), || {
                            thread::sleep(Duration::from_millis(50));
                            Err(ParseError::BrokenCrossReference("no objects".into()))
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            assert!(matches!(
                result,
                Err(CacheError::ComputationFailed(ParseError::BrokenCrossReference(_)))
            ));
        }
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_panicking_computation_abandons_waiters() {
        let cache = ResultCache::default();
        let (started_tx, started_rx) = mpsc::channel();

        let shared = &cache;
        thread::scope(|s| {
            let leader = s.spawn(move || {
                let _ = shared.get_or_compute(fp("doomed"), || {
                    started_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(200));
                    panic!("extraction blew up");
                });
            });

            started_rx.recv().unwrap();
            let waiter = cache.get_or_compute(fp("doomed"), || Ok(sample("fresh")));
            assert_eq!(waiter.unwrap_err(), CacheError::Abandoned);
            assert!(leader.join().is_err());
        });

        // The pending marker is gone, so the next caller computes
        let retried = cache.get_or_compute(fp("doomed"), || Ok(sample("fresh"))).unwrap();
        assert_eq!(retried.page_texts(), vec!["fresh"]);
    }
}
