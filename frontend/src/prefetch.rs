use std::collections::{HashMap, HashSet};

/// Hover dwell time before a prefetch is considered intentional.
pub const HOVER_DELAY_MS: u32 = 100;
/// Cached markup older than this is treated as absent.
pub const ENTRY_TTL_MS: f64 = 5.0 * 60.0 * 1000.0;
/// Concurrent prefetches beyond this are dropped, not queued.
pub const MAX_IN_FLIGHT: usize = 3;

struct Entry {
    html: String,
    fetched_at: f64,
}

/// Bookkeeping for hover prefetches. Timestamps come from the caller so the
/// TTL logic stays testable off the browser clock.
#[derive(Default)]
pub struct PrefetchCache {
    entries: HashMap<String, Entry>,
    in_flight: HashSet<String>,
    dropped: u64,
    failed: u64,
}

impl PrefetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns cached markup younger than the TTL. Stale entries are evicted
    /// on lookup rather than by a background sweep.
    pub fn lookup(&mut self, url: &str, now: f64) -> Option<String> {
        match self.entries.get(url) {
            Some(entry) if now - entry.fetched_at <= ENTRY_TTL_MS => Some(entry.html.clone()),
            Some(_) => {
                self.entries.remove(url);
                None
            }
            None => None,
        }
    }

    /// Claims a fetch slot for `url`. Returns false when the URL is already
    /// cached, already being fetched, or the concurrency cap is reached.
    pub fn begin(&mut self, url: &str, now: f64) -> bool {
        if self.in_flight.contains(url) || self.lookup(url, now).is_some() {
            return false;
        }
        if self.in_flight.len() >= MAX_IN_FLIGHT {
            self.dropped += 1;
            return false;
        }
        self.in_flight.insert(url.to_string());
        true
    }

    pub fn finish(&mut self, url: String, html: String, now: f64) {
        self.in_flight.remove(&url);
        self.entries.insert(url, Entry { html, fetched_at: now });
    }

    /// A failed prefetch frees its slot and is counted; the click path falls
    /// back to normal navigation, so there is nothing to surface.
    pub fn fail(&mut self, url: &str) {
        self.in_flight.remove(url);
        self.failed += 1;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.in_flight.clear();
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE_MS: f64 = 60.0 * 1000.0;

    #[test]
    fn entry_is_usable_just_inside_the_ttl() {
        let mut cache = PrefetchCache::new();
        cache.finish("/about".into(), "<html></html>".into(), 0.0);
        let almost_five_minutes = 4.0 * MINUTE_MS + 59.0 * 1000.0;
        assert_eq!(
            cache.lookup("/about", almost_five_minutes),
            Some("<html></html>".into())
        );
    }

    #[test]
    fn entry_expires_just_past_the_ttl() {
        let mut cache = PrefetchCache::new();
        cache.finish("/about".into(), "<html></html>".into(), 0.0);
        let past_five_minutes = 5.0 * MINUTE_MS + 1000.0;
        assert_eq!(cache.lookup("/about", past_five_minutes), None);
        // evicted, not just hidden
        assert_eq!(cache.lookup("/about", 0.0), None);
    }

    #[test]
    fn concurrency_cap_drops_excess_fetches() {
        let mut cache = PrefetchCache::new();
        let begun = (0..5)
            .filter(|i| cache.begin(&format!("/page/{i}"), 0.0))
            .count();
        assert_eq!(begun, MAX_IN_FLIGHT);
        assert_eq!(cache.dropped(), 2);
    }

    #[test]
    fn duplicate_hover_does_not_claim_a_second_slot() {
        let mut cache = PrefetchCache::new();
        assert!(cache.begin("/docs", 0.0));
        assert!(!cache.begin("/docs", 0.0));
        assert_eq!(cache.dropped(), 0);
    }

    #[test]
    fn cached_url_is_not_refetched_while_fresh() {
        let mut cache = PrefetchCache::new();
        cache.finish("/docs".into(), "cached".into(), 0.0);
        assert!(!cache.begin("/docs", MINUTE_MS));
        assert!(cache.begin("/docs", 6.0 * MINUTE_MS));
    }

    #[test]
    fn failure_frees_the_slot_and_is_counted() {
        let mut cache = PrefetchCache::new();
        for i in 0..MAX_IN_FLIGHT {
            assert!(cache.begin(&format!("/page/{i}"), 0.0));
        }
        cache.fail("/page/0");
        assert_eq!(cache.failed(), 1);
        assert!(cache.begin("/page/9", 0.0));
    }

    #[test]
    fn clear_empties_cache_and_in_flight_set() {
        let mut cache = PrefetchCache::new();
        cache.finish("/a".into(), "a".into(), 0.0);
        assert!(cache.begin("/b", 0.0));
        cache.clear();
        assert_eq!(cache.lookup("/a", 0.0), None);
        assert!(cache.begin("/b", 0.0));
    }
}
