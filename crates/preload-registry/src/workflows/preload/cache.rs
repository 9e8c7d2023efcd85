use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::domain::{DomainState, PreloadStatus};

struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
}

impl<T: Clone> CacheEntry<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.inserted_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

#[derive(Default)]
struct CacheMaps {
    generation: u64,
    by_status: HashMap<PreloadStatus, CacheEntry<Vec<DomainState>>>,
    by_domain: HashMap<String, CacheEntry<DomainState>>,
}

/// Short-lived cache in front of store reads.
///
/// Every write through the registry bumps the generation and clears the maps;
/// values fetched under an older generation are discarded instead of stored,
/// so a read that raced a write cannot reinstate the old value.
pub struct StateCache {
    ttl: Duration,
    maps: Mutex<CacheMaps>,
}

impl StateCache {
    /// A zero duration disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            maps: Mutex::new(CacheMaps::default()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    fn lock(&self) -> MutexGuard<'_, CacheMaps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token to hand back when storing a value fetched after this call.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn states_with_status(&self, status: PreloadStatus) -> Option<Vec<DomainState>> {
        if !self.is_enabled() {
            return None;
        }
        self.lock()
            .by_status
            .get(&status)
            .and_then(|entry| entry.fresh(self.ttl))
    }

    pub fn store_states_with_status(
        &self,
        generation: u64,
        status: PreloadStatus,
        states: Vec<DomainState>,
    ) {
        if !self.is_enabled() {
            return;
        }
        let mut maps = self.lock();
        if maps.generation != generation {
            return;
        }
        maps.by_status.insert(
            status,
            CacheEntry {
                value: states,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn state_for_domain(&self, domain: &str) -> Option<DomainState> {
        if !self.is_enabled() {
            return None;
        }
        self.lock()
            .by_domain
            .get(domain)
            .and_then(|entry| entry.fresh(self.ttl))
    }

    pub fn store_state_for_domain(&self, generation: u64, state: DomainState) {
        if !self.is_enabled() {
            return;
        }
        let mut maps = self.lock();
        if maps.generation != generation {
            return;
        }
        let ttl = self.ttl;
        maps.by_domain.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        maps.by_domain.insert(
            state.name.clone(),
            CacheEntry {
                value: state,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self) {
        let mut maps = self.lock();
        maps.generation = maps.generation.wrapping_add(1);
        maps.by_status.clear();
        maps.by_domain.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(name: &str) -> DomainState {
        DomainState {
            name: name.into(),
            status: PreloadStatus::Pending,
            ..DomainState::default()
        }
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = StateCache::disabled();
        let generation = cache.generation();
        cache.store_state_for_domain(generation, pending("a.test"));
        assert_eq!(cache.state_for_domain("a.test"), None);
    }

    #[test]
    fn hits_until_invalidated() {
        let cache = StateCache::new(Duration::from_secs(60));
        let generation = cache.generation();
        cache.store_states_with_status(generation, PreloadStatus::Pending, vec![pending("a.test")]);
        cache.store_state_for_domain(generation, pending("a.test"));

        assert_eq!(
            cache.states_with_status(PreloadStatus::Pending),
            Some(vec![pending("a.test")])
        );
        assert_eq!(cache.states_with_status(PreloadStatus::Preloaded), None);
        assert_eq!(cache.state_for_domain("a.test"), Some(pending("a.test")));

        cache.invalidate();
        assert_eq!(cache.states_with_status(PreloadStatus::Pending), None);
        assert_eq!(cache.state_for_domain("a.test"), None);
    }

    #[test]
    fn stale_generation_is_not_stored() {
        let cache = StateCache::new(Duration::from_secs(60));
        let before_write = cache.generation();
        cache.invalidate();
        cache.store_state_for_domain(before_write, pending("a.test"));
        assert_eq!(cache.state_for_domain("a.test"), None);
    }

    #[test]
    fn expired_entries_are_ignored() {
        let cache = StateCache::new(Duration::from_millis(5));
        let generation = cache.generation();
        cache.store_state_for_domain(generation, pending("a.test"));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.state_for_domain("a.test"), None);
    }

    #[test]
    fn expired_domain_entries_are_pruned_on_insert() {
        let cache = StateCache::new(Duration::from_millis(5));
        let generation = cache.generation();
        for n in 0..100 {
            cache.store_state_for_domain(generation, pending(&format!("d{n}.test")));
        }
        assert_eq!(cache.lock().by_domain.len(), 100);

        std::thread::sleep(Duration::from_millis(20));
        cache.store_state_for_domain(generation, pending("fresh.test"));
        let maps = cache.lock();
        assert_eq!(maps.by_domain.len(), 1);
        assert!(maps.by_domain.contains_key("fresh.test"));
    }
}
