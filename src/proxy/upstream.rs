//! Fallback backend selection and passive health tracking.
//!
//! When a request carries no usable affinity cookie, the gateway falls back
//! to weighted round-robin over the healthy members of the pool snapshot.
//! Health is tracked passively from connection outcomes; when every backend
//! is unhealthy, selection returns None.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use url::Url;

use crate::affinity::normalize;
use crate::store::Backend;

/// Health status of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Tracks health status of backends.
///
/// Keyed by backend identity. Unknown backends are considered healthy.
/// After `failure_threshold` consecutive failures a backend is marked
/// unhealthy; a single success restores it.
pub struct HealthTracker {
    health: DashMap<String, HealthStatus>,
    failures: DashMap<String, u32>,
    failure_threshold: u32,
}

impl HealthTracker {
    /// Creates a new HealthTracker with the given failure threshold.
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            health: DashMap::new(),
            failures: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Records a successful connection to a backend.
    pub fn record_success(&self, url: &Url) {
        let key = normalize(url);
        self.failures.insert(key.clone(), 0);
        let previous = self.health.insert(key, HealthStatus::Healthy);
        if previous == Some(HealthStatus::Unhealthy) {
            tracing::info!(backend = %url, "backend recovered");
        }
    }

    /// Records a failed connection to a backend.
    pub fn record_failure(&self, url: &Url) {
        let key = normalize(url);
        let count = {
            let mut count = self.failures.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if count >= self.failure_threshold {
            let previous = self.health.insert(key, HealthStatus::Unhealthy);
            if previous != Some(HealthStatus::Unhealthy) {
                tracing::warn!(backend = %url, failures = count, "backend marked unhealthy");
            }
        }
    }

    /// Returns whether a backend is healthy.
    pub fn is_healthy(&self, url: &Url) -> bool {
        self.health
            .get(&normalize(url))
            .map(|status| *status == HealthStatus::Healthy)
            .unwrap_or(true)
    }

    /// Forgets everything known about a backend.
    pub fn reset(&self, url: &Url) {
        let key = normalize(url);
        self.failures.remove(&key);
        self.health.remove(&key);
    }
}

/// Weighted round-robin selector with health awareness.
pub struct LoadBalancer {
    current: AtomicUsize,
    health_tracker: Arc<HealthTracker>,
}

impl LoadBalancer {
    /// Creates a new LoadBalancer with the given health tracker.
    pub fn new(health_tracker: Arc<HealthTracker>) -> Self {
        Self {
            current: AtomicUsize::new(0),
            health_tracker,
        }
    }

    /// Selects the next backend using weighted round-robin.
    ///
    /// Skips unhealthy backends. Returns None if none are healthy or the
    /// snapshot is empty.
    pub fn next<'a>(&self, backends: &'a [Backend]) -> Option<&'a Backend> {
        let healthy = self.healthy_backends(backends);
        let total: usize = healthy.iter().map(|b| b.weight.max(1) as usize).sum();
        if total == 0 {
            return None;
        }

        let mut slot = self.current.fetch_add(1, Ordering::Relaxed) % total;
        for backend in healthy {
            let weight = backend.weight.max(1) as usize;
            if slot < weight {
                return Some(backend);
            }
            slot -= weight;
        }
        None
    }

    /// Returns all healthy backends from the given list.
    pub fn healthy_backends<'a>(&self, backends: &'a [Backend]) -> Vec<&'a Backend> {
        backends
            .iter()
            .filter(|b| self.health_tracker.is_healthy(&b.url))
            .collect()
    }

    /// Returns a reference to the health tracker.
    pub fn health_tracker(&self) -> &Arc<HealthTracker> {
        &self.health_tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(address: &str) -> Url {
        Url::parse(&format!("http://{}/", address)).unwrap()
    }

    fn make_backend(address: &str, weight: u32) -> Backend {
        Backend::with_weight(url(address), weight)
    }

    fn host(backend: &Backend) -> String {
        format!(
            "{}:{}",
            backend.url.host_str().unwrap(),
            backend.url.port().unwrap()
        )
    }

    fn fail(tracker: &HealthTracker, address: &str, times: usize) {
        for _ in 0..times {
            tracker.record_failure(&url(address));
        }
    }

    // ========== Phase 1: HealthTracker ==========

    #[test]
    fn test_health_tracker_new_backends_are_healthy() {
        let tracker = HealthTracker::new(3);
        assert!(tracker.is_healthy(&url("backend:8080")));
        assert!(tracker.is_healthy(&url("unknown:9090")));
    }

    #[test]
    fn test_health_tracker_single_failure_stays_healthy() {
        let tracker = HealthTracker::new(3);
        fail(&tracker, "backend:8080", 1);
        assert!(tracker.is_healthy(&url("backend:8080")));
    }

    #[test]
    fn test_health_tracker_threshold_failures_becomes_unhealthy() {
        let tracker = HealthTracker::new(3);
        fail(&tracker, "backend:8080", 3);
        assert!(!tracker.is_healthy(&url("backend:8080")));
    }

    #[test]
    fn test_health_tracker_success_resets_failure_count() {
        let tracker = HealthTracker::new(3);
        fail(&tracker, "backend:8080", 2);
        tracker.record_success(&url("backend:8080"));
        fail(&tracker, "backend:8080", 2);
        assert!(tracker.is_healthy(&url("backend:8080")));
    }

    #[test]
    fn test_health_tracker_success_restores_unhealthy_backend() {
        let tracker = HealthTracker::new(3);
        fail(&tracker, "backend:8080", 3);
        assert!(!tracker.is_healthy(&url("backend:8080")));
        tracker.record_success(&url("backend:8080"));
        assert!(tracker.is_healthy(&url("backend:8080")));
    }

    #[test]
    fn test_health_tracker_reset_clears_status() {
        let tracker = HealthTracker::new(3);
        fail(&tracker, "backend:8080", 3);
        tracker.reset(&url("backend:8080"));
        assert!(tracker.is_healthy(&url("backend:8080")));
    }

    #[test]
    fn test_health_tracker_keys_by_identity() {
        let tracker = HealthTracker::new(1);
        tracker.record_failure(&Url::parse("http://user:pw@backend:8080/").unwrap());
        assert!(!tracker.is_healthy(&url("backend:8080")));
    }

    #[test]
    fn test_health_tracker_zero_threshold_treated_as_one() {
        let tracker = HealthTracker::new(0);
        assert!(tracker.is_healthy(&url("backend:8080")));
        fail(&tracker, "backend:8080", 1);
        assert!(!tracker.is_healthy(&url("backend:8080")));
    }

    // ========== Phase 2: Round-Robin ==========

    #[test]
    fn test_load_balancer_single_backend_always_selected() {
        let lb = LoadBalancer::new(Arc::new(HealthTracker::new(3)));
        let backends = vec![make_backend("a:8080", 1)];
        for _ in 0..5 {
            assert_eq!(host(lb.next(&backends).unwrap()), "a:8080");
        }
    }

    #[test]
    fn test_load_balancer_three_backends_cycles() {
        let lb = LoadBalancer::new(Arc::new(HealthTracker::new(3)));
        let backends = vec![
            make_backend("a:8080", 1),
            make_backend("b:8080", 1),
            make_backend("c:8080", 1),
        ];

        let selections: Vec<String> = (0..6).map(|_| host(lb.next(&backends).unwrap())).collect();
        assert_eq!(
            selections,
            vec!["a:8080", "b:8080", "c:8080", "a:8080", "b:8080", "c:8080"]
        );
    }

    #[test]
    fn test_weighted_round_robin_basic() {
        let lb = LoadBalancer::new(Arc::new(HealthTracker::new(3)));
        let backends = vec![make_backend("a:8080", 2), make_backend("b:8080", 1)];

        let selections: Vec<String> = (0..6).map(|_| host(lb.next(&backends).unwrap())).collect();
        assert_eq!(
            selections,
            vec!["a:8080", "a:8080", "b:8080", "a:8080", "a:8080", "b:8080"]
        );
    }

    #[test]
    fn test_weighted_round_robin_zero_weight_treated_as_one() {
        let lb = LoadBalancer::new(Arc::new(HealthTracker::new(3)));
        let backends = vec![make_backend("a:8080", 1), make_backend("b:8080", 0)];

        let selections: Vec<String> = (0..4).map(|_| host(lb.next(&backends).unwrap())).collect();
        assert_eq!(selections, vec!["a:8080", "b:8080", "a:8080", "b:8080"]);
    }

    #[test]
    fn test_weighted_round_robin_distribution_80_20() {
        let lb = LoadBalancer::new(Arc::new(HealthTracker::new(3)));
        let backends = vec![make_backend("a:8080", 80), make_backend("b:8080", 20)];

        let a_count = (0..100)
            .filter(|_| host(lb.next(&backends).unwrap()) == "a:8080")
            .count();
        assert_eq!(a_count, 80);
    }

    // ========== Phase 3: Health Awareness ==========

    #[test]
    fn test_load_balancer_skips_unhealthy_backend() {
        let tracker = Arc::new(HealthTracker::new(3));
        let lb = LoadBalancer::new(Arc::clone(&tracker));
        let backends = vec![
            make_backend("a:8080", 1),
            make_backend("b:8080", 1),
            make_backend("c:8080", 1),
        ];
        fail(&tracker, "b:8080", 3);

        let selections: Vec<String> = (0..4).map(|_| host(lb.next(&backends).unwrap())).collect();
        assert_eq!(selections, vec!["a:8080", "c:8080", "a:8080", "c:8080"]);
    }

    #[test]
    fn test_load_balancer_all_backends_unhealthy_returns_none() {
        let tracker = Arc::new(HealthTracker::new(3));
        let lb = LoadBalancer::new(Arc::clone(&tracker));
        let backends = vec![make_backend("a:8080", 1), make_backend("b:8080", 1)];
        fail(&tracker, "a:8080", 3);
        fail(&tracker, "b:8080", 3);

        assert!(lb.next(&backends).is_none());
        assert!(lb.healthy_backends(&backends).is_empty());
    }

    #[test]
    fn test_load_balancer_empty_backends_returns_none() {
        let lb = LoadBalancer::new(Arc::new(HealthTracker::new(3)));
        let backends: Vec<Backend> = vec![];
        assert!(lb.next(&backends).is_none());
    }

    // ========== Phase 4: Thread Safety ==========

    #[test]
    fn test_load_balancer_concurrent_next_calls() {
        use std::thread;

        let lb = Arc::new(LoadBalancer::new(Arc::new(HealthTracker::new(3))));
        let backends = vec![make_backend("a:8080", 1), make_backend("b:8080", 1)];

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let lb = Arc::clone(&lb);
                let backends = backends.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(lb.next(&backends).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_load_balancer_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoadBalancer>();
        assert_send_sync::<HealthTracker>();
    }
}
