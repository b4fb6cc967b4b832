//! Operator-mutable backend pool with lock-free snapshots.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use url::{Host, Url};

use crate::affinity::{same_identity, BackendAddress};

/// A backend server in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub url: Url,
    /// Relative weight for fallback selection. Zero is treated as one.
    pub weight: u32,
    /// Socket address the proxy connects to. Set when the backend is built,
    /// never looked up on the request path.
    pub addr: Option<SocketAddr>,
}

impl Backend {
    pub fn new(url: Url) -> Self {
        Self::with_weight(url, 1)
    }

    /// Builds a backend whose address is taken from an IP literal host.
    ///
    /// Hostnames leave `addr` unset; use [`Backend::resolve`] for those.
    pub fn with_weight(url: Url, weight: u32) -> Self {
        let addr = literal_address(&url);
        Self { url, weight, addr }
    }

    /// Builds a backend, resolving a hostname through the system resolver.
    ///
    /// Blocks on DNS. Call it when loading configuration, not while serving.
    pub fn resolve(url: Url, weight: u32) -> std::io::Result<Self> {
        let addr = match literal_address(&url) {
            Some(addr) => addr,
            None => url
                .socket_addrs(|| None)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "resolved to no addresses")
                })?,
        };
        Ok(Self {
            url,
            weight,
            addr: Some(addr),
        })
    }
}

/// Returns the socket address of a URL whose host is an IP literal.
///
/// Uses the explicit port or the scheme's default.
pub fn literal_address(url: &Url) -> Option<SocketAddr> {
    let port = url.port_or_known_default()?;
    match url.host()? {
        Host::Ipv4(ip) => Some(SocketAddr::from((ip, port))),
        Host::Ipv6(ip) => Some(SocketAddr::from((ip, port))),
        Host::Domain(_) => None,
    }
}

impl BackendAddress for Backend {
    fn address(&self) -> &Url {
        &self.url
    }
}

/// Ordered backend pool shared between the proxy and its operators.
///
/// Readers take an immutable snapshot per request and never block writers.
/// Writers publish a fresh copy of the list; concurrent writers retry via
/// read-copy-update. Entries are keyed by backend identity, so two addresses
/// differing only in credentials are the same entry.
pub struct BackendPool {
    backends: ArcSwap<Vec<Backend>>,
    version: AtomicU64,
}

impl BackendPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::from_backends(Vec::new())
    }

    /// Creates a pool holding the given backends in order.
    pub fn from_backends(backends: Vec<Backend>) -> Self {
        Self {
            backends: ArcSwap::from_pointee(backends),
            version: AtomicU64::new(0),
        }
    }

    /// Returns the current immutable view of the pool.
    pub fn snapshot(&self) -> Arc<Vec<Backend>> {
        self.backends.load_full()
    }

    /// Inserts a backend or updates the entry with the same identity in place.
    ///
    /// Returns true when the backend was newly added. Upserting an identical
    /// entry leaves the version untouched.
    pub fn upsert(&self, backend: Backend) -> bool {
        let (mut added, mut changed) = (false, false);
        self.backends.rcu(|current| {
            let mut next = Vec::clone(current);
            match next.iter_mut().find(|b| same_identity(&b.url, &backend.url)) {
                Some(existing) => {
                    added = false;
                    changed = *existing != backend;
                    *existing = backend.clone();
                }
                None => {
                    next.push(backend.clone());
                    added = true;
                    changed = true;
                }
            }
            next
        });
        if changed {
            let message = if added { "backend added" } else { "backend updated" };
            self.bump(message, &backend.url);
        }
        added
    }

    /// Removes the backend with the same identity as `url`.
    ///
    /// Returns true when an entry was removed.
    pub fn remove(&self, url: &Url) -> bool {
        let mut removed = false;
        self.backends.rcu(|current| {
            let next: Vec<Backend> = current
                .iter()
                .filter(|b| !same_identity(&b.url, url))
                .cloned()
                .collect();
            removed = next.len() != current.len();
            next
        });
        if removed {
            self.bump("backend removed", url);
        }
        removed
    }

    /// Brings the pool in line with `backends`.
    ///
    /// Entries whose identity is missing from `backends` are removed, then
    /// every entry of `backends` is upserted in order. Returns the removed
    /// entries.
    pub fn sync(&self, backends: Vec<Backend>) -> Vec<Backend> {
        let stale: Vec<Backend> = self
            .snapshot()
            .iter()
            .filter(|current| !backends.iter().any(|b| same_identity(&b.url, &current.url)))
            .cloned()
            .collect();
        for backend in &stale {
            self.remove(&backend.url);
        }
        for backend in backends {
            self.upsert(backend);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.backends.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.load().is_empty()
    }

    /// Returns the mutation counter.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn bump(&self, message: &'static str, url: &Url) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(version, backend = %crate::affinity::normalize(url), "{}", message);
    }
}

impl Default for BackendPool {
    fn default() -> Self {
        Self::new()
    }
}
