//! HTTP proxying with session affinity.
//!
//! Provides the Pingora gateway that resolves affinity cookies against the
//! backend pool, plus the weighted round-robin fallback selector and passive
//! health tracking it relies on.

mod gateway;
mod upstream;

pub use gateway::{extract_sni, requires_tls, GatewayCtx, Selection, StickyGateway};
pub use upstream::{HealthStatus, HealthTracker, LoadBalancer};
