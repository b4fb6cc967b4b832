//! Pingora-based reverse proxy with cookie session affinity.
//!
//! Requests carrying an affinity cookie are routed back to the backend that
//! served them before, as long as it is still in the pool. Every response is
//! stamped with a token identifying the backend that actually served it, so
//! clients bound to a removed backend are rebound on their next request.

pub mod affinity;
pub mod config;
pub mod health;
pub mod proxy;
pub mod store;
