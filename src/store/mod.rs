//! Backend storage for the proxy.
//!
//! Holds the operator-managed backend pool. Request handling only ever sees
//! immutable snapshots of it.

mod backend_pool;

pub use backend_pool::{literal_address, Backend, BackendPool};
