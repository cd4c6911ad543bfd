//! Station health endpoint
//!
//! - `/health` - liveness plus station and failover status; the paired
//!   station probes this
//! - `/metrics` - counter snapshot

mod routes;
mod server;

pub use routes::{health_routes, HealthResponse, HealthState, PeerStatus};
pub use server::HealthServer;
