//! Peer health monitoring
//!
//! Polls the paired station's `/health` endpoint and reports edge-triggered
//! Down/Recovered transitions. The station wires those to the failover
//! manager.

mod config;
mod monitor;
mod probe;

pub use config::PeerConfig;
pub use monitor::{PeerCallback, PeerHealthState, PeerMonitor, PeerMonitorBuilder, PeerTransition};
pub use probe::{HealthProbe, HttpHealthProbe, PeerError};
