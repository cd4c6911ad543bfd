//! Failover coordination
//!
//! While the paired peer is down this station covers the peer's stage(s)
//! as well as its own. Taps are spread across the active stages by a
//! deterministic function of the token's tap number.

mod manager;
mod state;

pub use manager::{FailoverCallback, FailoverManager};
pub use state::FailoverState;
