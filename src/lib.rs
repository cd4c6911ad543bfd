//! tapstation - event consistency store and peer failover core for NFC
//! check-in stations
//!
//! A station records participant taps at the stages of a service workflow.
//! Two stations can pair up: each watches the other's health endpoint and
//! takes over its stage while it is down.

pub mod cli;
pub mod clock;
pub mod config;
pub mod failover;
pub mod health_server;
pub mod observability;
pub mod peer;
pub mod store;
pub mod tap;
pub mod workflow;
