//! Scheduler / admission controller: the jittered tick loop, hour-of-day
//! gating, the health-check dedup ledger, and the notify decision.

pub mod admission;
pub mod service;

pub use admission::{HealthCheckLedger, Windows};
pub use service::Monitor;
