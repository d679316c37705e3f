//! # NHM Core
//!
//! The core library of the Node Health Monitor, a long-running supervisor
//! on an embedded node. This crate provides the building blocks the daemon
//! wires together:
//!
//! - **Tracker**: currently failed applications and per-life-cycle failure
//!   statistics
//! - **Observer**: unit-state observation translating supervisor state
//!   transitions into application status events
//! - **Policy**: restart deny list and failed-app threshold
//! - **Prober**: periodic user-land liveness checks
//! - **Persistence**: shutdown flag and binary life-cycle history
//! - **Service**: the façade bundling the monitor state and the public
//!   operations
//!
//! External peers (the Node State Manager, the unit supervisor, probed
//! endpoints, the key-value store) are traits; transports live in the
//! daemon crate.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod nsm;
pub mod observer;
pub mod persistence;
pub mod policy;
pub mod prober;
pub mod service;
pub mod tracker;
pub mod types;

// Re-export commonly used types for easy access
pub use config::NhmConfig;
pub use error::{NhmError, NhmResult};
pub use observer::{UnitEvent, UnitObserver, UnitSupervisor};
pub use persistence::{FileKeyValueStore, KeyValueStore, Persistence};
pub use prober::{EndpointDialer, EndpointProbe, UserlandProber};
pub use service::{AppHealthEvent, HealthService, StatisticsReply};
pub use types::{AppErrorStatus, AppStatus, NodeShutdownState};
