//! # MeetBridge Core
//!
//! Shared building blocks for every MeetBridge crate: configuration,
//! the error taxonomy, domain types, the retry policy, the clock, and the
//! collaborator traits the pipeline is written against.

pub mod clock;
pub mod config;
pub mod error;
pub mod policy;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use policy::RetryPolicy;
