//! # MeetBridge Store
//!
//! SQLite-backed record store. Every mutating operation is one
//! transaction, so a crash leaves each record either "not yet processed"
//! or "fully processed", and a concurrent reader never sees a half step.
//!
//! ## Tables
//! ```text
//! source_records   one row per external id (append-only)
//!   └── action_items   owned by a record, delivered one by one
//! retry_entries    at most one per (kind, target), ordered by next_eligible_at
//! ```

mod db;
mod items;
mod records;
mod recovery;
mod retries;
mod stats;

pub use db::RecordStore;
pub use recovery::RecoveryReport;
pub use stats::{ActivitySummary, StoreStats};
