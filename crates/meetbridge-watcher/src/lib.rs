//! # MeetBridge Watcher
//!
//! Turns rewrites of the meeting app's cache file into discrete
//! "new record" events.
//!
//! ```text
//! poll tick / trigger ──► change-detected ──(debounce)──► diffing
//!        ▲                                                   │
//!        └──────────────────────── idle ◄────────────────────┘
//!                                   │ read ─► sha256 ─► parse ─► upsert_if_new
//!                                   └─► WorkItem::Extract for every new id
//! ```

pub mod detector;
pub mod parser;

pub use detector::{ChangeDetector, DetectorReport, DetectorState, PassOutcome};
pub use parser::CacheParser;
