//! # MeetBridge Scheduler
//!
//! Background loops that run beside the pipeline.
//!
//! ```text
//! Retry scheduler (tokio interval)
//!   ├── due_retries(now) oldest first
//!   ├── claim ─► RetryHandler (the pipeline) ─► success / next attempt / terminal
//!   └── terminal failures ─► Notifier
//!
//! Notifier (fire-and-forget)
//!   ├── history ring buffer (last 100)
//!   └── dispatch ─► Slack webhook / Discord webhook / HTTP webhook
//!
//! Daily summary (sleeps until HH:MM local)
//!   └── summary_since(now - 24h) ─► Notifier
//! ```

pub mod dispatch;
pub mod engine;
pub mod notify;
pub mod summary;

pub use dispatch::{NotifyTarget, targets_from_config};
pub use engine::{RetryHandler, RetryScheduler, TickReport, spawn_retry_scheduler};
pub use notify::{Notification, NotifyPriority, Notifier};
pub use summary::{next_run_after, spawn_daily_summary, summary_notification};
