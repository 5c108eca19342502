//! # MeetBridge Gateway
//! Dashboard JSON API and a small status page.

pub mod dashboard;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, build_router_from_arc, start};
