//! HTTP API: command submission, pending retrieval, acknowledgment and the
//! live stream for connected targets.

pub mod app;
pub mod context;
pub mod middleware;
