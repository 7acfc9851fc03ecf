//! Durable store of commands awaiting acknowledgment.
//!
//! Rows are append-only and keyed by a generated id, never by target, so
//! concurrent intake invocations for one target cannot conflict. The only
//! update is the one-time `acknowledged_at` transition.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryPendingCommandStore;
pub use postgres::PostgresPendingCommandStore;
pub use r#trait::{PendingCommandStore, PendingStoreError, PurgeCutoffs, PurgeReport, RetentionPolicy};
