//! Identity-bearing records.

/// A record whose identity survives state transitions.
///
/// `PendingCommand` is the only entity in this crate: its `acknowledged_at`
/// changes once, its id never does.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    fn id(&self) -> &Self::Id;
}
