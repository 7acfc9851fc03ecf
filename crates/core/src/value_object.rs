//! Value object trait: equality by value, not identity.

/// Marker trait for immutable values compared by their attributes.
///
/// `Command` and `TargetId` are value objects: once built they expose no
/// mutators, and two commands with the same attributes are the same command.
/// To "change" one, construct a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
