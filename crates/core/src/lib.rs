//! `commandrelay-core`: domain building blocks for command delivery.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the immutable `Command` value object, the normalized `TargetId` routing
//! identity and the durable `PendingCommand` record.

pub mod command;
pub mod entity;
pub mod error;
pub mod id;
pub mod pending;
pub mod target;
pub mod value_object;

pub use command::{Command, CommandKind};
pub use entity::Entity;
pub use error::DomainError;
pub use id::{PendingCommandId, UserId};
pub use pending::PendingCommand;
pub use target::TargetId;
pub use value_object::ValueObject;
