//! Infrastructure-backed transports.
//!
//! The transport traits live in `commandrelay-events` as pure mechanics. This
//! module provides the Redis implementations: pub/sub for the live channel,
//! Streams for the durable queue, and `PUBSUB NUMSUB` for presence.

#[cfg(feature = "redis")]
pub mod redis_presence;
#[cfg(feature = "redis")]
pub mod redis_pubsub;
#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_presence::RedisPresence;
#[cfg(feature = "redis")]
pub use redis_pubsub::RedisLiveChannel;
#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsConfig, RedisStreamsQueue};
