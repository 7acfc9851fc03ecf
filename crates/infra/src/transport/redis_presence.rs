//! Presence derived from Redis pub/sub subscriber counts.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use commandrelay_core::TargetId;
use commandrelay_events::ChannelKey;

use crate::presence::{Presence, PresenceError};

/// A target is online while at least one client is subscribed to its channel.
#[derive(Clone)]
pub struct RedisPresence {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisPresence {
    pub fn new(conn: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Presence for RedisPresence {
    async fn is_online(&self, target: &TargetId) -> Result<bool, PresenceError> {
        let key = ChannelKey::for_target(&self.prefix, target);
        let mut conn = self.conn.clone();

        // Reply is a flat [channel, count, ...] list.
        let counts: HashMap<String, i64> = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| PresenceError::Lookup(format!("PUBSUB NUMSUB failed: {}", e)))?;

        Ok(counts.get(key.as_str()).is_some_and(|n| *n > 0))
    }
}
