//! Command transport mechanics.
//!
//! - `payload`: the JSON wire format shared by the live channel and the durable queue
//! - `live`: best-effort publish/subscribe channel to connected targets
//! - `durable`: at-least-once queue used as the delivery backstop
//! - `result`: the tagged outcome of a dispatch attempt
//!
//! In-memory implementations are provided for tests and single-process dev setups.

pub mod channel;
pub mod durable;
pub mod in_memory_live;
pub mod in_memory_queue;
pub mod live;
pub mod payload;
pub mod result;

pub use channel::{ChannelKey, DEFAULT_LIVE_PREFIX};
pub use durable::{DeadLetter, Delivery, DurableQueue, DurableQueueConsumer, DurableQueueError};
pub use in_memory_live::InMemoryLiveChannel;
pub use in_memory_queue::InMemoryDurableQueue;
pub use live::{LiveChannel, LiveChannelError, LiveSubscription};
pub use payload::{decode_command, encode_command, CommandPayload, PayloadError};
pub use result::{Channel, ErrorDetail, MessagingResult};
