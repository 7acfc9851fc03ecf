//! Infrastructure layer: dispatch, intake, acknowledgment, storage, transports.

pub mod acknowledgment;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod intake;
pub mod pending_store;
pub mod presence;
pub mod transport;
pub mod workers;

mod integration_tests;

pub use acknowledgment::{AcknowledgeError, AcknowledgeResult, AcknowledgmentService};
pub use config::{ConfigError, RelayConfig};
pub use directory::{DirectoryError, InMemoryUserDirectory, PostgresUserDirectory, User, UserDirectory};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use intake::{IntakeError, IntakeReceipt, IntakeService};
pub use pending_store::{
    InMemoryPendingCommandStore, PendingCommandStore, PendingStoreError, PostgresPendingCommandStore,
    PurgeCutoffs, PurgeReport, RetentionPolicy,
};
pub use presence::{LiveChannelPresence, Presence, PresenceError, StaticPresence};
pub use workers::{IntakeWorker, IntakeWorkerConfig, IntakeWorkerHandle, IntakeWorkerStats, RetentionSweeper, SweeperHandle};
