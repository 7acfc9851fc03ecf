use std::sync::Arc;

use anyhow::Context;

use commandrelay_auth::RoleBasedAuthorizer;
use commandrelay_events::{
    ChannelKey, DurableQueue, DurableQueueConsumer, InMemoryDurableQueue, InMemoryLiveChannel, LiveChannel,
};
use commandrelay_infra::{
    AcknowledgmentService, Dispatcher, DispatcherConfig, InMemoryPendingCommandStore, InMemoryUserDirectory,
    IntakeService, IntakeWorker, IntakeWorkerConfig, IntakeWorkerHandle, IntakeWorkerStats, LiveChannelPresence,
    PendingCommandStore, Presence, RelayConfig, RetentionSweeper, SweeperHandle, UserDirectory,
};
use commandrelay_core::TargetId;

#[cfg(feature = "redis")]
use commandrelay_infra::{
    transport::{RedisLiveChannel, RedisPresence, RedisStreamsConfig, RedisStreamsQueue},
    PostgresPendingCommandStore, PostgresUserDirectory,
};
use sqlx::PgPool;

pub type CommandDispatcher = Dispatcher<Arc<dyn LiveChannel>, Arc<dyn DurableQueue>>;

/// Request-facing services shared by all handlers.
#[derive(Clone)]
pub struct AppServices {
    pub dispatcher: Arc<CommandDispatcher>,
    pub acknowledgments: AcknowledgmentService,
    pub live: Arc<dyn LiveChannel>,
}

impl AppServices {
    pub fn channel_key(&self, target: &TargetId) -> ChannelKey {
        self.dispatcher.channel_key(target)
    }
}

/// Concrete clients chosen at startup, erased to the traits the services consume.
struct Transports {
    live: Arc<dyn LiveChannel>,
    queue: Arc<dyn DurableQueue>,
    consumer: Arc<dyn DurableQueueConsumer>,
    store: Arc<dyn PendingCommandStore>,
    directory: Arc<dyn UserDirectory>,
    presence: Arc<dyn Presence>,
    pool: Option<PgPool>,
}

/// The running relay: HTTP-facing services plus the background workers they depend on.
pub struct Relay {
    services: Arc<AppServices>,
    intake: IntakeWorkerHandle,
    sweeper: SweeperHandle,
    pool: Option<PgPool>,
}

impl Relay {
    /// Build from config: Postgres + Redis when `use_persistent_stores`, in-memory otherwise.
    pub async fn start(config: &RelayConfig) -> anyhow::Result<Self> {
        if config.use_persistent_stores {
            #[cfg(feature = "redis")]
            {
                let transports = persistent_transports(config).await?;
                return Ok(Self::assemble(config, transports));
            }
            #[cfg(not(feature = "redis"))]
            {
                tracing::warn!(
                    "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
                );
            }
        }

        Ok(Self::in_memory(config))
    }

    /// Single-process wiring for dev and tests. Every target resolves.
    ///
    /// Must be called inside a tokio runtime; the workers are spawned immediately.
    pub fn in_memory(config: &RelayConfig) -> Self {
        let live = Arc::new(InMemoryLiveChannel::new());
        let queue = Arc::new(InMemoryDurableQueue::new());
        let presence = Arc::new(LiveChannelPresence::new(live.clone(), config.live_channel_prefix.clone()));

        let transports = Transports {
            live,
            queue: queue.clone(),
            consumer: queue,
            store: Arc::new(InMemoryPendingCommandStore::new()),
            directory: Arc::new(InMemoryUserDirectory::permissive()),
            presence,
            pool: None,
        };

        tracing::info!("relay wired with in-memory transports");
        Self::assemble(config, transports)
    }

    fn assemble(config: &RelayConfig, t: Transports) -> Self {
        let dispatcher = Dispatcher::new(
            t.live.clone(),
            t.queue,
            DispatcherConfig::default()
                .with_live_prefix(config.live_channel_prefix.clone())
                .with_live_timeout(config.live_timeout),
        );

        let authorizer = Arc::new(RoleBasedAuthorizer::new(config.elevated_roles.iter().cloned()));
        let acknowledgments = AcknowledgmentService::new(t.store.clone(), authorizer);

        let intake_service = IntakeService::new(
            t.directory,
            t.store.clone(),
            t.presence,
            t.live.clone(),
            config.live_channel_prefix.clone(),
            config.live_timeout,
        );
        let intake = IntakeWorker::spawn(
            t.consumer,
            intake_service,
            IntakeWorkerConfig::default()
                .with_max_concurrent(config.intake_workers)
                .with_max_deliveries(config.intake_max_deliveries),
        );

        let sweeper = RetentionSweeper::new(t.store, config.retention_policy()).spawn(config.retention_sweep_interval);

        Self {
            services: Arc::new(AppServices {
                dispatcher: Arc::new(dispatcher),
                acknowledgments,
                live: t.live,
            }),
            intake,
            sweeper,
            pool: t.pool,
        }
    }

    pub fn services(&self) -> Arc<AppServices> {
        self.services.clone()
    }

    pub fn intake_stats(&self) -> IntakeWorkerStats {
        self.intake.stats()
    }

    /// Stop the workers (in-flight intake finishes first), then close the pool.
    pub async fn shutdown(self) {
        self.intake.shutdown().await;
        self.sweeper.shutdown().await;
        if let Some(pool) = self.pool {
            pool.close().await;
        }
        tracing::info!("relay stopped");
    }
}

#[cfg(feature = "redis")]
async fn persistent_transports(config: &RelayConfig) -> anyhow::Result<Transports> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;

    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PostgresPendingCommandStore::new(pool.clone());
    store.migrate().await.context("failed to migrate pending_commands")?;

    let live = RedisLiveChannel::connect(&config.redis_url)
        .await
        .context("failed to connect Redis live channel")?;
    let presence = RedisPresence::new(live.connection(), config.live_channel_prefix.clone());

    // Own connections: the intake read blocks, the live channel must not wait on it.
    let queue = RedisStreamsQueue::connect(
        &config.redis_url,
        RedisStreamsConfig {
            stream_key: config.command_stream_key.clone(),
            dlq_key: config.command_dlq_key.clone(),
            group: config.intake_consumer_group.clone(),
            consumer: format!("intake-{}", uuid::Uuid::now_v7()),
            claim_idle: config.intake_claim_idle,
        },
    )
    .await
    .map(Arc::new)
    .context("failed to connect Redis command stream")?;
    queue
        .ensure_consumer_group()
        .await
        .context("failed to create intake consumer group")?;

    tracing::info!(
        stream = %config.command_stream_key,
        group = %config.intake_consumer_group,
        "relay wired with Postgres and Redis"
    );

    Ok(Transports {
        live: Arc::new(live),
        queue: queue.clone(),
        consumer: queue,
        store: Arc::new(store),
        directory: Arc::new(PostgresUserDirectory::new(pool.clone())),
        presence: Arc::new(presence),
        pool: Some(pool),
    })
}
