//! Integration tests for the full delivery pipeline over in-memory transports.
//!
//! Tests: Dispatcher → DurableQueue → IntakeWorker → PendingStore → Acknowledgment
//!
//! Verifies:
//! - Accepted commands always leave a pending row (at-least-once)
//! - Acknowledgment is idempotent and tolerates unknown ids
//! - Poison messages are dead-lettered, transient failures are redelivered

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use commandrelay_auth::{Principal, Role, RoleBasedAuthorizer};
    use commandrelay_core::{Command, CommandKind, Entity, PendingCommandId, TargetId};
    use commandrelay_events::{
        decode_command, Channel, DurableQueue, InMemoryDurableQueue, InMemoryLiveChannel, LiveChannel,
    };

    use crate::acknowledgment::AcknowledgmentService;
    use crate::directory::InMemoryUserDirectory;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::intake::IntakeService;
    use crate::pending_store::{InMemoryPendingCommandStore, PendingCommandStore};
    use crate::presence::LiveChannelPresence;
    use crate::workers::{IntakeWorker, IntakeWorkerConfig, IntakeWorkerHandle};

    const PREFIX: &str = "commands";

    struct Pipeline {
        live: Arc<InMemoryLiveChannel>,
        queue: Arc<InMemoryDurableQueue>,
        directory: Arc<InMemoryUserDirectory>,
        store: Arc<InMemoryPendingCommandStore>,
        dispatcher: Dispatcher<Arc<InMemoryLiveChannel>, Arc<InMemoryDurableQueue>>,
        intake: IntakeService,
        acks: AcknowledgmentService,
    }

    fn target(raw: &str) -> TargetId {
        TargetId::parse(raw).unwrap()
    }

    fn setup_with_queue(queue: InMemoryDurableQueue) -> Pipeline {
        commandrelay_observability::init_for_tests();

        let live = Arc::new(InMemoryLiveChannel::new());
        let queue = Arc::new(queue);
        let directory = Arc::new(InMemoryUserDirectory::new());
        let store = Arc::new(InMemoryPendingCommandStore::new());
        let presence = Arc::new(LiveChannelPresence::new(live.clone(), PREFIX));

        let dispatcher = Dispatcher::new(
            live.clone(),
            queue.clone(),
            DispatcherConfig::default()
                .with_live_prefix(PREFIX)
                .with_live_timeout(Duration::from_millis(200)),
        );
        let intake = IntakeService::new(
            directory.clone(),
            store.clone(),
            presence,
            live.clone(),
            PREFIX,
            Duration::from_millis(200),
        );
        let acks = AcknowledgmentService::new(store.clone(), Arc::new(RoleBasedAuthorizer::default()));

        Pipeline {
            live,
            queue,
            directory,
            store,
            dispatcher,
            intake,
            acks,
        }
    }

    fn setup() -> Pipeline {
        setup_with_queue(InMemoryDurableQueue::new())
    }

    fn spawn_worker(p: &Pipeline, max_deliveries: u64) -> IntakeWorkerHandle {
        IntakeWorker::spawn(
            p.queue.clone(),
            p.intake.clone(),
            IntakeWorkerConfig::default()
                .with_name("test-intake")
                .with_block(Duration::from_millis(20))
                .with_max_deliveries(max_deliveries),
        )
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn offline_target_scenario_start_to_acknowledgment() {
        let p = setup();
        p.directory.register(target("pso@x.com"));

        let raw = r#"{"employeeEmail":"pso@x.com","command":"START","timestamp":"2024-01-01T00:00:00Z"}"#;
        let receipt = p.intake.on_message(raw).await.unwrap();
        assert!(receipt.resend.is_none());

        let rows = p.store.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind(), CommandKind::Start);
        assert!(rows[0].acknowledged_at().is_none());

        let owner = Principal::new(target("pso@x.com"), vec![Role::EMPLOYEE]);
        let ids = [receipt.pending_id.to_string()];
        let result = p.acks.acknowledge(&ids, &owner).await.unwrap();

        assert_eq!(result.updated_count, 1);
        assert!(p.store.get(&receipt.pending_id).unwrap().acknowledged_at().is_some());
    }

    #[tokio::test]
    async fn dispatch_fallback_flows_through_worker_into_store() {
        let p = setup();
        p.directory.register(target("pso@x.com"));
        let worker = spawn_worker(&p, 5);

        let cmd = Command::new(CommandKind::Stop, target("PSO@x.com"), Utc::now())
            .with_reason(Some("camera left on"))
            .with_initiator(Some("boss@x.com"));
        let result = p.dispatcher.send(&cmd).await;
        assert_eq!(result.channel(), Channel::DurableQueue);
        assert!(result.success());

        let store = p.store.clone();
        assert!(wait_until(|| !store.all().is_empty()).await);
        assert!(p.store.has_pending(&target("pso@x.com")).await.unwrap());
        assert!(wait_until(|| p.queue.outstanding() == 0).await);

        let row = &p.store.all()[0];
        let replayed = decode_command(row.payload()).unwrap();
        assert_eq!(replayed.reason(), Some("camera left on"));
        assert_eq!(replayed.initiator(), Some("boss@x.com"));

        assert!(wait_until(|| worker.stats().succeeded == 1).await);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn reconnecting_target_gets_live_resend_and_keeps_pending_row() {
        let p = setup();
        p.directory.register(target("pso@x.com"));

        let key = p.dispatcher.channel_key(&target("pso@x.com"));
        let mut sub = p.live.subscribe(&key).await.unwrap();

        // Enqueued while the target was away; intake runs after it reconnects.
        let cmd = Command::new(CommandKind::Start, target("pso@x.com"), Utc::now());
        let payload = commandrelay_events::encode_command(&cmd).unwrap();
        p.queue.enqueue(cmd.target(), &payload).await.unwrap();

        let worker = spawn_worker(&p, 5);
        let received = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decode_command(&received).unwrap().kind(), CommandKind::Start);
        assert!(p.store.has_pending(&target("pso@x.com")).await.unwrap());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn poison_message_is_dead_lettered_and_acked() {
        let p = setup();
        let worker = spawn_worker(&p, 5);

        p.queue.enqueue(&target("pso@x.com"), "{not json").await.unwrap();

        assert!(wait_until(|| worker.stats().dead_lettered == 1).await);
        assert_eq!(p.queue.dead_letters().len(), 1);
        assert_eq!(p.queue.outstanding(), 0);
        assert!(p.store.all().is_empty());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_target_is_redelivered_then_dead_lettered() {
        let p = setup_with_queue(InMemoryDurableQueue::with_visibility_timeout(Duration::from_millis(10)));
        let worker = spawn_worker(&p, 3);

        let cmd = Command::new(CommandKind::Start, target("ghost@x.com"), Utc::now());
        let payload = commandrelay_events::encode_command(&cmd).unwrap();
        p.queue.enqueue(cmd.target(), &payload).await.unwrap();

        assert!(wait_until(|| worker.stats().dead_lettered == 1).await);
        let dead = &p.queue.dead_letters()[0];
        assert_eq!(dead.delivery_count, 3);
        assert!(p.store.all().is_empty());
        assert_eq!(worker.stats().retried, 2);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn directory_sync_lag_recovers_on_redelivery() {
        let p = setup_with_queue(InMemoryDurableQueue::with_visibility_timeout(Duration::from_millis(30)));
        let worker = spawn_worker(&p, 10);

        let cmd = Command::new(CommandKind::Start, target("late@x.com"), Utc::now());
        let payload = commandrelay_events::encode_command(&cmd).unwrap();
        p.queue.enqueue(cmd.target(), &payload).await.unwrap();

        assert!(wait_until(|| worker.stats().retried >= 1).await);
        p.directory.register(target("late@x.com"));

        assert!(wait_until(|| p.store.all().len() == 1).await);
        assert!(p.queue.dead_letters().is_empty());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn batch_acknowledgment_with_unknown_id_counts_matches_only() {
        let p = setup();
        p.directory.register(target("pso@x.com"));
        let raw = r#"{"employeeEmail":"pso@x.com","command":"STOP","timestamp":"2024-01-01T00:00:00Z"}"#;
        let first = p.intake.on_message(raw).await.unwrap();
        let second = p.intake.on_message(raw).await.unwrap();

        let owner = Principal::new(target("pso@x.com"), vec![]);
        let batch = [first.pending_id.to_string(), PendingCommandId::new().to_string()];
        assert_eq!(p.acks.acknowledge(&batch, &owner).await.unwrap().updated_count, 1);
        assert_eq!(p.acks.acknowledge(&batch, &owner).await.unwrap().updated_count, 0);

        let still_pending = p.store.list_pending(&target("pso@x.com"), 10).await.unwrap();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(*still_pending[0].id(), second.pending_id);
    }

    #[tokio::test]
    async fn concurrent_intake_for_one_target_keeps_every_row() {
        let p = setup();
        p.directory.register(target("pso@x.com"));
        let raw = r#"{"employeeEmail":"pso@x.com","command":"START","timestamp":"2024-01-01T00:00:00Z"}"#;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let intake = p.intake.clone();
            handles.push(tokio::spawn(async move { intake.on_message(raw).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(p.store.list_pending(&target("pso@x.com"), 100).await.unwrap().len(), 16);
    }
}
