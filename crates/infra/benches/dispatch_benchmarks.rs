use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use commandrelay_core::{Command, CommandKind, TargetId};
use commandrelay_events::{encode_command, ChannelKey, InMemoryDurableQueue, InMemoryLiveChannel, LiveChannel};
use commandrelay_infra::dispatcher::{Dispatcher, DispatcherConfig};
use std::sync::Arc;

fn command(i: usize) -> Command {
    Command::new(
        CommandKind::Start,
        TargetId::parse(&format!("user{i}@example.com")).unwrap(),
        Utc::now(),
    )
    .with_reason(Some("benchmark"))
}

fn bench_encode(c: &mut Criterion) {
    let cmd = command(0);
    c.bench_function("encode_command", |b| b.iter(|| encode_command(black_box(&cmd)).unwrap()));
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    // Live path: one subscriber per target, drained in the background.
    let live = Arc::new(InMemoryLiveChannel::new());
    let dispatcher = Dispatcher::new(live.clone(), Arc::new(InMemoryDurableQueue::new()), DispatcherConfig::default());
    let cmd = command(1);
    let key = ChannelKey::for_target("commands", cmd.target());
    rt.block_on(async {
        let mut sub = live.subscribe(&key).await.unwrap();
        tokio::spawn(async move { while sub.recv().await.is_some() {} });
    });
    group.bench_with_input(BenchmarkId::new("send", "live"), &cmd, |b, cmd| {
        b.to_async(&rt).iter(|| async { black_box(dispatcher.send(cmd).await) })
    });

    // Fallback path: nobody subscribed.
    let fallback = Dispatcher::new(
        Arc::new(InMemoryLiveChannel::new()),
        Arc::new(InMemoryDurableQueue::new()),
        DispatcherConfig::default(),
    );
    let offline = command(2);
    group.bench_with_input(BenchmarkId::new("send", "durable_fallback"), &offline, |b, cmd| {
        b.to_async(&rt).iter(|| async { black_box(fallback.send(cmd).await) })
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_dispatch);
criterion_main!(benches);
