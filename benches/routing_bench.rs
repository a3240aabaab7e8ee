//! 路由性能基准测试
//! 使用内存存储与广播总线，测量本地投递与远端广播的路由开销

use std::sync::Arc;
use std::time::Duration;

use criterion::{Bencher, Criterion, criterion_group, criterion_main};
use futures::StreamExt;
use sse_cluster::ClusterConfig;
use sse_cluster::infrastructure::persistence::memory::{InMemoryKvStore, InMemoryMessageBus};
use sse_cluster::infrastructure::transport::MpscPushTransport;
use sse_cluster::service::wire::{ApplicationContext, initialize_with};
use sse_cluster::utils::SystemClock;
use std::hint::black_box;
use tokio::runtime::Runtime;

fn context(
    rt: &Runtime,
    store: Arc<InMemoryKvStore>,
    bus: Arc<InMemoryMessageBus>,
    node_id: &str,
) -> ApplicationContext {
    let mut config = ClusterConfig::default();
    config.node.id = node_id.to_string();
    let context = initialize_with(
        config,
        store,
        bus,
        Arc::new(MpscPushTransport::new(1024, Duration::from_secs(1))),
        Arc::new(SystemClock),
    );
    rt.block_on(async {
        context
            .health
            .heartbeat(node_id, "localhost", 8080)
            .await
            .unwrap();
    });
    context
}

fn bench_local_route(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(InMemoryKvStore::new(Arc::new(SystemClock)));
    let bus = Arc::new(InMemoryMessageBus::new());
    let node = context(&rt, store, bus, "node-a");

    let mut handle = rt.block_on(node.service.connect("bench-user")).unwrap();
    // 持续消费客户端事件，避免通道写满
    rt.spawn(async move { while handle.events.next().await.is_some() {} });

    c.bench_function("route_local", |b: &mut Bencher| {
        b.iter(|| {
            rt.block_on(async {
                node.service
                    .send(black_box("bench-user"), Some("notice"), "payload")
                    .await
                    .unwrap();
            });
        })
    });
}

fn bench_remote_route(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(InMemoryKvStore::new(Arc::new(SystemClock)));
    let bus = Arc::new(InMemoryMessageBus::new());
    let node_a = context(&rt, store.clone(), bus.clone(), "node-a");
    let node_b = context(&rt, store, bus, "node-b");

    rt.block_on(node_b.presence.register("remote-user", "node-b"))
        .unwrap();

    c.bench_function("route_remote", |b: &mut Bencher| {
        b.iter(|| {
            rt.block_on(async {
                node_a
                    .service
                    .send(black_box("remote-user"), None, "payload")
                    .await
                    .unwrap();
            });
        })
    });
}

criterion_group!(benches, bench_local_route, bench_remote_route);
criterion_main!(benches);
