use canvas_relay::broadcast::BroadcastEngine;
use canvas_relay::history::EventLog;
use canvas_relay::protocol::{classify, Payload};
use canvas_relay::registry::{ConnectionRegistry, Outbound};
use criterion::{criterion_group, criterion_main, Criterion};
use futures::channel::mpsc;
use futures::SinkExt;
use std::hint::black_box;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const DRAW: &str = r##"{"type":"draw","lastX":10,"lastY":12,"x":14,"y":18,"color":"#ff0000","size":"4"}"##;

fn channel_connection() -> (Outbound, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded();
    (Box::pin(tx.sink_map_err(|_| WsError::ConnectionClosed)), rx)
}

fn bench_classify(c: &mut Criterion) {
    c.bench_function("classify_draw", |b| {
        b.iter(|| black_box(classify(black_box(DRAW)).unwrap()))
    });
}

fn bench_history_append_snapshot(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let payload: Payload = DRAW.to_string().into();

    c.bench_function("history_append_1000_then_snapshot", |b| {
        b.iter(|| {
            rt.block_on(async {
                let log = EventLog::new();
                for _ in 0..1000 {
                    log.append(payload.clone()).await;
                }
                black_box(log.snapshot().await.len());
            })
        })
    });
}

fn bench_broadcast_100_peers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let payload: Payload = DRAW.to_string().into();

    c.bench_function("broadcast_100_msgs_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let registry = Arc::new(ConnectionRegistry::new());
                let engine = BroadcastEngine::new(registry.clone());

                let mut receivers = Vec::new();
                let mut memberships = Vec::new();
                for _ in 0..100 {
                    let (sink, rx) = channel_connection();
                    let (_, membership) = registry.register(sink, None).await;
                    receivers.push(rx);
                    memberships.push(membership);
                }

                for _ in 0..100 {
                    black_box(engine.broadcast(&payload, None).await);
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_classify,
    bench_history_append_snapshot,
    bench_broadcast_100_peers,
);
criterion_main!(benches);
