use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use tokio::sync::mpsc;

use vetrelay::signaling::{AdmissionPolicy, ClientEvent, Relay, RoomKey};

const OFFER_FRAME: &str = r#"{"event":"offer","data":{"target":"conn_0123456789abcdef","offer":{"type":"offer","sdp":"v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"}}}"#;

/// frame decoding benchmark
fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parsing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ClientEvent::offer", |b| {
        b.iter(|| {
            let event = ClientEvent::parse(black_box(OFFER_FRAME)).unwrap();
            black_box(event)
        })
    });

    group.finish();
}

/// point-to-point forward benchmark
fn bench_forward(c: &mut Criterion) {
    let mut relay = Relay::new(AdmissionPolicy::allow_list(["consultation"]));
    let (tx_a, _rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let a = relay.connect(tx_a);
    let b = relay.connect(tx_b);
    relay
        .handle(a, ClientEvent::JoinRoom(RoomKey::from("consultation")))
        .unwrap();
    relay
        .handle(b, ClientEvent::JoinRoom(RoomKey::from("consultation")))
        .unwrap();
    while rx_b.try_recv().is_ok() {}

    let mut group = c.benchmark_group("Forward");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ice_candidate", |bench| {
        bench.iter(|| {
            relay
                .handle(
                    a,
                    ClientEvent::IceCandidate {
                        target: b,
                        candidate: json!({"candidate": "candidate:0 1 UDP 2122252543 10.0.0.2 50000 typ host"}),
                    },
                )
                .unwrap();
            black_box(rx_b.try_recv().unwrap());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_forward);
criterion_main!(benches);
