//! Dispatcher benchmark suite.
//!
//! Benchmarks event routing at different scales:
//! - Open ports: 1, 16, 256
//! - Concurrent port listings: 1, 16, 256
//!
//! Run with: cargo bench --bench dispatch
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use futures_util::future::join_all;
use serde_json::json;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use webserial_bridge::{
    BridgeOptions, Dispatcher, Event, InboundFrame, ModeOptions, PortDescriptor, PortFilter,
    PortFilters, PortId, SerialPort, filter_ports,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PORT_COUNTS: &[u32] = &[1, 16, 256];
const LISTING_COUNTS: &[usize] = &[1, 16, 256];

// ============================================================================
// Setup
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .try_init();
}

/// Opens `count` ports with ids `0..count`.
fn open_ports(count: u32) -> anyhow::Result<(Dispatcher, Vec<SerialPort>)> {
    let (dispatcher, _rx) = Dispatcher::channel(BridgeOptions::default());

    let ports = (0..count)
        .map(|id| {
            let path = format!("/dev/ttyUSB{id}");
            let port = dispatcher.port(&path, ModeOptions::new());
            drop(port.connect(|bytes| {
                black_box(bytes);
            }));
            dispatcher.dispatch(Event::PortOpen {
                device_path: path,
                id: PortId::new(id),
                data: serde_json::Value::Null,
            });
            port
        })
        .collect::<Vec<_>>();

    anyhow::ensure!(
        dispatcher.open_port_count() == count as usize,
        "expected {count} open ports, found {}",
        dispatcher.open_port_count()
    );

    Ok((dispatcher, ports))
}

fn descriptors(count: usize) -> Vec<PortDescriptor> {
    (0..count)
        .map(|i| {
            PortDescriptor::new()
                .with("path", format!("/dev/ttyUSB{i}"))
                .with("vendorId", if i % 4 == 0 { "0403" } else { "2341" })
        })
        .collect()
}

// ============================================================================
// Benchmark: Data Routing
// ============================================================================

fn bench_data_routing(c: &mut Criterion) {
    init_tracing();

    let mut group = c.benchmark_group("data_routing");

    for &count in PORT_COUNTS {
        let (dispatcher, _ports) = open_ports(count).expect("port setup");
        let frame = InboundFrame::trusted(
            "fromgws",
            json!({ "event": "data", "id": count - 1, "data": "SGVsbG8sIHNlcmlhbCE=" }),
        );

        group.bench_with_input(BenchmarkId::new("ports", count), &frame, |b, frame| {
            b.iter(|| dispatcher.on_inbound_message(black_box(frame)));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Listing Fan-out
// ============================================================================

fn bench_listing_fanout(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let ports = descriptors(32);

    let mut group = c.benchmark_group("listing_fanout");

    for &count in LISTING_COUNTS {
        group.bench_with_input(BenchmarkId::new("waiters", count), &count, |b, &waiters| {
            b.to_async(&rt).iter(|| async {
                let (dispatcher, _rx) = Dispatcher::channel(BridgeOptions::default());
                let replies = (0..waiters)
                    .map(|i| {
                        let filters = if i % 2 == 0 {
                            PortFilters::none()
                        } else {
                            PortFilter::new().with("vendorId", "0403").into()
                        };
                        dispatcher.request_ports(filters)
                    })
                    .collect::<Vec<_>>();

                dispatcher.dispatch(Event::SerialPorts {
                    data: Some(ports.clone()),
                });

                black_box(join_all(replies).await)
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Filter Matching
// ============================================================================

fn bench_filter_ports(c: &mut Criterion) {
    let ports = descriptors(256);
    let filters = PortFilters::from(vec![
        PortFilter::new().with("vendorId", "0403"),
        PortFilter::new().with("path", "/dev/ttyUSB128"),
    ]);

    c.bench_function("filter_ports/256", |b| {
        b.iter(|| filter_ports(black_box(&ports), black_box(&filters)));
    });
}

criterion_group!(
    benches,
    bench_data_routing,
    bench_listing_fanout,
    bench_filter_ports
);
criterion_main!(benches);
