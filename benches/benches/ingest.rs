use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use midi_receiver::{MidiReceiver, ReceiverConfig, VirtualDriver};

fn ingest_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("receiver");
    group.measurement_time(Duration::from_secs(10));

    let driver = VirtualDriver::new();
    driver.add_source(1, "Bench");
    let receiver = MidiReceiver::new(driver.clone(), ReceiverConfig::default()).expect("receiver");
    assert_eq!(receiver.count_sources(), 1);

    let packets: Vec<[u8; 3]> = (0..256u32).map(|i| [0x90, (i % 128) as u8, 0x40]).collect();
    let batch: Vec<&[u8]> = packets.iter().map(|p| p.as_slice()).collect();

    group.bench_function("deliver_256_then_dequeue", |b| {
        b.iter(|| {
            driver.send(1, &batch);
            while receiver.dequeue() != 0 {}
        });
    });

    group.bench_function("deliver_256_then_drain_into", |b| {
        b.iter_batched(
            || Vec::with_capacity(256),
            |mut out| {
                driver.send(1, &batch);
                receiver.drain_into(&mut out);
                out
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, ingest_and_drain);
criterion_main!(benches);
