use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};

use edgeio::queue::IoQueue;

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("io queue");

    group.measurement_time(Duration::from_secs(10));

    group.bench_function("create/transit/pop", |b| {
        let queue = IoQueue::new("bench");

        b.iter(|| {
            let buffer = queue.create_buffer(Some(b"telemetry"), 64).unwrap();
            buffer.set_ready();

            let buffer = queue.pop_ready().unwrap();
            buffer.set_inprogress();

            let buffer = queue.pop_inprogress().unwrap();
            buffer.set_done();

            queue.pop_done().unwrap().release();
        });
    });

    group.bench_function("rollback(32)", |b| {
        let queue = IoQueue::new("bench");

        b.iter(|| {
            for _ in 0..32 {
                queue.create_buffer(Some(b"x"), 1).unwrap().set_ready();
            }
            while let Some(buffer) = queue.pop_ready() {
                buffer.set_inprogress();
            }
            queue.rollback();
            while let Some(buffer) = queue.pop_ready() {
                buffer.release();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
