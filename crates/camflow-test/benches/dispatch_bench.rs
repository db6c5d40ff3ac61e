//! Benchmarks for camflow dispatch: pool submission, bus fan-out, tracing

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use camflow_core::{Image, PriorityClass, Topic};
use camflow_runtime::{Bus, Dispatcher, PoolConfig, ReadyJob, WorkerPool};
use camflow_time::{CostModel, ManualClock, MonotonicClock};
use camflow_trace::{MemorySink, Tracer};
use rand::rngs::StdRng;
use rand::SeedableRng;

const BENCH_TOPIC: Topic<Image> = Topic::new("/bench");
const WAIT: Duration = Duration::from_secs(10);

fn bench_pool_submit_batch(c: &mut Criterion) {
    let pool = WorkerPool::new(PoolConfig {
        queue_capacity: 1 << 20,
        ..PoolConfig::single_worker()
    })
    .unwrap();

    c.bench_function("pool_submit_batch_2", |b| {
        b.iter(|| {
            let batch = vec![
                ReadyJob::new(PriorityClass::Default, "logger", || {}),
                ReadyJob::new(PriorityClass::High, "detector", || {}),
            ];
            // A full queue only means the worker fell behind
            let _ = pool.submit_batch(black_box(batch));
        });
        pool.wait_idle(WAIT);
    });
}

fn bench_bus_publish(c: &mut Criterion) {
    let pool = Arc::new(WorkerPool::new(PoolConfig::default()).unwrap());
    let bus = Bus::new(pool.clone());
    let _high = bus
        .subscribe(BENCH_TOPIC, PriorityClass::High, "high", |image: &Image| {
            black_box(image.published_at_monotonic_nanos);
            Ok(())
        })
        .unwrap();
    let _default = bus
        .subscribe(BENCH_TOPIC, PriorityClass::Default, "default", |image: &Image| {
            black_box(image.payload.len());
            Ok(())
        })
        .unwrap();

    c.bench_function("bus_publish_fanout_2", |b| {
        let mut t = 0i64;
        b.iter(|| {
            t += 1;
            bus.publish(BENCH_TOPIC, Image::stamped(t)).unwrap()
        });
        pool.wait_idle(WAIT);
    });
}

fn bench_tracer_scoped_span(c: &mut Criterion) {
    let sink = Arc::new(MemorySink::new());
    let mut tracer = Tracer::new("bench", Arc::new(MonotonicClock::new()), sink.clone());

    c.bench_function("tracer_scoped_span", |b| {
        b.iter_batched(
            || sink.drain(),
            |_| {
                let span = tracer.with_span("Work").unwrap();
                span.finish().unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_tracer_delay_record(c: &mut Criterion) {
    let sink = Arc::new(MemorySink::new());
    let clock = Arc::new(ManualClock::auto_advancing(1_000, Duration::from_nanos(10)));
    let mut tracer = Tracer::new("bench", clock, sink.clone());

    c.bench_function("tracer_delay_record", |b| {
        b.iter(|| tracer.record_delay("Delay", black_box(0)).unwrap());
        sink.drain();
    });
}

fn bench_cost_model_sample(c: &mut Criterion) {
    let model = CostModel::default();
    let mut rng = StdRng::seed_from_u64(42);

    c.bench_function("cost_model_sample", |b| {
        b.iter(|| black_box(model.sample(&mut rng)))
    });
}

criterion_group!(
    benches,
    bench_pool_submit_batch,
    bench_bus_publish,
    bench_tracer_scoped_span,
    bench_tracer_delay_record,
    bench_cost_model_sample,
);
criterion_main!(benches);
