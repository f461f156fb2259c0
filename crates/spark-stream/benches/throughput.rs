use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use spark_stream::{
    BufferConfig, Scheduler, StreamBuffer, SupplierExt, bind,
    supplier::{self, concat},
};

const ITEMS: u64 = 10_000;

/// 单链路吞吐：迭代型供应方 → 列表 Sink。
///
/// # 设计目的（Why）
/// - 衡量基础状态机（直接交付路径）的单元素开销，作为其他组合子的对照基线。
///
/// # 执行逻辑（How）
/// - 每次迭代新建调度器，避免跨迭代的任务残留影响测量。
fn bench_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("direct");
    group.throughput(Throughput::Elements(ITEMS));
    group.bench_function("of_iter_to_list", |b| {
        b.iter(|| {
            let scheduler = Scheduler::new();
            let result = supplier::of_iter(&scheduler, 0..ITEMS).to_list().expect("绑定");
            black_box(scheduler.block_on(&result).expect("完成"));
        });
    });
    group.finish();
}

/// 组合子开销：按不同分块数拼接，并串接一个 `map` 转发器。
fn bench_concat_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("concat_map");
    group.throughput(Throughput::Elements(ITEMS));
    for parts in [1_u64, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(parts), &parts, |b, &parts| {
            b.iter(|| {
                let scheduler = Scheduler::new();
                let per_part = ITEMS / parts;
                let sources = (0..parts)
                    .map(|part| {
                        supplier::of_iter(&scheduler, part * per_part..(part + 1) * per_part)
                    })
                    .collect::<Vec<_>>();
                let result = concat(&scheduler, sources)
                    .expect("拼接")
                    .map(|value| value + 1)
                    .to_list()
                    .expect("绑定");
                black_box(scheduler.block_on(&result).expect("完成"));
            });
        });
    }
    group.finish();
}

/// 背压往返：高水位越小，挂起/恢复越频繁。
fn bench_bridge(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge_take");
    group.throughput(Throughput::Elements(ITEMS));
    for high_water_mark in [4_usize, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(high_water_mark),
            &high_water_mark,
            |b, &high_water_mark| {
                b.iter(|| {
                    let scheduler = Scheduler::new();
                    let buffer = StreamBuffer::new(
                        &scheduler,
                        &BufferConfig::with_high_water_mark(high_water_mark),
                    );
                    let source = supplier::of_iter(&scheduler, 0..ITEMS);
                    bind(&source, &buffer.consumer()).expect("绑定");
                    let mut sum = 0_u64;
                    while let Some(value) = scheduler.block_on(&buffer.take()).expect("取出") {
                        sum += value;
                    }
                    black_box(sum);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(stream_benches, bench_direct, bench_concat_map, bench_bridge);
criterion_main!(stream_benches);
