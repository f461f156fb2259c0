//! 流契约性质验证
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：以随机输入验证三条跨组件性质：
//!   1. 拼接保持顺序：任意分块经拼接后，下游观察到的序列等于分块按序连接；
//!   2. 挂起之后不交付：消费方在 `accept` 中挂起自身后，直到再次恢复前不会再收到元素；
//!   3. 桥接缓冲有界：立即挂起的上游经由推 → 拉缓冲时，缓冲长度不超过高水位加一。
//! - **设计手法 (How)**：使用 Proptest 生成分块、批大小与挂起间隔，测试驱动调度器直到完成，
//!   挂起的消费方由驱动循环显式恢复。
//!
//! # 合同与边界 (What)
//!
//! - 每个用例新建独立调度器，互不共享状态；
//! - 驱动循环设有轮次上限，超限即视为活锁并使性质失败。

use std::{cell::RefCell, rc::Rc};

use proptest::prelude::*;
use spark_stream::{
    BufferConfig, ConsumerRef, Scheduler, SchedulerConfig, StreamBuffer, SupplierExt, SupplierRef,
    bind,
    base::{BaseConsumer, ConsumerBehavior, ConsumerCore},
    capability::Capabilities,
    supplier::{self, concat},
};

const MAX_ROUNDS: usize = 10_000;

/// 记录交付并按间隔挂起自身的消费方。
struct Recorder {
    seen: Rc<RefCell<Vec<u32>>>,
    violations: Rc<RefCell<usize>>,
    pause_every: usize,
}

impl ConsumerBehavior<u32> for Recorder {
    fn accept(&self, core: &ConsumerCore<u32>, item: u32) {
        if core.is_suspended() {
            *self.violations.borrow_mut() += 1;
        }
        let len = {
            let mut seen = self.seen.borrow_mut();
            seen.push(item);
            seen.len()
        };
        if len % self.pause_every == 0 {
            core.suspend();
        }
    }
}

fn chunks() -> impl Strategy<Value = Vec<Vec<u32>>> {
    prop::collection::vec(prop::collection::vec(any::<u32>(), 0..12), 0..6)
}

fn scheduler_with_batch(produce_batch: usize) -> Scheduler {
    Scheduler::with_config(SchedulerConfig {
        produce_batch,
        ..SchedulerConfig::default()
    })
    .expect("合法配置")
}

fn sources(scheduler: &Scheduler, chunks: &[Vec<u32>]) -> Vec<SupplierRef<u32>> {
    chunks
        .iter()
        .map(|chunk| supplier::of_values(scheduler, chunk.clone()))
        .collect()
}

proptest! {
    #[test]
    fn prop_concat_preserves_order(chunks in chunks(), produce_batch in 1usize..8) {
        let scheduler = scheduler_with_batch(produce_batch);
        let joined = concat(&scheduler, sources(&scheduler, &chunks)).expect("拼接");
        let result = joined.to_list().expect("绑定");
        let expected: Vec<u32> = chunks.iter().flatten().copied().collect();
        prop_assert_eq!(scheduler.block_on(&result), Ok(expected));
    }

    #[test]
    fn prop_no_items_after_suspend(
        chunks in chunks(),
        pause_every in 1usize..5,
        produce_batch in 1usize..8,
    ) {
        let scheduler = scheduler_with_batch(produce_batch);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let violations = Rc::new(RefCell::new(0));
        let sink = BaseConsumer::new(
            &scheduler,
            "test.recorder",
            Capabilities::EMPTY,
            Recorder {
                seen: Rc::clone(&seen),
                violations: Rc::clone(&violations),
                pause_every,
            },
        );
        let joined = concat(&scheduler, sources(&scheduler, &chunks))
            .expect("拼接")
            .map(|value| value);
        let consumer: ConsumerRef<u32> = sink.clone();
        let completion = bind(&joined, &consumer).expect("绑定");

        let mut rounds = 0;
        while !completion.completion().is_complete() {
            rounds += 1;
            prop_assert!(rounds < MAX_ROUNDS, "驱动轮次超限");
            scheduler.run().expect("运行调度器");
            if sink.core().is_suspended() {
                sink.core().resume();
            }
        }

        let expected: Vec<u32> = chunks.iter().flatten().copied().collect();
        prop_assert_eq!(completion.completion().result(), Some(Ok(())));
        prop_assert_eq!(*violations.borrow(), 0);
        prop_assert_eq!(&*seen.borrow(), &expected);
    }

    #[test]
    fn prop_bridge_buffer_is_bounded(len in 0u32..200, high_water_mark in 1usize..16) {
        let scheduler = Scheduler::new();
        let config = BufferConfig::with_high_water_mark(high_water_mark);
        let buffer = StreamBuffer::new(&scheduler, &config);
        let source = supplier::of_iter(&scheduler, 0..len);
        bind(&source, &buffer.consumer()).expect("绑定");

        let mut drained = Vec::new();
        loop {
            let next = buffer.take();
            let item = scheduler.block_on(&next).expect("取出");
            prop_assert!(buffer.len() <= high_water_mark + 1);
            match item {
                Some(value) => drained.push(value),
                None => break,
            }
        }
        prop_assert_eq!(drained, (0..len).collect::<Vec<_>>());
    }
}
