//! `binding_contract` 集成测试：验证一次性绑定、组合完成信号与终态语义。
//!
//! # 测试目标（Why）
//! - 绑定是所有组合子的唯一连接方式，重复绑定、跨 tick 绑定必须以协议违规快速失败；
//! - 组合完成信号必须等待两侧都完成，且失败时暴露的是最初的错误；
//! - 终态只进入一次，之后的关闭请求被忽略。
//!
//! # 结构安排（How）
//! - 基础场景：有限供应方 → 列表 Sink；
//! - 失败场景：推送一个元素后以错误终结；
//! - 协议违规：重复绑定、迟绑定；
//! - 合取与终态：手动确认的消费方、重复关闭；
//! - 运行计数：Sink 的计数与显式注册表。

use std::{cell::RefCell, rc::Rc};

use spark_stream::{
    BufferConfig, ConsumerRef, ProtocolViolation, Role, Scheduler, StatsRegistry, StreamError,
    StreamQueue, SupplierExt, SupplierRef, bind,
    base::{BaseConsumer, ConsumerBehavior, ConsumerCore},
    capability::Capabilities,
    consumer, supplier,
};

/// 收到 end-of-stream 后不自动确认的消费方，用于观察合取信号。
struct ManualAcknowledge;

impl ConsumerBehavior<u8> for ManualAcknowledge {
    fn accept(&self, _core: &ConsumerCore<u8>, _item: u8) {}

    fn on_end_of_stream(&self, _core: &ConsumerCore<u8>) {}
}

/// 有限序列经由列表 Sink 原样收集。
#[test]
fn finite_supplier_collects_into_list() {
    let scheduler = Scheduler::new();
    let result = supplier::of_values(&scheduler, vec![1, 2, 3])
        .to_list()
        .expect("绑定");
    assert_eq!(scheduler.block_on(&result), Ok(vec![1, 2, 3]));
}

/// 推送一个元素后失败：Sink 以同一错误失败，之后不再观察到元素。
///
/// # 步骤说明（How）
/// 1. 队列先推入 `1`，绑定到记录型消费方并运行调度器完成交付；
/// 2. 以业务错误关闭队列，组合完成信号以该错误失败；
/// 3. 终结后的 `add` 被拒绝，记录中仍只有 `1`。
#[test]
fn failure_after_first_item_rejects_sink() {
    let scheduler = Scheduler::new();
    let queue = StreamQueue::new(&scheduler, &BufferConfig::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = {
        let seen = Rc::clone(&seen);
        consumer::of_fn(&scheduler, move |value: u32| seen.borrow_mut().push(value))
    };
    let completion = bind(&queue.supplier(), &sink).expect("绑定");
    assert!(queue.add(1));
    scheduler.run().expect("运行调度器");

    let error = StreamError::failed("upstream.broken", "source failed");
    queue.close_with_error(error.clone());
    assert!(!queue.add(2));
    assert_eq!(scheduler.block_on(completion.completion()), Err(error.clone()));
    assert_eq!(completion.consumer_acknowledgement().error(), Some(error));
    assert_eq!(*seen.borrow(), vec![1]);
}

/// 供应方与消费方都只能绑定一次。
#[test]
fn double_binding_is_rejected() {
    let scheduler = Scheduler::new();
    let source = supplier::of_values(&scheduler, vec![1_u8]);
    let first: ConsumerRef<u8> = consumer::skip(&scheduler);
    let second: ConsumerRef<u8> = consumer::skip(&scheduler);
    bind(&source, &first).expect("首次绑定");

    let error = bind(&source, &second).expect_err("供应方重复绑定");
    assert!(matches!(
        error,
        StreamError::Protocol(ProtocolViolation::AlreadyBound {
            role: Role::Supplier,
            ..
        })
    ));

    let other = supplier::of_values(&scheduler, vec![2_u8]);
    let error = bind(&other, &first).expect_err("消费方重复绑定");
    assert!(matches!(
        error,
        StreamError::Protocol(ProtocolViolation::AlreadyBound {
            role: Role::Consumer,
            ..
        })
    ));
    assert!(error.is_protocol_violation());
}

/// 消费方拒绝绑定时供应方保持未绑定，之后仍能完整交付给另一个消费方。
#[test]
fn rejected_binding_leaves_supplier_unbound() {
    let scheduler = Scheduler::new();
    let taken: ConsumerRef<u32> = consumer::skip(&scheduler);
    bind(&supplier::of_value(&scheduler, 0_u32), &taken).expect("首次绑定");

    let source = supplier::of_iter(&scheduler, 1..4_u32);
    let error = bind(&source, &taken).expect_err("消费方已绑定");
    assert!(matches!(
        error,
        StreamError::Protocol(ProtocolViolation::AlreadyBound {
            role: Role::Consumer,
            ..
        })
    ));
    assert!(source.check_bindable().is_ok(), "失败的绑定不应改变供应方");

    let sink = consumer::to_list(&scheduler);
    let result = sink.behavior().result();
    let sink: ConsumerRef<u32> = sink;
    bind(&source, &sink).expect("重新绑定");
    assert_eq!(scheduler.block_on(&result), Ok(vec![1, 2, 3]));
}

/// 未声明 `LATE_BINDING` 的组件不能在创建 tick 之后绑定。
#[test]
fn binding_after_creation_tick_requires_capability() {
    let scheduler = Scheduler::new();
    let source = supplier::of_values(&scheduler, vec![1_u8]);
    let sink: ConsumerRef<u8> = consumer::skip(&scheduler);
    scheduler.post(|| {});
    scheduler.run().expect("推进 tick");

    let error = bind(&source, &sink).expect_err("跨 tick 绑定");
    match error {
        StreamError::Protocol(ProtocolViolation::LateBinding { created, bound, .. }) => {
            assert_eq!(created, 0);
            assert_eq!(bound, 1);
        }
        other => panic!("意外错误: {other:?}"),
    }
}

/// 组合完成信号等待两侧：end-of-stream 已完成而未确认时保持未完成。
#[test]
fn completion_waits_for_acknowledgement() {
    let scheduler = Scheduler::new();
    let source = supplier::closing::<u8>(&scheduler);
    let sink = BaseConsumer::new(
        &scheduler,
        "test.manual",
        Capabilities::EMPTY,
        ManualAcknowledge,
    );
    let consumer: ConsumerRef<u8> = sink.clone();
    let completion = bind(&source, &consumer).expect("绑定");
    scheduler.run().expect("运行调度器");

    assert_eq!(completion.supplier_end_of_stream().result(), Some(Ok(())));
    assert!(!completion.completion().is_complete());

    sink.core().acknowledge();
    assert_eq!(scheduler.block_on(completion.completion()), Ok(()));
}

/// 终态只进入一次：第二次关闭被忽略，最初的错误保持不变。
#[test]
fn terminal_transition_happens_once() {
    let scheduler = Scheduler::new();
    let source: SupplierRef<u8> = supplier::idle(&scheduler);
    let sink = consumer::to_list(&scheduler);
    let stats = Rc::clone(sink.core().stats());
    let result = source.stream_to_result(sink).expect("绑定").into_result();

    let first = StreamError::failed("test.first", "first");
    source.close_with_error(first.clone());
    source.close_with_error(StreamError::failed("test.second", "second"));
    source.close();

    assert_eq!(scheduler.block_on(&result), Err(first.clone()));
    assert_eq!(source.end_of_stream().error(), Some(first));
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.errors, 1);
    assert_eq!(snapshot.completed, 0);
}

/// Sink 的运行计数可经由显式注册表读取，组件销毁后自动剔除。
#[test]
fn stats_are_readable_through_registry() {
    let scheduler = Scheduler::new();
    let registry = StatsRegistry::new();
    let source = supplier::of_values(&scheduler, vec![1_u8, 2, 3]);
    let sink = consumer::to_list(&scheduler);
    registry.register("sink", sink.core().stats());
    let result = source.stream_to_result(Rc::clone(&sink)).expect("绑定");
    assert_eq!(scheduler.block_on(result.result()), Ok(vec![1, 2, 3]));
    scheduler.run().expect("排空");

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    let (name, stats) = &snapshot[0];
    assert_eq!(name, "sink");
    assert_eq!(stats.started, 1);
    assert_eq!(stats.items, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.errors, 0);

    drop(sink);
    drop(source);
    scheduler.run().expect("排空");
    assert!(registry.is_empty());
}
