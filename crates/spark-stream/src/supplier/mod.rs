//! 叶子供应方与拼接组合子。
//!
//! # 教案式说明
//! - **意图 (Why)**：为常见数据源提供开箱即用的构造函数，覆盖“有限序列”“永不产出”“立即结束/失败”
//!   “异步得到的供应方”等测试与组合场景。
//! - **契约 (What)**：
//!   - 叶子供应方声明 `IMMEDIATE_SUSPEND`，不声明 `LATE_BINDING`：必须在创建所在 tick 内完成绑定；
//!   - 迭代型供应方单次 `produce` 最多推送 [`SchedulerConfig::produce_batch`](crate::config::SchedulerConfig) 个元素，
//!     然后让出调度器；
//!   - [`of_promise`] 返回迟绑定的转发器输出，Promise 失败即以同一错误终结。

mod concat;

pub use concat::{Concat, concat};

use std::{cell::RefCell, iter};

use crate::{
    base::{BaseSupplier, SupplierBehavior, SupplierCore},
    capability::{Capabilities, Capability},
    contract::{ConsumerRef, SupplierRef, bind},
    error::StreamError,
    forwarder::Forwarder,
    promise::Promise,
    scheduler::Scheduler,
};

const LEAF: Capabilities = Capabilities::of(Capability::ImmediateSuspend);

/// 迭代器驱动的供应方行为。
pub struct OfIterator<I> {
    iter: RefCell<I>,
}

impl<I> SupplierBehavior<I::Item> for OfIterator<I>
where
    I: Iterator + 'static,
    I::Item: 'static,
{
    fn produce(&self, core: &SupplierCore<I::Item>) {
        let mut budget = core.scheduler().config().produce_batch;
        while core.is_ready() {
            if budget == 0 {
                core.request_produce();
                return;
            }
            budget -= 1;
            let next = self.iter.borrow_mut().next();
            match next {
                Some(item) => core.send(item),
                None => {
                    core.send_end_of_stream();
                    return;
                }
            }
        }
    }
}

/// 依次推送迭代器中的元素，耗尽后 end-of-stream。
pub fn of_iter<I>(scheduler: &Scheduler, items: I) -> SupplierRef<I::Item>
where
    I: IntoIterator,
    I::IntoIter: 'static,
    I::Item: 'static,
{
    BaseSupplier::new(
        scheduler,
        "supplier.of_iter",
        LEAF,
        OfIterator {
            iter: RefCell::new(items.into_iter()),
        },
    )
}

/// 推送给定的若干元素。
pub fn of_values<T: 'static>(scheduler: &Scheduler, values: Vec<T>) -> SupplierRef<T> {
    of_iter(scheduler, values)
}

/// 推送单个元素。
pub fn of_value<T: 'static>(scheduler: &Scheduler, value: T) -> SupplierRef<T> {
    of_iter(scheduler, iter::once(value))
}

/// 反复调用生成函数，返回 `None` 时 end-of-stream。
pub fn of_fn<T: 'static>(
    scheduler: &Scheduler,
    generate: impl FnMut() -> Option<T> + 'static,
) -> SupplierRef<T> {
    of_iter(scheduler, iter::from_fn(generate))
}

/// 永不产出、也不会自行结束的供应方。
pub struct Idle;

impl<T: 'static> SupplierBehavior<T> for Idle {}

pub fn idle<T: 'static>(scheduler: &Scheduler) -> SupplierRef<T> {
    BaseSupplier::new(scheduler, "supplier.idle", LEAF, Idle)
}

/// 绑定后立即 end-of-stream。
pub struct Closing;

impl<T: 'static> SupplierBehavior<T> for Closing {
    fn on_started(&self, core: &SupplierCore<T>) {
        core.send_end_of_stream();
    }
}

pub fn closing<T: 'static>(scheduler: &Scheduler) -> SupplierRef<T> {
    BaseSupplier::new(scheduler, "supplier.closing", LEAF, Closing)
}

/// 绑定后立即以给定错误终结。
pub struct ClosingWithError {
    error: RefCell<Option<StreamError>>,
}

impl<T: 'static> SupplierBehavior<T> for ClosingWithError {
    fn on_started(&self, core: &SupplierCore<T>) {
        let error = self.error.borrow_mut().take();
        if let Some(error) = error {
            core.close_with_error(error);
        }
    }
}

pub fn closing_with_error<T: 'static>(scheduler: &Scheduler, error: StreamError) -> SupplierRef<T> {
    BaseSupplier::new(
        scheduler,
        "supplier.closing_with_error",
        LEAF,
        ClosingWithError {
            error: RefCell::new(Some(error)),
        },
    )
}

/// 由 Promise 异步给出的供应方。
///
/// 返回的供应方可以立即绑定；Promise 成功后，其给出的供应方被绑定到内部转发器。
/// 给出的供应方若既未声明 `LATE_BINDING` 又不是在完成所在 tick 创建，绑定失败，流以协议违规终结。
pub fn of_promise<T: 'static>(
    scheduler: &Scheduler,
    promise: Promise<SupplierRef<T>>,
) -> SupplierRef<T> {
    let forwarder = Forwarder::identity(scheduler, "supplier.of_promise");
    let input: ConsumerRef<T> = forwarder.input();
    promise.when_complete(move |result| match result {
        Ok(supplier) => {
            if let Err(error) = bind(supplier, &input) {
                input.close_with_error(error);
            }
        }
        Err(error) => input.close_with_error(error.clone()),
    });
    forwarder.output()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{consumer, promise::SettablePromise};

    #[test]
    fn iterator_yields_after_batch() {
        let scheduler = Scheduler::with_config(crate::config::SchedulerConfig {
            produce_batch: 2,
            ..Default::default()
        })
        .expect("合法配置");
        let source = of_iter(&scheduler, 0..5_u8);
        let sink = consumer::to_list(&scheduler);
        let result = sink.behavior().result();
        let sink: ConsumerRef<u8> = sink;
        bind(&source, &sink).expect("绑定");

        let report = scheduler.run().expect("运行调度器");
        assert_eq!(result.result(), Some(Ok(vec![0, 1, 2, 3, 4])));
        assert!(report.executed >= 3, "五个元素至少分三批生产");
    }

    #[test]
    fn closing_variants_terminate_on_bind() {
        let scheduler = Scheduler::new();
        let ended = closing::<u8>(&scheduler);
        let failing = closing_with_error::<u8>(&scheduler, StreamError::failed("t.fail", "x"));
        let ok_sink: ConsumerRef<u8> = consumer::skip(&scheduler);
        let err_sink: ConsumerRef<u8> = consumer::skip(&scheduler);
        let ok = bind(&ended, &ok_sink).expect("绑定");
        let err = bind(&failing, &err_sink).expect("绑定");

        assert_eq!(scheduler.block_on(ok.completion()), Ok(()));
        assert_eq!(
            scheduler.block_on(err.completion()),
            Err(StreamError::failed("t.fail", "x"))
        );
    }

    #[test]
    fn promised_supplier_streams_once_resolved() {
        let scheduler = Scheduler::new();
        let pending = SettablePromise::new();
        let source = of_promise(&scheduler, pending.promise());
        let sink = consumer::to_list(&scheduler);
        let result = sink.behavior().result();
        let sink: ConsumerRef<u8> = sink;
        bind(&source, &sink).expect("绑定");
        scheduler.run().expect("运行调度器");
        assert!(!result.is_complete());

        let handle = scheduler.clone();
        let setter = pending.clone();
        scheduler.post(move || {
            setter.set_value(of_values(&handle, vec![7, 8]));
        });
        assert_eq!(scheduler.block_on(&result), Ok(vec![7, 8]));
    }
}
