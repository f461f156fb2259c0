//! 叶子消费方与收集型 Sink。
//!
//! - [`of_fn`] / [`of_try_fn`]：逐元素回调，后者返回错误时以该错误终结整条流；
//! - [`skip`]：丢弃全部元素；
//! - [`idle`]：以挂起状态开始且永不恢复，只在上游结束时确认；
//! - [`closing_with_error`]：绑定即失败；
//! - [`of_promise`]：消费方由 Promise 异步给出；
//! - [`collector`]：`to_list`、`to_collector` 等终端 Sink。

pub mod collector;

pub use collector::{Collector, ToCollector, to_collector, to_list};

use std::cell::RefCell;

use crate::{
    base::{BaseConsumer, ConsumerBehavior, ConsumerCore},
    capability::Capabilities,
    contract::{ConsumerRef, SupplierRef, bind},
    error::StreamError,
    forwarder::Forwarder,
    promise::Promise,
    scheduler::Scheduler,
};

/// 逐元素回调。
pub struct OfFn<F> {
    callback: RefCell<F>,
}

impl<T: 'static, F: FnMut(T) + 'static> ConsumerBehavior<T> for OfFn<F> {
    fn accept(&self, _core: &ConsumerCore<T>, item: T) {
        (self.callback.borrow_mut())(item);
    }
}

pub fn of_fn<T: 'static>(
    scheduler: &Scheduler,
    callback: impl FnMut(T) + 'static,
) -> ConsumerRef<T> {
    BaseConsumer::new(
        scheduler,
        "consumer.of_fn",
        Capabilities::EMPTY,
        OfFn {
            callback: RefCell::new(callback),
        },
    )
}

/// 可失败的逐元素回调。
pub struct OfTryFn<F> {
    callback: RefCell<F>,
}

impl<T, F> ConsumerBehavior<T> for OfTryFn<F>
where
    T: 'static,
    F: FnMut(T) -> Result<(), StreamError> + 'static,
{
    fn accept(&self, core: &ConsumerCore<T>, item: T) {
        let outcome = (self.callback.borrow_mut())(item);
        if let Err(error) = outcome {
            core.close_with_error(error);
        }
    }
}

pub fn of_try_fn<T: 'static>(
    scheduler: &Scheduler,
    callback: impl FnMut(T) -> Result<(), StreamError> + 'static,
) -> ConsumerRef<T> {
    BaseConsumer::new(
        scheduler,
        "consumer.of_try_fn",
        Capabilities::EMPTY,
        OfTryFn {
            callback: RefCell::new(callback),
        },
    )
}

/// 丢弃全部元素。
pub fn skip<T: 'static>(scheduler: &Scheduler) -> ConsumerRef<T> {
    of_fn(scheduler, drop)
}

/// 永不就绪的消费方。
pub struct Idle;

impl<T: 'static> ConsumerBehavior<T> for Idle {
    fn accept(&self, _core: &ConsumerCore<T>, _item: T) {}

    fn starts_suspended(&self, _core: &ConsumerCore<T>) -> bool {
        true
    }
}

pub fn idle<T: 'static>(scheduler: &Scheduler) -> ConsumerRef<T> {
    BaseConsumer::new(scheduler, "consumer.idle", Capabilities::EMPTY, Idle)
}

/// 绑定即以给定错误终结。
pub struct ClosingWithError {
    error: RefCell<Option<StreamError>>,
}

impl<T: 'static> ConsumerBehavior<T> for ClosingWithError {
    fn accept(&self, _core: &ConsumerCore<T>, _item: T) {}

    fn starts_suspended(&self, _core: &ConsumerCore<T>) -> bool {
        true
    }

    fn on_started(&self, core: &ConsumerCore<T>) {
        let error = self.error.borrow_mut().take();
        if let Some(error) = error {
            core.close_with_error(error);
        }
    }
}

pub fn closing_with_error<T: 'static>(scheduler: &Scheduler, error: StreamError) -> ConsumerRef<T> {
    BaseConsumer::new(
        scheduler,
        "consumer.closing_with_error",
        Capabilities::EMPTY,
        ClosingWithError {
            error: RefCell::new(Some(error)),
        },
    )
}

/// 由 Promise 异步给出的消费方。
///
/// 返回的消费方可立即绑定，元素在内部转发器中等待，直到 Promise 给出真正的消费方。
pub fn of_promise<T: 'static>(
    scheduler: &Scheduler,
    promise: Promise<ConsumerRef<T>>,
) -> ConsumerRef<T> {
    let forwarder = Forwarder::identity(scheduler, "consumer.of_promise");
    let output: SupplierRef<T> = forwarder.output();
    promise.when_complete(move |result| match result {
        Ok(consumer) => {
            if let Err(error) = bind(&output, consumer) {
                output.close_with_error(error);
            }
        }
        Err(error) => output.close_with_error(error.clone()),
    });
    forwarder.input()
}
