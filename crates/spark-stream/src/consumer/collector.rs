//! 收集型终端 Sink。
//!
//! # 教案式说明
//! - **意图 (Why)**：绝大多数流最终要被折叠为一个值（列表、计数、聚合），Sink 需要把“流完成”
//!   翻译为“结果可用”。
//! - **契约 (What)**：
//!   - 声明 `TERMINAL | LATE_BINDING`，可在任意 tick 绑定；
//!   - 上游 end-of-stream 时以 `finish(acc)` 完成结果，再确认；出错时结果以同一错误失败；
//!   - 被提前 `close()` 时以已累积的部分完成结果；
//!   - 一次性使用，再次绑定返回协议违规。
//! - **设计权衡 (Trade-offs)**：折叠函数以 `FnMut(&mut A, T)` 表达，避免每个元素搬移累加器。

use std::{cell::RefCell, rc::Rc};

use crate::{
    base::{BaseConsumer, ConsumerBehavior, ConsumerCore},
    capability::Capability,
    contract::StreamConsumerWithResult,
    error::StreamError,
    promise::{Promise, SettablePromise},
    scheduler::Scheduler,
};

type Fold<T, A> = Box<dyn FnMut(&mut A, T)>;
type Finish<A, R> = Box<dyn FnOnce(A) -> R>;

/// 收集型 Sink。
pub type ToCollector<T, A, R> = BaseConsumer<T, Collector<T, A, R>>;

/// 折叠行为。
pub struct Collector<T: 'static, A: 'static, R: 'static> {
    accumulator: RefCell<Option<A>>,
    fold: RefCell<Fold<T, A>>,
    finish: RefCell<Option<Finish<A, R>>>,
    result: SettablePromise<R>,
}

impl<T: 'static, A: 'static, R: 'static> Collector<T, A, R> {
    pub fn new(
        init: A,
        fold: impl FnMut(&mut A, T) + 'static,
        finish: impl FnOnce(A) -> R + 'static,
    ) -> Self {
        Self {
            accumulator: RefCell::new(Some(init)),
            fold: RefCell::new(Box::new(fold)),
            finish: RefCell::new(Some(Box::new(finish))),
            result: SettablePromise::new(),
        }
    }

    /// 结果信号。
    pub fn result(&self) -> Promise<R> {
        self.result.promise()
    }

    fn complete(&self) {
        let accumulator = self.accumulator.borrow_mut().take();
        let finish = self.finish.borrow_mut().take();
        if let (Some(accumulator), Some(finish)) = (accumulator, finish) {
            self.result.set_value(finish(accumulator));
        }
    }
}

impl<T: 'static, A: 'static, R: 'static> ConsumerBehavior<T> for Collector<T, A, R> {
    fn accept(&self, _core: &ConsumerCore<T>, item: T) {
        let mut accumulator = self.accumulator.borrow_mut();
        if let Some(accumulator) = accumulator.as_mut() {
            (self.fold.borrow_mut())(accumulator, item);
        }
    }

    fn on_end_of_stream(&self, core: &ConsumerCore<T>) {
        self.complete();
        core.acknowledge();
    }

    fn on_closed(&self, _core: &ConsumerCore<T>, error: Option<&StreamError>) {
        match error {
            Some(error) => {
                self.accumulator.borrow_mut().take();
                self.result.set_error(error.clone());
            }
            None => self.complete(),
        }
    }
}

impl<T: 'static, A: 'static, R: 'static> StreamConsumerWithResult<T, R> for ToCollector<T, A, R> {
    fn result(&self) -> Promise<R> {
        self.behavior().result()
    }
}

/// 以自定义折叠构造 Sink。
pub fn to_collector<T: 'static, A: 'static, R: 'static>(
    scheduler: &Scheduler,
    init: A,
    fold: impl FnMut(&mut A, T) + 'static,
    finish: impl FnOnce(A) -> R + 'static,
) -> Rc<ToCollector<T, A, R>> {
    BaseConsumer::new(
        scheduler,
        "consumer.to_collector",
        Capability::Terminal | Capability::LateBinding,
        Collector::new(init, fold, finish),
    )
}

/// 按到达顺序收集为 `Vec<T>`。
pub fn to_list<T: 'static>(scheduler: &Scheduler) -> Rc<ToCollector<T, Vec<T>, Vec<T>>> {
    BaseConsumer::new(
        scheduler,
        "consumer.to_list",
        Capability::Terminal | Capability::LateBinding,
        Collector::new(Vec::new(), |list: &mut Vec<T>, item| list.push(item), |list| list),
    )
}
