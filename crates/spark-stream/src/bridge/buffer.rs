//! 推 → 拉缓冲。
//!
//! # 教案式说明
//! - **执行逻辑 (How)**：
//!   1. 上游元素进入队列；有等待中的 `take` 时直接交给它；
//!   2. 队列长度超过 `high_water_mark` 时挂起上游；
//!   3. `take` 出队后，若上游处于挂起且长度不超过恢复阈值，恢复上游；
//!   4. 上游 end-of-stream 以 [`Slot::End`] 哨兵入队，`take` 取到哨兵返回 `None` 并确认上游，哨兵保留在队首，
//!      后续 `take` 同样返回 `None`；
//!   5. 上游错误清空队列，等待中与后续的 `take` 均以该错误失败。
//! - **契约 (What)**：同一时刻只允许一个未完成的 `take`，否则返回
//!   [`ProtocolViolation::ConcurrentTake`]。

use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
};

use tracing::trace;

use crate::{
    base::{BaseConsumer, ConsumerBehavior, ConsumerCore},
    capability::Capability,
    config::BufferConfig,
    contract::{ConsumerRef, StreamStatus},
    error::{ProtocolViolation, StreamError},
    promise::{Promise, SettablePromise},
    scheduler::Scheduler,
    stats::StatsSnapshot,
};

const LABEL: &str = "bridge.buffer";

enum Slot<T> {
    Item(T),
    End,
}

/// 推 → 拉缓冲句柄。
pub struct StreamBuffer<T: 'static> {
    consumer: Rc<BaseConsumer<T, BufferInput<T>>>,
}

impl<T: 'static> StreamBuffer<T> {
    pub fn new(scheduler: &Scheduler, config: &BufferConfig) -> Self {
        let consumer = BaseConsumer::new(
            scheduler,
            LABEL,
            Capability::LateBinding.into(),
            BufferInput {
                queue: RefCell::new(VecDeque::new()),
                taker: RefCell::new(None),
                error: RefCell::new(None),
                high_water_mark: config.high_water_mark,
                resume_threshold: config.resume_threshold(),
            },
        );
        Self { consumer }
    }

    /// 面向上游的消费方。
    pub fn consumer(&self) -> ConsumerRef<T> {
        self.consumer.clone()
    }

    /// 取出下一个元素；`None` 表示上游已 end-of-stream。
    pub fn take(&self) -> Promise<Option<T>> {
        self.consumer.behavior().take(self.consumer.core())
    }

    /// 队列中的元素数（不含 end-of-stream 哨兵）。
    pub fn len(&self) -> usize {
        self.consumer
            .behavior()
            .queue
            .borrow()
            .iter()
            .filter(|slot| matches!(slot, Slot::Item(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 上游当前是否被挂起。
    pub fn is_suspended(&self) -> bool {
        self.consumer.core().is_suspended()
    }

    /// 以错误终结，错误同步传播给上游。
    pub fn close_with_error(&self, error: StreamError) {
        self.consumer.core().close_with_error(error);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.consumer.stats()
    }
}

impl<T: 'static> Clone for StreamBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            consumer: Rc::clone(&self.consumer),
        }
    }
}

/// 缓冲的消费方行为。
pub struct BufferInput<T: 'static> {
    queue: RefCell<VecDeque<Slot<T>>>,
    taker: RefCell<Option<SettablePromise<Option<T>>>>,
    error: RefCell<Option<StreamError>>,
    high_water_mark: usize,
    resume_threshold: usize,
}

impl<T: 'static> BufferInput<T> {
    fn take(&self, core: &ConsumerCore<T>) -> Promise<Option<T>> {
        if self.taker.borrow().is_some() {
            return Promise::failed(ProtocolViolation::ConcurrentTake { component: LABEL });
        }
        let error = self.error.borrow().clone();
        if let Some(error) = error {
            return Promise::failed(error);
        }

        let slot = self.queue.borrow_mut().pop_front();
        match slot {
            Some(Slot::Item(item)) => {
                let remaining = self.queue.borrow().len();
                if core.is_suspended() && remaining <= self.resume_threshold {
                    trace!(component = LABEL, remaining, "buffer drained below threshold");
                    core.resume();
                }
                Promise::ready(Some(item))
            }
            Some(Slot::End) => {
                self.queue.borrow_mut().push_front(Slot::End);
                core.acknowledge();
                Promise::ready(None)
            }
            None if core.status() == StreamStatus::EndOfStream => Promise::ready(None),
            None => {
                let taker = SettablePromise::new();
                *self.taker.borrow_mut() = Some(taker.clone());
                if core.is_suspended() {
                    core.resume();
                }
                taker.promise()
            }
        }
    }
}

impl<T: 'static> ConsumerBehavior<T> for BufferInput<T> {
    fn accept(&self, core: &ConsumerCore<T>, item: T) {
        let taker = self.taker.borrow_mut().take();
        if let Some(taker) = taker {
            taker.set_value(Some(item));
            return;
        }
        let len = {
            let mut queue = self.queue.borrow_mut();
            queue.push_back(Slot::Item(item));
            queue.len()
        };
        if len > self.high_water_mark && !core.is_suspended() {
            trace!(component = LABEL, len, "buffer above high water mark");
            core.suspend();
        }
    }

    fn on_end_of_stream(&self, core: &ConsumerCore<T>) {
        let taker = self.taker.borrow_mut().take();
        self.queue.borrow_mut().push_back(Slot::End);
        if let Some(taker) = taker {
            core.acknowledge();
            taker.set_value(None);
        }
    }

    fn on_closed(&self, _core: &ConsumerCore<T>, error: Option<&StreamError>) {
        let Some(error) = error else {
            return;
        };
        *self.error.borrow_mut() = Some(error.clone());
        let dropped = std::mem::take(&mut *self.queue.borrow_mut());
        drop(dropped);
        let taker = self.taker.borrow_mut().take();
        if let Some(taker) = taker {
            taker.set_error(error.clone());
        }
    }
}
