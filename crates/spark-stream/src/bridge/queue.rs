//! 拉 → 推队列。
//!
//! # 教案式说明
//! - **执行逻辑 (How)**：`add`/`put` 经由供应方核心的 `send` 推送：下游就绪时直接交付，否则进入核心缓冲；
//!   下游恢复后缓冲按序冲刷，冲刷完毕触发 `produce` 钩子，此时释放所有等待中的 `put`。
//! - **契约 (What)**：
//!   - `put` 在缓冲不超过 `high_water_mark` 时立即完成，否则等到缓冲清空；
//!   - 终结后（含已请求 end-of-stream）再推送返回 [`ProtocolViolation::PushAfterTerminal`]；
//!   - 流正常结束时等待中的 `put` 成功完成，以错误终结时以同一错误失败。

use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
};

use tracing::trace;

use crate::{
    base::{BaseSupplier, SupplierBehavior, SupplierCore},
    capability::Capability,
    config::BufferConfig,
    contract::SupplierRef,
    error::{ProtocolViolation, StreamError},
    promise::{Promise, SettablePromise},
    scheduler::Scheduler,
    stats::StatsSnapshot,
};

const LABEL: &str = "bridge.queue";

/// 拉 → 推队列句柄。
pub struct StreamQueue<T: 'static> {
    supplier: Rc<BaseSupplier<T, QueueOutput>>,
}

impl<T: 'static> StreamQueue<T> {
    pub fn new(scheduler: &Scheduler, config: &BufferConfig) -> Self {
        let supplier = BaseSupplier::new(
            scheduler,
            LABEL,
            Capability::LateBinding | Capability::ImmediateSuspend,
            QueueOutput {
                waiters: RefCell::new(VecDeque::new()),
                high_water_mark: config.high_water_mark,
            },
        );
        Self { supplier }
    }

    /// 面向下游的供应方。
    pub fn supplier(&self) -> SupplierRef<T> {
        self.supplier.clone()
    }

    /// 入队，不等待；终结后返回 `false`。
    pub fn add(&self, item: T) -> bool {
        if !self.accepting() {
            trace!(component = LABEL, "add after terminal state rejected");
            return false;
        }
        self.supplier.core().send(item);
        true
    }

    /// 入队；缓冲超过高水位时返回的 Promise 等到缓冲清空才完成。
    pub fn put(&self, item: T) -> Promise<()> {
        if !self.accepting() {
            return Promise::failed(ProtocolViolation::PushAfterTerminal { component: LABEL });
        }
        let core = self.supplier.core();
        core.send(item);
        let behavior = self.supplier.behavior();
        if core.buffered() <= behavior.high_water_mark {
            return Promise::ready(());
        }
        let waiter = SettablePromise::new();
        behavior.waiters.borrow_mut().push_back(waiter.clone());
        waiter.promise()
    }

    /// 请求 end-of-stream；已入队的元素仍会交付。
    pub fn send_end_of_stream(&self) {
        self.supplier.core().send_end_of_stream();
    }

    pub fn close_with_error(&self, error: StreamError) {
        self.supplier.core().close_with_error(error);
    }

    /// 尚未交付的元素数。
    pub fn len(&self) -> usize {
        self.supplier.core().buffered()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.supplier.stats()
    }

    fn accepting(&self) -> bool {
        let core = self.supplier.core();
        core.is_open() && !core.is_end_requested()
    }
}

impl<T: 'static> Clone for StreamQueue<T> {
    fn clone(&self) -> Self {
        Self {
            supplier: Rc::clone(&self.supplier),
        }
    }
}

/// 队列的供应方行为。
pub struct QueueOutput {
    waiters: RefCell<VecDeque<SettablePromise<()>>>,
    high_water_mark: usize,
}

impl QueueOutput {
    fn release(&self, result: Result<(), StreamError>) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        if !waiters.is_empty() {
            trace!(component = LABEL, released = waiters.len(), "queue waiters released");
        }
        for waiter in waiters {
            waiter.set(result.clone());
        }
    }
}

impl<T: 'static> SupplierBehavior<T> for QueueOutput {
    fn produce(&self, _core: &SupplierCore<T>) {
        self.release(Ok(()));
    }

    fn on_closed(&self, _core: &SupplierCore<T>, error: Option<&StreamError>) {
        match error {
            Some(error) => self.release(Err(error.clone())),
            None => self.release(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::SupplierExt;

    #[test]
    fn put_waits_until_downstream_drains() {
        let scheduler = Scheduler::new();
        let queue = StreamQueue::new(&scheduler, &BufferConfig::with_high_water_mark(1));
        assert!(queue.put(1_u32).is_complete());
        let blocked = queue.put(2);
        assert!(!blocked.is_complete(), "超过高水位的 put 需要等待");

        let result = queue.supplier().to_list().expect("绑定");
        scheduler.run_until(&blocked).expect("运行调度器");
        assert_eq!(blocked.result(), Some(Ok(())));

        queue.send_end_of_stream();
        assert_eq!(scheduler.block_on(&result), Ok(vec![1, 2]));
        assert!(!queue.add(3));
        assert!(matches!(
            queue.put(4).error(),
            Some(StreamError::Protocol(ProtocolViolation::PushAfterTerminal { .. }))
        ));
    }
}
