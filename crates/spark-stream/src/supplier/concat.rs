//! 顺序拼接多个供应方。
//!
//! # 教案式说明
//! - **意图 (Why)**：把有序的供应方列表呈现为单个供应方，下游只看到一次绑定、一条有序序列。
//! - **执行逻辑 (How)**：
//!   1. 构造时把每个来源包装为迟绑定转发器，来源本身在创建 tick 内完成绑定；
//!   2. 拼接器就绪且没有活动来源时，弹出下一个来源，绑定到内部直通消费方 [`ConcatInput`]；
//!   3. 直通消费方把元素交给拼接器核心 `send`；拼接器不再就绪时挂起当前来源；
//!   4. 当前来源 end-of-stream 后确认并丢弃它，拼接器就绪则立即绑定下一个，否则等待下一次 `produce`；
//!      列表耗尽即 end-of-stream。
//! - **契约 (What)**：
//!   - `suspend` 转发给活动来源；
//!   - 终结（`close` 或 `close_with_error`）只转发给活动来源；尚未开始的来源直接丢弃，不向其发送任何信号；
//!   - 空列表在绑定后立即 end-of-stream，不等待 Acceptor。

use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::{Rc, Weak},
};

use tracing::debug;

use crate::{
    base::{
        BaseConsumer, BaseSupplier, ConsumerBehavior, ConsumerCore, SupplierBehavior,
        SupplierCore,
    },
    capability::Capability,
    contract::{ConsumerRef, SupplierRef, bind},
    error::StreamError,
    ext::SupplierExt,
    scheduler::Scheduler,
};

type ConcatSupplier<T> = BaseSupplier<T, Concat<T>>;
type ConcatConsumer<T> = BaseConsumer<T, ConcatInput<T>>;

/// 拼接器行为。
pub struct Concat<T: 'static> {
    this: Weak<ConcatSupplier<T>>,
    pending: RefCell<VecDeque<SupplierRef<T>>>,
    active: RefCell<Option<Rc<ConcatConsumer<T>>>>,
}

/// 把来源拼接为一个供应方。
///
/// 任一来源已被绑定时返回
/// [`ProtocolViolation::AlreadyBound`](crate::error::ProtocolViolation::AlreadyBound)。
pub fn concat<T: 'static>(
    scheduler: &Scheduler,
    sources: impl IntoIterator<Item = SupplierRef<T>>,
) -> Result<SupplierRef<T>, StreamError> {
    let pending = sources
        .into_iter()
        .map(|source| source.with_late_binding())
        .collect::<Result<VecDeque<_>, _>>()?;
    debug!(sources = pending.len(), "concat assembled");
    let supplier: SupplierRef<T> = BaseSupplier::new_cyclic(
        scheduler,
        "supplier.concat",
        Capability::LateBinding | Capability::ImmediateSuspend,
        |this| Concat {
            this: this.clone(),
            pending: RefCell::new(pending),
            active: RefCell::new(None),
        },
    );
    Ok(supplier)
}

impl<T: 'static> Concat<T> {
    /// 尚未开始的来源数。
    pub fn remaining(&self) -> usize {
        self.pending.borrow().len()
    }

    fn advance(&self, core: &SupplierCore<T>) {
        let next = self.pending.borrow_mut().pop_front();
        let Some(next) = next else {
            core.send_end_of_stream();
            return;
        };
        let input = BaseConsumer::new(
            core.scheduler(),
            "supplier.concat.input",
            Capability::LateBinding.into(),
            ConcatInput {
                output: self.this.clone(),
            },
        );
        *self.active.borrow_mut() = Some(Rc::clone(&input));
        let input: ConsumerRef<T> = input;
        if let Err(error) = bind(&next, &input) {
            core.close_with_error(error);
        }
    }

    fn source_finished(&self, core: &SupplierCore<T>) {
        self.active.borrow_mut().take();
        if core.is_ready() {
            self.advance(core);
        }
    }
}

impl<T: 'static> SupplierBehavior<T> for Concat<T> {
    fn on_started(&self, core: &SupplierCore<T>) {
        if self.pending.borrow().is_empty() {
            core.send_end_of_stream();
        }
    }

    fn produce(&self, core: &SupplierCore<T>) {
        let active = self.active.borrow().clone();
        match active {
            Some(input) => input.core().resume(),
            None => self.advance(core),
        }
    }

    fn on_suspended(&self, _core: &SupplierCore<T>) {
        let active = self.active.borrow().clone();
        if let Some(input) = active {
            input.core().suspend();
        }
    }

    fn on_closed(&self, _core: &SupplierCore<T>, error: Option<&StreamError>) {
        let active = self.active.borrow_mut().take();
        let abandoned = std::mem::take(&mut *self.pending.borrow_mut());
        if !abandoned.is_empty() {
            debug!(abandoned = abandoned.len(), "concat dropped sources never started");
        }
        let Some(input) = active else {
            return;
        };
        match error {
            Some(error) => input.core().close_with_error(error.clone()),
            None => input.core().acknowledge(),
        }
    }
}

/// 拼接器内部的直通消费方。
pub struct ConcatInput<T: 'static> {
    output: Weak<ConcatSupplier<T>>,
}

impl<T: 'static> ConsumerBehavior<T> for ConcatInput<T> {
    fn accept(&self, core: &ConsumerCore<T>, item: T) {
        let Some(output) = self.output.upgrade() else {
            return;
        };
        output.core().send(item);
        if !output.core().is_ready() {
            core.suspend();
        }
    }

    fn starts_suspended(&self, _core: &ConsumerCore<T>) -> bool {
        self.output
            .upgrade()
            .is_none_or(|output| !output.core().is_ready())
    }

    fn on_end_of_stream(&self, core: &ConsumerCore<T>) {
        core.acknowledge();
        if let Some(output) = self.output.upgrade() {
            output.behavior().source_finished(output.core());
        }
    }

    fn on_closed(&self, _core: &ConsumerCore<T>, error: Option<&StreamError>) {
        if let (Some(error), Some(output)) = (error, self.output.upgrade()) {
            output.core().close_with_error(error.clone());
        }
    }
}
