//! 转发器：输入消费方 + 输出供应方。
//!
//! # 教案式说明
//! - **意图 (Why)**：迟绑定包装、`map`/`filter` 变换、Promise 形式的供应方/消费方都需要同一种结构：
//!   一端作为消费方接收上游，另一端作为供应方推给下游，中间逐元素变换。
//! - **执行逻辑 (How)**：
//!   - 输出就绪（缓冲清空后 `produce`）→ 恢复输入；输出被挂起 → 挂起输入；
//!   - 输入每交付一个元素后若输出不再就绪，立即挂起输入，避免在输出缓冲中堆积；
//!   - 上游 end-of-stream → 输出 `send_end_of_stream`；输出终结 → 输入确认；
//!   - 任一端以错误终结 → 以同一错误关闭另一端。
//! - **契约 (What)**：输入、输出都声明 `LATE_BINDING`，可以在任意 tick 与外部组件绑定。
//! - **设计权衡 (Trade-offs)**：输出强引用输入、输入弱引用输出；只持有输入的调用方需保证输出已被下游持有。

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use crate::{
    base::{
        BaseConsumer, BaseSupplier, ConsumerBehavior, ConsumerCore, SupplierBehavior,
        SupplierCore,
    },
    capability::Capability,
    contract::{ConsumerRef, SupplierRef},
    error::StreamError,
    scheduler::Scheduler,
};

type Transform<I, O> = Box<dyn FnMut(I) -> Option<O>>;
type OutputSupplier<I, O> = BaseSupplier<O, ForwardOutput<I, O>>;

/// 输入端行为。
pub struct ForwardInput<I: 'static, O: 'static> {
    output: Weak<OutputSupplier<I, O>>,
    transform: RefCell<Transform<I, O>>,
}

/// 输出端行为。
pub struct ForwardOutput<I: 'static, O: 'static> {
    input: Rc<BaseConsumer<I, ForwardInput<I, O>>>,
}

/// 成对的输入消费方与输出供应方。
pub struct Forwarder<I: 'static, O: 'static> {
    output: Rc<OutputSupplier<I, O>>,
}

impl<I: 'static, O: 'static> Forwarder<I, O> {
    /// 以逐元素变换构造；变换返回 `None` 时丢弃该元素。
    pub fn new(
        scheduler: &Scheduler,
        label: &'static str,
        transform: impl FnMut(I) -> Option<O> + 'static,
    ) -> Self {
        let transform: Transform<I, O> = Box::new(transform);
        let output = BaseSupplier::new_cyclic(
            scheduler,
            label,
            Capability::LateBinding | Capability::ImmediateSuspend,
            |this| {
                let input = BaseConsumer::new(
                    scheduler,
                    label,
                    Capability::LateBinding.into(),
                    ForwardInput {
                        output: this.clone(),
                        transform: RefCell::new(transform),
                    },
                );
                ForwardOutput { input }
            },
        );
        Self { output }
    }

    pub fn input(&self) -> ConsumerRef<I> {
        self.output.behavior().input.clone()
    }

    pub fn output(&self) -> SupplierRef<O> {
        self.output.clone()
    }
}

impl<T: 'static> Forwarder<T, T> {
    /// 恒等转发，即迟绑定包装。
    pub fn identity(scheduler: &Scheduler, label: &'static str) -> Self {
        Self::new(scheduler, label, Some)
    }
}

impl<I: 'static, O: 'static> ConsumerBehavior<I> for ForwardInput<I, O> {
    fn accept(&self, core: &ConsumerCore<I>, item: I) {
        let Some(output) = self.output.upgrade() else {
            return;
        };
        let mapped = (self.transform.borrow_mut())(item);
        if let Some(mapped) = mapped {
            output.core().send(mapped);
        }
        if !output.core().is_ready() {
            core.suspend();
        }
    }

    fn starts_suspended(&self, _core: &ConsumerCore<I>) -> bool {
        self.output
            .upgrade()
            .is_none_or(|output| !output.core().is_ready())
    }

    fn on_end_of_stream(&self, _core: &ConsumerCore<I>) {
        if let Some(output) = self.output.upgrade() {
            output.core().send_end_of_stream();
        }
    }

    fn on_closed(&self, _core: &ConsumerCore<I>, error: Option<&StreamError>) {
        let Some(output) = self.output.upgrade() else {
            return;
        };
        match error {
            Some(error) => output.core().close_with_error(error.clone()),
            None => output.core().close(),
        }
    }
}

impl<I: 'static, O: 'static> SupplierBehavior<O> for ForwardOutput<I, O> {
    fn produce(&self, _core: &SupplierCore<O>) {
        self.input.core().resume();
    }

    fn on_suspended(&self, _core: &SupplierCore<O>) {
        self.input.core().suspend();
    }

    fn on_closed(&self, _core: &SupplierCore<O>, error: Option<&StreamError>) {
        match error {
            Some(error) => self.input.core().close_with_error(error.clone()),
            None => self.input.core().acknowledge(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{consumer, contract::bind, supplier};

    #[test]
    fn transform_drops_filtered_items() {
        let scheduler = Scheduler::new();
        let forwarder = Forwarder::new(&scheduler, "test.forwarder", |value: u32| {
            (value % 2 == 0).then_some(value * 10)
        });
        let source = supplier::of_iter(&scheduler, 1..=6_u32);
        bind(&source, &forwarder.input()).expect("绑定上游");
        let sink = consumer::to_list(&scheduler);
        let result = sink.behavior().result();
        let sink: ConsumerRef<u32> = sink;
        let completion = bind(&forwarder.output(), &sink).expect("绑定下游");

        assert_eq!(scheduler.block_on(&result), Ok(vec![20, 40, 60]));
        assert_eq!(scheduler.block_on(completion.completion()), Ok(()));
    }
}
