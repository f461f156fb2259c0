//! 消费方基础实现。
//!
//! # 教案式说明
//! - **意图 (Why)**：与 [`super::supplier`] 对称，把绑定检查、就绪声明、确认与错误传播集中在
//!   [`ConsumerCore`]，具体消费方只实现 [`ConsumerBehavior::accept`] 等钩子。
//! - **执行逻辑 (How)**：
//!   - Acceptor 在构造时创建一次并缓存，内部持有宿主弱引用；宿主已终结时到达的元素被丢弃；
//!   - 绑定时登记供应方的 end-of-stream：成功交给 `on_end_of_stream`（默认立即确认），失败则以同一错误关闭自身；
//!   - `acknowledge` 的成功完成以任务形式投递，`close_with_error` 同步生效。
//! - **契约 (What)**：`resume`/`suspend` 表达消费方的就绪声明，并直接转发给已绑定的供应方。

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use tracing::{debug, trace};

use crate::{
    acceptor::Acceptor,
    base::supplier::check_late_binding,
    capability::Capabilities,
    contract::{StreamConsumer, StreamStatus, SupplierRef},
    error::{ProtocolViolation, Role, StreamError},
    promise::{Promise, SettablePromise},
    scheduler::Scheduler,
    stats::{StatsSnapshot, StreamStats},
};

/// 消费方行为钩子。
pub trait ConsumerBehavior<T: 'static>: 'static {
    /// 处理一个元素。
    fn accept(&self, core: &ConsumerCore<T>, item: T);

    /// 绑定时是否以挂起状态开始。
    fn starts_suspended(&self, core: &ConsumerCore<T>) -> bool {
        let _ = core;
        false
    }

    fn on_started(&self, core: &ConsumerCore<T>) {
        let _ = core;
    }

    /// 上游 end-of-stream 成功完成；默认立即确认。
    fn on_end_of_stream(&self, core: &ConsumerCore<T>) {
        core.acknowledge();
    }

    /// 进入终态后调用一次；`error` 为 `None` 表示已确认。
    fn on_closed(&self, core: &ConsumerCore<T>, error: Option<&StreamError>) {
        let _ = (core, error);
    }
}

pub(crate) trait ConsumerDriver: 'static {
    fn started(&self);
    fn supplier_completed(&self, result: &Result<(), StreamError>);
    fn terminated(&self, error: Option<&StreamError>);
}

/// 消费方协议状态。
pub struct ConsumerCore<T: 'static> {
    label: &'static str,
    scheduler: Scheduler,
    created_tick: u64,
    capabilities: Capabilities,
    status: Cell<StreamStatus>,
    bound: Cell<bool>,
    supplier: RefCell<Option<SupplierRef<T>>>,
    acceptor: Acceptor<T>,
    suspended: Cell<bool>,
    acknowledgement: SettablePromise<()>,
    stats: Rc<StreamStats>,
    driver: Weak<dyn ConsumerDriver>,
}

impl<T: 'static> ConsumerCore<T> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn status(&self) -> StreamStatus {
        self.status.get()
    }

    pub fn is_open(&self) -> bool {
        self.status.get() == StreamStatus::Open
    }

    pub fn is_bound(&self) -> bool {
        self.bound.get()
    }

    /// 消费方当前是否声明挂起。
    pub fn is_suspended(&self) -> bool {
        self.suspended.get()
    }

    pub fn supplier(&self) -> Option<SupplierRef<T>> {
        self.supplier.borrow().clone()
    }

    /// 缓存的 Acceptor。
    pub fn acceptor(&self) -> &Acceptor<T> {
        &self.acceptor
    }

    pub fn stats(&self) -> &Rc<StreamStats> {
        &self.stats
    }

    pub fn acknowledgement(&self) -> Promise<()> {
        self.acknowledgement.promise()
    }

    /// 声明就绪并恢复上游。
    pub fn resume(&self) {
        if !self.is_open() {
            return;
        }
        if self.suspended.replace(false) {
            self.stats.record_resumed();
            trace!(component = self.label, "consumer resumed");
        }
        let supplier = self.supplier.borrow().clone();
        if let Some(supplier) = supplier {
            supplier.resume(self.acceptor.clone());
        }
    }

    /// 声明挂起并暂停上游。
    pub fn suspend(&self) {
        if !self.is_open() {
            return;
        }
        if !self.suspended.replace(true) {
            self.stats.record_suspended();
            trace!(component = self.label, "consumer suspended");
        }
        let supplier = self.supplier.borrow().clone();
        if let Some(supplier) = supplier {
            supplier.suspend();
        }
    }

    /// 确认完成；成功信号以任务形式投递。
    pub fn acknowledge(&self) {
        if !self.is_open() {
            return;
        }
        self.status.set(StreamStatus::EndOfStream);
        self.stats.record_completed();
        debug!(
            component = self.label,
            tick = self.scheduler.tick(),
            "consumer acknowledged"
        );
        let promise = self.acknowledgement.clone();
        let supplier = self.supplier.borrow_mut().take();
        self.scheduler.post(move || {
            promise.set(Ok(()));
            drop(supplier);
        });
        if let Some(driver) = self.driver.upgrade() {
            driver.terminated(None);
        }
    }

    /// 以错误终结并立即传播给上游。
    pub fn close_with_error(&self, error: StreamError) {
        if !self.is_open() {
            trace!(
                component = self.label,
                code = error.code(),
                "error ignored after terminal state"
            );
            return;
        }
        self.status.set(StreamStatus::ClosedWithError);
        self.stats.record_error();
        debug!(
            component = self.label,
            code = error.code(),
            %error,
            "consumer closed with error"
        );
        self.acknowledgement.set(Err(error.clone()));
        if let Some(driver) = self.driver.upgrade() {
            driver.terminated(Some(&error));
        }
        let supplier = self.supplier.borrow_mut().take();
        if let Some(supplier) = supplier {
            self.scheduler.post(move || drop(supplier));
        }
    }

    /// 只读地校验能否绑定：未绑定过，且满足跨 tick 绑定约束。
    pub fn check_bindable(&self) -> Result<(), StreamError> {
        if self.bound.get() {
            return Err(ProtocolViolation::AlreadyBound {
                role: Role::Consumer,
                component: self.label,
            }
            .into());
        }
        check_late_binding(
            &self.scheduler,
            self.label,
            self.created_tick,
            self.capabilities,
        )
    }

    fn bind(&self, supplier: SupplierRef<T>) -> Result<(), StreamError> {
        self.check_bindable()?;
        self.bound.set(true);
        self.stats.record_started();
        let end_of_stream = supplier.end_of_stream();
        *self.supplier.borrow_mut() = Some(supplier);
        trace!(component = self.label, "consumer bound");

        if let Some(driver) = self.driver.upgrade() {
            driver.started();
        }
        let driver = self.driver.clone();
        end_of_stream.when_complete(move |result| {
            if let Some(driver) = driver.upgrade() {
                driver.supplier_completed(result);
            }
        });
        Ok(())
    }
}

impl<T: 'static> fmt::Debug for ConsumerCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerCore")
            .field("label", &self.label)
            .field("status", &self.status.get())
            .field("suspended", &self.suspended.get())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// 由 [`ConsumerCore`] 与行为 `B` 组成的消费方。
pub struct BaseConsumer<T: 'static, B> {
    core: ConsumerCore<T>,
    behavior: B,
}

impl<T: 'static, B: ConsumerBehavior<T>> BaseConsumer<T, B> {
    pub fn new(
        scheduler: &Scheduler,
        label: &'static str,
        capabilities: Capabilities,
        behavior: B,
    ) -> Rc<Self> {
        Self::new_cyclic(scheduler, label, capabilities, |_| behavior)
    }

    pub fn new_cyclic(
        scheduler: &Scheduler,
        label: &'static str,
        capabilities: Capabilities,
        build: impl FnOnce(&Weak<Self>) -> B,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let driver: Weak<dyn ConsumerDriver> = this.clone();
            let target = this.clone();
            let acceptor = Acceptor::new(move |item: T| {
                if let Some(consumer) = target.upgrade() {
                    consumer.receive(item);
                }
            });
            Self {
                core: ConsumerCore {
                    label,
                    scheduler: scheduler.clone(),
                    created_tick: scheduler.tick(),
                    capabilities,
                    status: Cell::new(StreamStatus::Open),
                    bound: Cell::new(false),
                    supplier: RefCell::new(None),
                    acceptor,
                    suspended: Cell::new(false),
                    acknowledgement: SettablePromise::new(),
                    stats: Rc::new(StreamStats::default()),
                    driver,
                },
                behavior: build(this),
            }
        })
    }

    pub fn core(&self) -> &ConsumerCore<T> {
        &self.core
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    fn receive(&self, item: T) {
        if !self.core.is_open() {
            trace!(component = self.core.label, "item dropped by closed consumer");
            return;
        }
        self.core.stats.record_item();
        self.behavior.accept(&self.core, item);
    }
}

impl<T: 'static, B: ConsumerBehavior<T>> ConsumerDriver for BaseConsumer<T, B> {
    fn started(&self) {
        self.behavior.on_started(&self.core);
    }

    fn supplier_completed(&self, result: &Result<(), StreamError>) {
        match result {
            Ok(()) => {
                if self.core.is_open() {
                    self.behavior.on_end_of_stream(&self.core);
                }
            }
            Err(error) => self.core.close_with_error(error.clone()),
        }
    }

    fn terminated(&self, error: Option<&StreamError>) {
        self.behavior.on_closed(&self.core, error);
    }
}

impl<T: 'static, B: ConsumerBehavior<T>> StreamConsumer<T> for BaseConsumer<T, B> {
    fn set_supplier(&self, supplier: SupplierRef<T>) -> Result<(), StreamError> {
        self.core.bind(supplier)
    }

    fn check_bindable(&self) -> Result<(), StreamError> {
        self.core.check_bindable()
    }

    fn data_acceptor(&self) -> Option<Acceptor<T>> {
        if !self.core.is_open() {
            return None;
        }
        if self.behavior.starts_suspended(&self.core) {
            self.core.suspended.set(true);
            None
        } else {
            Some(self.core.acceptor.clone())
        }
    }

    fn acknowledgement(&self) -> Promise<()> {
        self.core.acknowledgement()
    }

    fn close(&self) {
        self.core.acknowledge();
    }

    fn close_with_error(&self, error: StreamError) {
        self.core.close_with_error(error);
    }

    fn capabilities(&self) -> Capabilities {
        self.core.capabilities
    }

    fn scheduler(&self) -> Scheduler {
        self.core.scheduler.clone()
    }
}

impl<T: 'static, B> fmt::Debug for BaseConsumer<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseConsumer")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
