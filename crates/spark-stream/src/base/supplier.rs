//! 供应方基础实现：状态核心 + 行为钩子。
//!
//! # 教案式说明
//! - **意图 (Why)**：所有供应方共享同一套协议细节（绑定检查、Acceptor 管理、缓冲与冲刷、终态只进入一次、
//!   与消费方 acknowledgement 的交叉关闭）。把这些集中在 [`SupplierCore`]，具体组件只需实现
//!   [`SupplierBehavior`] 的少数钩子。
//! - **结构 (How)**：
//!   - [`BaseSupplier<T, B>`] = `SupplierCore<T>` + 行为 `B`，实现 [`StreamSupplier`]；
//!   - 核心通过私有的 [`SupplierDriver`] 弱引用回调宿主，驱动 `produce`/`on_closed` 钩子；
//!   - `resume` 只投递一次生产任务（`produce_posted` 标志），任务中先冲刷缓冲，缓冲清空且仍就绪才调用 `produce`。
//! - **契约 (What)**：
//!   - `send` 在未就绪、冲刷中或缓冲非空时入缓冲，保证推送顺序；
//!   - 冲刷每交付一个元素都重新读取 Acceptor，`suspend` 之后不会再交付；
//!   - `send_end_of_stream` 等缓冲清空后才真正终结，end-of-stream 的成功完成以任务形式投递；
//!   - `close_with_error` 同步生效：清空缓冲、失败完成信号，并在返回前传播到消费方。
//! - **设计权衡 (Trade-offs)**：终态后对端引用在投递的任务中释放，以打断 `Rc` 环；
//!   代价是对端对象的析构推迟一个 tick。

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt, mem,
    rc::{Rc, Weak},
};

use tracing::{debug, trace};

use crate::{
    acceptor::Acceptor,
    capability::{Capabilities, Capability},
    contract::{ConsumerRef, StreamStatus, StreamSupplier},
    error::{ProtocolViolation, Role, StreamError},
    promise::{Promise, SettablePromise},
    scheduler::Scheduler,
    stats::{StatsSnapshot, StreamStats},
};

/// 供应方行为钩子。
///
/// 所有钩子都在调度器线程上执行，实现方通过 `core` 推送数据或终结流。
pub trait SupplierBehavior<T: 'static>: 'static {
    /// 绑定完成后调用一次。
    fn on_started(&self, core: &SupplierCore<T>) {
        let _ = core;
    }

    /// 供应方就绪且缓冲已清空时调用；实现应在 `core.is_ready()` 为真时持续 `send`。
    fn produce(&self, core: &SupplierCore<T>) {
        let _ = core;
    }

    /// Acceptor 被收回后调用。
    fn on_suspended(&self, core: &SupplierCore<T>) {
        let _ = core;
    }

    /// 进入终态后调用一次；`error` 为 `None` 表示 end-of-stream。
    fn on_closed(&self, core: &SupplierCore<T>, error: Option<&StreamError>) {
        let _ = (core, error);
    }
}

pub(crate) trait SupplierDriver: 'static {
    fn drive(&self);
    fn started(&self);
    fn terminated(&self, error: Option<&StreamError>);
    fn peer_acknowledged(&self, result: &Result<(), StreamError>);
}

/// 供应方协议状态。
pub struct SupplierCore<T: 'static> {
    label: &'static str,
    scheduler: Scheduler,
    created_tick: u64,
    capabilities: Capabilities,
    status: Cell<StreamStatus>,
    bound: Cell<bool>,
    consumer: RefCell<Option<ConsumerRef<T>>>,
    acceptor: RefCell<Option<Acceptor<T>>>,
    buffer: RefCell<VecDeque<T>>,
    end_requested: Cell<bool>,
    flushing: Cell<bool>,
    produce_posted: Rc<Cell<bool>>,
    end_of_stream: SettablePromise<()>,
    stats: Rc<StreamStats>,
    driver: Weak<dyn SupplierDriver>,
}

impl<T: 'static> SupplierCore<T> {
    fn new(
        scheduler: &Scheduler,
        label: &'static str,
        capabilities: Capabilities,
        driver: Weak<dyn SupplierDriver>,
    ) -> Self {
        Self {
            label,
            scheduler: scheduler.clone(),
            created_tick: scheduler.tick(),
            capabilities,
            status: Cell::new(StreamStatus::Open),
            bound: Cell::new(false),
            consumer: RefCell::new(None),
            acceptor: RefCell::new(None),
            buffer: RefCell::new(VecDeque::new()),
            end_requested: Cell::new(false),
            flushing: Cell::new(false),
            produce_posted: Rc::new(Cell::new(false)),
            end_of_stream: SettablePromise::new(),
            stats: Rc::new(StreamStats::default()),
            driver,
        }
    }

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

    /// 是否已请求 end-of-stream（可能仍在等待缓冲清空）。
    pub fn is_end_requested(&self) -> bool {
        self.end_requested.get()
    }

    /// 开放、持有 Acceptor 且尚未请求 end-of-stream。
    pub fn is_ready(&self) -> bool {
        self.is_open() && !self.end_requested.get() && self.acceptor.borrow().is_some()
    }

    /// 尚未交付的缓冲元素数。
    pub fn buffered(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// 取走尚未交付的缓冲元素，交由其他供应方按原顺序接续推送。
    pub fn take_buffered(&self) -> VecDeque<T> {
        mem::take(&mut *self.buffer.borrow_mut())
    }

    pub fn consumer(&self) -> Option<ConsumerRef<T>> {
        self.consumer.borrow().clone()
    }

    pub fn stats(&self) -> &Rc<StreamStats> {
        &self.stats
    }

    pub fn end_of_stream(&self) -> Promise<()> {
        self.end_of_stream.promise()
    }

    /// 推送一个元素：就绪时直接交付，否则进入缓冲。
    pub fn send(&self, item: T) {
        if !self.is_open() || self.end_requested.get() {
            trace!(component = self.label, "item dropped after end of stream");
            return;
        }
        if !self.flushing.get() && self.buffer.borrow().is_empty() {
            let acceptor = self.acceptor.borrow().clone();
            if let Some(acceptor) = acceptor {
                self.stats.record_item();
                acceptor.accept(item);
                return;
            }
        }
        self.buffer.borrow_mut().push_back(item);
    }

    /// 请求 end-of-stream；缓冲清空后才真正终结。
    pub fn send_end_of_stream(&self) {
        if !self.is_open() || self.end_requested.replace(true) {
            return;
        }
        if self.flushing.get() {
            return;
        }
        if self.buffer.borrow().is_empty() {
            self.complete_end_of_stream();
        } else {
            trace!(
                component = self.label,
                buffered = self.buffered(),
                "end of stream deferred until buffer drains"
            );
            self.request_produce();
        }
    }

    /// 以错误终结并立即传播。
    pub fn close_with_error(&self, error: StreamError) {
        self.fail(error);
    }

    /// 立即以 end-of-stream 终结，丢弃缓冲。
    pub fn close(&self) {
        if !self.is_open() {
            return;
        }
        let dropped = mem::take(&mut *self.buffer.borrow_mut());
        if !dropped.is_empty() {
            debug!(
                component = self.label,
                dropped = dropped.len(),
                "buffered items discarded by close"
            );
        }
        self.end_requested.set(true);
        self.complete_end_of_stream();
    }

    /// 投递一次生产任务；已有待执行的生产任务时为无操作。
    pub fn request_produce(&self) {
        if !self.is_open() || self.produce_posted.replace(true) {
            return;
        }
        let posted = Rc::clone(&self.produce_posted);
        let driver = self.driver.clone();
        self.scheduler.post(move || {
            posted.set(false);
            if let Some(driver) = driver.upgrade() {
                driver.drive();
            }
        });
    }

    /// 只读地校验能否绑定：未绑定过，且满足跨 tick 绑定约束。
    pub fn check_bindable(&self) -> Result<(), StreamError> {
        if self.bound.get() {
            return Err(ProtocolViolation::AlreadyBound {
                role: Role::Supplier,
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

    fn bind(&self, consumer: ConsumerRef<T>) -> Result<(), StreamError> {
        self.check_bindable()?;
        self.bound.set(true);
        self.stats.record_started();
        let acknowledgement = consumer.acknowledgement();
        *self.consumer.borrow_mut() = Some(consumer);
        trace!(component = self.label, "supplier bound");

        if let Some(driver) = self.driver.upgrade() {
            driver.started();
        }
        let driver = self.driver.clone();
        acknowledgement.when_complete(move |result| {
            if let Some(driver) = driver.upgrade() {
                driver.peer_acknowledged(result);
            }
        });
        Ok(())
    }

    fn resume(&self, acceptor: Acceptor<T>) -> bool {
        if !self.is_open() {
            return false;
        }
        {
            let mut current = self.acceptor.borrow_mut();
            if current
                .as_ref()
                .is_some_and(|existing| existing.same(&acceptor))
            {
                return false;
            }
            *current = Some(acceptor);
        }
        self.stats.record_resumed();
        trace!(component = self.label, "supplier resumed");
        true
    }

    fn suspend(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        let previous = self.acceptor.borrow_mut().take();
        if previous.is_none() {
            return false;
        }
        self.stats.record_suspended();
        trace!(component = self.label, "supplier suspended");
        true
    }

    fn flush(&self) {
        if self.flushing.replace(true) {
            return;
        }
        loop {
            let acceptor = self.acceptor.borrow().clone();
            let Some(acceptor) = acceptor else {
                break;
            };
            let item = self.buffer.borrow_mut().pop_front();
            let Some(item) = item else {
                break;
            };
            self.stats.record_item();
            acceptor.accept(item);
        }
        self.flushing.set(false);
        if self.is_open() && self.end_requested.get() && self.buffer.borrow().is_empty() {
            self.complete_end_of_stream();
        }
    }

    fn complete_end_of_stream(&self) {
        self.status.set(StreamStatus::EndOfStream);
        self.acceptor.borrow_mut().take();
        self.stats.record_completed();
        debug!(
            component = self.label,
            tick = self.scheduler.tick(),
            "supplier reached end of stream"
        );
        let promise = self.end_of_stream.clone();
        let consumer = self.consumer.borrow_mut().take();
        self.scheduler.post(move || {
            promise.set(Ok(()));
            drop(consumer);
        });
        if let Some(driver) = self.driver.upgrade() {
            driver.terminated(None);
        }
    }

    fn fail(&self, error: StreamError) {
        if !self.is_open() {
            trace!(
                component = self.label,
                code = error.code(),
                "error ignored after terminal state"
            );
            return;
        }
        self.status.set(StreamStatus::ClosedWithError);
        self.acceptor.borrow_mut().take();
        let dropped = mem::take(&mut *self.buffer.borrow_mut());
        self.stats.record_error();
        debug!(
            component = self.label,
            code = error.code(),
            dropped = dropped.len(),
            %error,
            "supplier closed with error"
        );
        drop(dropped);
        self.end_of_stream.set(Err(error.clone()));
        if let Some(driver) = self.driver.upgrade() {
            driver.terminated(Some(&error));
        }
        let consumer = self.consumer.borrow_mut().take();
        if let Some(consumer) = consumer {
            self.scheduler.post(move || drop(consumer));
        }
    }
}

impl<T: 'static> fmt::Debug for SupplierCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupplierCore")
            .field("label", &self.label)
            .field("status", &self.status.get())
            .field("ready", &self.is_ready())
            .field("buffered", &self.buffered())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// 校验跨 tick 绑定；供应方与消费方核心共用。
pub(crate) fn check_late_binding(
    scheduler: &Scheduler,
    label: &'static str,
    created: u64,
    capabilities: Capabilities,
) -> Result<(), StreamError> {
    let bound = scheduler.tick();
    if bound != created && !capabilities.contains(Capability::LateBinding) {
        tracing::warn!(
            component = label,
            created,
            bound,
            "binding outside creation tick"
        );
        return Err(ProtocolViolation::LateBinding {
            component: label,
            created,
            bound,
        }
        .into());
    }
    Ok(())
}

/// 由 [`SupplierCore`] 与行为 `B` 组成的供应方。
pub struct BaseSupplier<T: 'static, B> {
    core: SupplierCore<T>,
    behavior: B,
}

impl<T: 'static, B: SupplierBehavior<T>> BaseSupplier<T, B> {
    pub fn new(
        scheduler: &Scheduler,
        label: &'static str,
        capabilities: Capabilities,
        behavior: B,
    ) -> Rc<Self> {
        Self::new_cyclic(scheduler, label, capabilities, |_| behavior)
    }

    /// 构造时向行为暴露自身弱引用，供需要回指宿主的组合子使用。
    pub fn new_cyclic(
        scheduler: &Scheduler,
        label: &'static str,
        capabilities: Capabilities,
        build: impl FnOnce(&Weak<Self>) -> B,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let driver: Weak<dyn SupplierDriver> = this.clone();
            Self {
                core: SupplierCore::new(scheduler, label, capabilities, driver),
                behavior: build(this),
            }
        })
    }

    pub fn core(&self) -> &SupplierCore<T> {
        &self.core
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }
}

impl<T: 'static, B: SupplierBehavior<T>> SupplierDriver for BaseSupplier<T, B> {
    fn drive(&self) {
        if !self.core.is_open() {
            return;
        }
        self.core.flush();
        if self.core.is_ready() && self.core.buffered() == 0 {
            self.behavior.produce(&self.core);
        }
    }

    fn started(&self) {
        self.behavior.on_started(&self.core);
    }

    fn terminated(&self, error: Option<&StreamError>) {
        self.behavior.on_closed(&self.core, error);
    }

    fn peer_acknowledged(&self, result: &Result<(), StreamError>) {
        match result {
            Ok(()) => self.core.close(),
            Err(error) => self.core.fail(error.clone()),
        }
    }
}

impl<T: 'static, B: SupplierBehavior<T>> StreamSupplier<T> for BaseSupplier<T, B> {
    fn set_consumer(&self, consumer: ConsumerRef<T>) -> Result<(), StreamError> {
        self.core.bind(consumer)
    }

    fn check_bindable(&self) -> Result<(), StreamError> {
        self.core.check_bindable()
    }

    fn resume(&self, acceptor: Acceptor<T>) {
        if self.core.resume(acceptor) {
            self.core.request_produce();
        }
    }

    fn suspend(&self) {
        if self.core.suspend() {
            self.behavior.on_suspended(&self.core);
        }
    }

    fn close(&self) {
        self.core.close();
    }

    fn close_with_error(&self, error: StreamError) {
        self.core.fail(error);
    }

    fn end_of_stream(&self) -> Promise<()> {
        self.core.end_of_stream()
    }

    fn capabilities(&self) -> Capabilities {
        self.core.capabilities
    }

    fn scheduler(&self) -> Scheduler {
        self.core.scheduler.clone()
    }
}

impl<T: 'static, B> fmt::Debug for BaseSupplier<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseSupplier")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
