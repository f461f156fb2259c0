//! 动态切换下游消费方。
//!
//! # 教案式说明
//! - **意图 (Why)**：上游供应方已绑定并持续推送，下游消费方却需要在运行时替换（重连、迁移），
//!   替换过程不能打扰上游，也不能丢失或重排数据。
//! - **结构 (How)**：
//!   - 面向上游的输入消费方（`input()`，`LATE_BINDING`，绑定即就绪）；
//!   - 每个下游对应一个内部“馈送”供应方（feed），元素经由当前 feed 的核心 `send` 推给下游；
//!   - 首次切换之前到达的元素缓存在尚未绑定的 feed 中，首次 `switch_to` 直接采用该 feed。
//! - **执行逻辑 (What)**：
//!   1. `switch_to(consumer)`：当前 feed 未绑定时直接绑定；否则新建 feed，把旧 feed 中尚未交付的元素
//!      按序移入新 feed，旧 feed 立即以 end-of-stream 终结，然后才安装新 feed。任一时刻只有一个存活 feed；
//!   2. 背压只由当前 feed 控制：当前 feed 就绪 → 恢复上游，被挂起 → 挂起上游；
//!   3. 上游 end-of-stream 或输入被提前关闭 → 当前 feed `send_end_of_stream`（等待缓冲清空），
//!      该 feed 终结后输入确认；
//!   4. 上游错误 → 以同一错误关闭当前 feed；任一 feed 被下游以错误关闭 → 以同一错误关闭输入；
//!   5. 当前消费方提前离开后到达的元素缓存在新的未绑定 feed 中，等待下一次切换；
//!   6. 目标消费方无法绑定时 `switch_to` 返回错误，切换器状态不变，已缓存的元素留给下一次切换。
//! - **设计权衡 (Trade-offs)**：缓存无上界，调用方需保证切换及时；需要有界语义时可在下游串接桥接组件。

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use tracing::debug;

use crate::{
    base::{
        BaseConsumer, BaseSupplier, ConsumerBehavior, ConsumerCore, SupplierBehavior,
        SupplierCore,
    },
    capability::Capability,
    contract::{ConsumerRef, StreamCompletion, SupplierRef, bind},
    error::StreamError,
    scheduler::Scheduler,
    stats::StatsSnapshot,
};

type SwitcherConsumer<T> = BaseConsumer<T, SwitcherInput<T>>;
type Feed<T> = BaseSupplier<T, SwitchFeed<T>>;

/// 动态切换器句柄。
pub struct StreamSwitcher<T: 'static> {
    input: Rc<SwitcherConsumer<T>>,
}

impl<T: 'static> StreamSwitcher<T> {
    pub fn new(scheduler: &Scheduler) -> Self {
        let input = BaseConsumer::new_cyclic(
            scheduler,
            "switcher.input",
            Capability::LateBinding.into(),
            |this| SwitcherInput {
                this: this.clone(),
                current: RefCell::new(new_feed(scheduler, this, 0)),
                current_id: Cell::new(0),
                next_id: Cell::new(1),
                switches: Cell::new(0),
                upstream_ended: Cell::new(false),
                upstream_error: RefCell::new(None),
            },
        );
        Self { input }
    }

    /// 面向上游的消费方。
    pub fn input(&self) -> ConsumerRef<T> {
        self.input.clone()
    }

    /// 把后续数据切换到 `consumer`。
    pub fn switch_to(&self, consumer: &ConsumerRef<T>) -> Result<StreamCompletion, StreamError> {
        self.input.behavior().switch_to(self.input.core(), consumer)
    }

    /// 已完成的切换次数。
    pub fn switch_count(&self) -> u64 {
        self.input.behavior().switches.get()
    }

    /// 当前 feed 中等待交付的元素数。
    pub fn queued(&self) -> usize {
        self.input.behavior().current.borrow().core().buffered()
    }

    /// 输入端（上游视角）的运行计数。
    pub fn stats(&self) -> StatsSnapshot {
        self.input.stats()
    }
}

impl<T: 'static> Clone for StreamSwitcher<T> {
    fn clone(&self) -> Self {
        Self {
            input: Rc::clone(&self.input),
        }
    }
}

fn new_feed<T: 'static>(
    scheduler: &Scheduler,
    switcher: &Weak<SwitcherConsumer<T>>,
    id: u64,
) -> Rc<Feed<T>> {
    BaseSupplier::new(
        scheduler,
        "switcher.feed",
        Capability::LateBinding | Capability::ImmediateSuspend,
        SwitchFeed {
            switcher: switcher.clone(),
            id,
        },
    )
}

/// 切换器输入端行为，持有全部 feed。
pub struct SwitcherInput<T: 'static> {
    this: Weak<SwitcherConsumer<T>>,
    current: RefCell<Rc<Feed<T>>>,
    current_id: Cell<u64>,
    next_id: Cell<u64>,
    switches: Cell<u64>,
    upstream_ended: Cell<bool>,
    upstream_error: RefCell<Option<StreamError>>,
}

impl<T: 'static> SwitcherInput<T> {
    fn allocate(&self, scheduler: &Scheduler) -> (Rc<Feed<T>>, u64) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        (new_feed(scheduler, &self.this, id), id)
    }

    fn install(&self, feed: Rc<Feed<T>>, id: u64) {
        *self.current.borrow_mut() = feed;
        self.current_id.set(id);
    }

    /// 当前 feed；若已被下游提前终结，则换上新的未绑定 feed 承接后续元素。
    fn live_feed(&self, scheduler: &Scheduler) -> Rc<Feed<T>> {
        let current = self.current.borrow().clone();
        if current.core().is_open() {
            return current;
        }
        let (fresh, id) = self.allocate(scheduler);
        self.install(Rc::clone(&fresh), id);
        fresh
    }

    fn switch_to(
        &self,
        core: &ConsumerCore<T>,
        consumer: &ConsumerRef<T>,
    ) -> Result<StreamCompletion, StreamError> {
        consumer.check_bindable()?;
        let previous = self.current.borrow().clone();
        let reuse = !previous.core().is_bound() && previous.core().is_open();
        let (feed, id) = if reuse {
            (previous, self.current_id.get())
        } else {
            let (feed, id) = self.allocate(core.scheduler());
            let handed_over = previous.core().take_buffered();
            let carried = handed_over.len();
            for item in handed_over {
                feed.core().send(item);
            }
            previous.core().close();
            if carried > 0 {
                debug!(feed = id, carried, "switcher carried queued items to new feed");
            }
            self.install(Rc::clone(&feed), id);
            (feed, id)
        };

        let supplier: SupplierRef<T> = feed.clone();
        let completion = bind(&supplier, consumer)?;

        if !reuse {
            let error = self.upstream_error.borrow().clone();
            if let Some(error) = error {
                feed.core().close_with_error(error);
            } else if self.upstream_ended.get() {
                feed.core().send_end_of_stream();
            }
        }
        if !feed.core().is_ready() {
            core.suspend();
        }
        self.switches.set(self.switches.get() + 1);
        debug!(
            feed = id,
            reused = reuse,
            queued = feed.core().buffered(),
            switches = self.switches.get(),
            "switcher attached consumer"
        );
        Ok(completion)
    }

    fn is_current(&self, id: u64) -> bool {
        self.current_id.get() == id
    }
}

impl<T: 'static> ConsumerBehavior<T> for SwitcherInput<T> {
    fn accept(&self, core: &ConsumerCore<T>, item: T) {
        self.live_feed(core.scheduler()).core().send(item);
    }

    fn on_end_of_stream(&self, core: &ConsumerCore<T>) {
        self.upstream_ended.set(true);
        let feed = self.live_feed(core.scheduler());
        feed.core().send_end_of_stream();
        let this = self.this.clone();
        feed.core().end_of_stream().when_complete(move |result| {
            if let Some(this) = this.upgrade() {
                match result {
                    Ok(()) => this.core().acknowledge(),
                    Err(error) => this.core().close_with_error(error.clone()),
                }
            }
        });
    }

    fn on_closed(&self, core: &ConsumerCore<T>, error: Option<&StreamError>) {
        let current = self.current.borrow().clone();
        match error {
            Some(error) => {
                *self.upstream_error.borrow_mut() = Some(error.clone());
                current.core().close_with_error(error.clone());
            }
            None => {
                self.upstream_ended.set(true);
                if current.core().is_open() {
                    debug!(
                        tick = core.scheduler().tick(),
                        queued = current.core().buffered(),
                        "switcher input closed early"
                    );
                    current.core().send_end_of_stream();
                }
            }
        }
    }
}

/// 内部 feed 行为。
pub struct SwitchFeed<T: 'static> {
    switcher: Weak<SwitcherConsumer<T>>,
    id: u64,
}

impl<T: 'static> SupplierBehavior<T> for SwitchFeed<T> {
    fn produce(&self, _core: &SupplierCore<T>) {
        if let Some(switcher) = self.switcher.upgrade()
            && switcher.behavior().is_current(self.id)
        {
            switcher.core().resume();
        }
    }

    fn on_suspended(&self, _core: &SupplierCore<T>) {
        if let Some(switcher) = self.switcher.upgrade()
            && switcher.behavior().is_current(self.id)
        {
            switcher.core().suspend();
        }
    }

    fn on_closed(&self, _core: &SupplierCore<T>, error: Option<&StreamError>) {
        if let (Some(error), Some(switcher)) = (error, self.switcher.upgrade()) {
            switcher.core().close_with_error(error.clone());
        }
    }
}
