//! # scheduler 模块说明
//!
//! ## 角色定位（Why）
//! - 流引擎的所有回调（Acceptor 调用、Promise 续体、resume/suspend 触发的生产）都运行在同一条逻辑任务队列上；
//! - 通过“投递而非直接调用”打断同步递归：供应方在 `resume` 时只投递一次生产任务，终态完成信号也以任务形式投递，
//!   避免仍在调用栈上的代码同步观察到自己触发的终态。
//!
//! ## 契约（What）
//! - [`Scheduler`] 是可廉价克隆的句柄，克隆体共享同一队列；
//! - 每执行一个任务，`tick` 加一；组件记录创建时的 tick，用于判断是否发生“跨 tick 绑定”；
//! - 计时器基于逻辑时钟：队列空闲时，时钟直接推进到下一个未取消计时器的截止时间，测试无需真实等待。
//!
//! ## 注意事项（Trade-offs）
//! - 逻辑时钟只在空闲时推进，因此计时器永远不会抢占已就绪任务；对超时装饰器而言这是期望语义；
//! - 调度器不是 `Send`，只能在创建它的线程上驱动；跨线程协作需由宿主在外层桥接。

use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    fmt,
    rc::Rc,
    time::Duration,
};

use tracing::{debug, trace, warn};

use crate::{
    config::{ConfigError, SchedulerConfig},
    error::{ProtocolViolation, StreamError},
    promise::Promise,
};

type Task = Box<dyn FnOnce()>;

/// 单线程协作式调度器句柄。
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    queue: RefCell<VecDeque<Task>>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    next_timer_id: Cell<u64>,
    tick: Cell<u64>,
    now: Cell<Duration>,
    running: Cell<bool>,
}

struct TimerEntry {
    deadline: Duration,
    id: u64,
    cancelled: Rc<Cell<bool>>,
    task: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // BinaryHeap 是大顶堆，这里反转比较使最早截止、最先登记的计时器位于堆顶。
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// 计时器取消句柄。
#[derive(Clone, Debug)]
pub struct TimerHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TimerHandle {
    /// 取消计时器；已触发或已取消时为无操作。
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// 单次 `run` 的执行统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// 执行的任务数（含计时器任务）。
    pub executed: u64,
    /// 触发的计时器数。
    pub timers_fired: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::from_config(SchedulerConfig::default())
    }

    /// 以自定义配置创建；非法配置（如 `produce_batch == 0`）以 [`ConfigError`] 拒绝。
    pub fn with_config(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                config,
                queue: RefCell::new(VecDeque::new()),
                timers: RefCell::new(BinaryHeap::new()),
                next_timer_id: Cell::new(0),
                tick: Cell::new(0),
                now: Cell::new(Duration::ZERO),
                running: Cell::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// 已执行的任务数。组件以此识别自己的创建 tick。
    pub fn tick(&self) -> u64 {
        self.inner.tick.get()
    }

    /// 逻辑时钟当前读数。
    pub fn now(&self) -> Duration {
        self.inner.now.get()
    }

    /// 投递一个任务到队尾。
    pub fn post(&self, task: impl FnOnce() + 'static) {
        self.inner.queue.borrow_mut().push_back(Box::new(task));
    }

    /// 在逻辑时钟推进 `delay` 之后执行任务。
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerHandle {
        let id = self.inner.next_timer_id.get();
        self.inner.next_timer_id.set(id + 1);
        let cancelled = Rc::new(Cell::new(false));
        let deadline = self.now().saturating_add(delay);
        trace!(timer = id, ?deadline, "timer scheduled");
        self.inner.timers.borrow_mut().push(TimerEntry {
            deadline,
            id,
            cancelled: Rc::clone(&cancelled),
            task: Box::new(task),
        });
        TimerHandle { cancelled }
    }

    /// 队列中待执行的任务数（不含计时器）。
    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// 队列为空且没有存活的计时器。
    pub fn is_idle(&self) -> bool {
        self.inner.queue.borrow().is_empty()
            && self
                .inner
                .timers
                .borrow()
                .iter()
                .all(|entry| entry.cancelled.get())
    }

    /// 执行全部任务与计时器，直到调度器空闲。
    pub fn run(&self) -> Result<RunReport, StreamError> {
        self.drive(|| false)
    }

    /// 执行任务直到 `promise` 完成或调度器空闲。
    pub fn run_until<T: 'static>(&self, promise: &Promise<T>) -> Result<RunReport, StreamError> {
        self.drive(|| promise.is_complete())
    }

    /// 驱动调度器直到 `promise` 完成并返回其结果。
    ///
    /// 调度器空闲而 Promise 仍未完成时返回 [`StreamError::Stalled`]。
    pub fn block_on<T: Clone + 'static>(&self, promise: &Promise<T>) -> Result<T, StreamError> {
        self.run_until(promise)?;
        promise.result().unwrap_or(Err(StreamError::Stalled))
    }

    fn drive(&self, mut done: impl FnMut() -> bool) -> Result<RunReport, StreamError> {
        if self.inner.running.replace(true) {
            warn!("scheduler driven re-entrantly");
            return Err(ProtocolViolation::ReentrantRun.into());
        }
        let _guard = RunningGuard(&self.inner.running);
        let mut report = RunReport::default();
        let budget = self.inner.config.max_ticks_per_run;
        while !done() {
            if let Some(limit) = budget
                && report.executed >= limit
            {
                warn!(limit, "scheduler tick budget exhausted");
                return Err(StreamError::TickBudgetExhausted(limit));
            }
            match self.step() {
                Step::Task => report.executed += 1,
                Step::Timer => {
                    report.executed += 1;
                    report.timers_fired += 1;
                }
                Step::Idle => break,
            }
        }
        debug!(
            executed = report.executed,
            timers = report.timers_fired,
            tick = self.tick(),
            "scheduler run finished"
        );
        Ok(report)
    }

    fn step(&self) -> Step {
        let task = self.inner.queue.borrow_mut().pop_front();
        if let Some(task) = task {
            self.execute(task);
            return Step::Task;
        }
        loop {
            let entry = self.inner.timers.borrow_mut().pop();
            let Some(entry) = entry else {
                return Step::Idle;
            };
            if entry.cancelled.get() {
                continue;
            }
            if entry.deadline > self.now() {
                self.inner.now.set(entry.deadline);
            }
            entry.cancelled.set(true);
            trace!(timer = entry.id, now = ?self.now(), "timer fired");
            self.execute(entry.task);
            return Step::Timer;
        }
    }

    fn execute(&self, task: Task) {
        self.inner.tick.set(self.inner.tick.get() + 1);
        task();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick", &self.tick())
            .field("now", &self.now())
            .field("pending_tasks", &self.pending_tasks())
            .field("timers", &self.inner.timers.borrow().len())
            .finish()
    }
}

enum Step {
    Task,
    Timer,
    Idle,
}

struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_in_post_order_and_advance_tick() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for index in 0..3 {
            let log = Rc::clone(&log);
            let handle = scheduler.clone();
            scheduler.post(move || log.borrow_mut().push((index, handle.tick())));
        }
        let report = scheduler.run().expect("运行调度器");
        assert_eq!(report.executed, 3);
        assert_eq!(*log.borrow(), vec![(0, 1), (1, 2), (2, 3)]);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn nested_posts_run_after_current_queue() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let log = Rc::clone(&log);
            let handle = scheduler.clone();
            scheduler.post(move || {
                log.borrow_mut().push("outer");
                let inner_log = Rc::clone(&log);
                handle.post(move || inner_log.borrow_mut().push("nested"));
            });
        }
        {
            let log = Rc::clone(&log);
            scheduler.post(move || log.borrow_mut().push("sibling"));
        }
        scheduler.run().expect("运行调度器");
        assert_eq!(*log.borrow(), vec!["outer", "sibling", "nested"]);
    }

    #[test]
    fn timers_advance_logical_clock_only_when_idle() {
        let scheduler = Scheduler::new();
        let fired = Rc::new(RefCell::new(Vec::new()));
        for (delay, label) in [(30, "late"), (10, "early")] {
            let fired = Rc::clone(&fired);
            let handle = scheduler.clone();
            scheduler.schedule(Duration::from_millis(delay), move || {
                fired.borrow_mut().push((label, handle.now()))
            });
        }
        let cancelled = scheduler.schedule(Duration::from_millis(20), || {
            panic!("已取消的计时器不应触发")
        });
        cancelled.cancel();

        let report = scheduler.run().expect("运行调度器");
        assert_eq!(report.timers_fired, 2);
        assert_eq!(
            *fired.borrow(),
            vec![
                ("early", Duration::from_millis(10)),
                ("late", Duration::from_millis(30)),
            ]
        );
    }

    #[test]
    fn reentrant_run_is_rejected() {
        let scheduler = Scheduler::new();
        let outcome = Rc::new(RefCell::new(None));
        {
            let outcome = Rc::clone(&outcome);
            let handle = scheduler.clone();
            scheduler.post(move || *outcome.borrow_mut() = Some(handle.run()));
        }
        scheduler.run().expect("外层运行");
        let inner = outcome.borrow_mut().take().expect("任务已执行");
        assert_eq!(
            inner.expect_err("内层运行应失败"),
            StreamError::Protocol(ProtocolViolation::ReentrantRun)
        );
    }

    #[test]
    fn tick_budget_catches_livelock() {
        let scheduler = Scheduler::with_config(SchedulerConfig {
            max_ticks_per_run: Some(16),
            ..SchedulerConfig::default()
        })
        .expect("合法配置");
        fn spin(scheduler: Scheduler) {
            let next = scheduler.clone();
            scheduler.post(move || spin(next));
        }
        spin(scheduler.clone());
        assert_eq!(
            scheduler.run().expect_err("活锁应耗尽预算"),
            StreamError::TickBudgetExhausted(16)
        );
    }

    #[test]
    fn zero_produce_batch_is_rejected() {
        let error = Scheduler::with_config(SchedulerConfig {
            produce_batch: 0,
            ..SchedulerConfig::default()
        })
        .err()
        .expect("零批量应被拒绝");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                field: "scheduler.produce_batch",
                ..
            }
        ));
    }
}
