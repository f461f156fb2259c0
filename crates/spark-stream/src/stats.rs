//! 组件级运行计数。
//!
//! # 教案式说明
//! - **意图 (Why)**：运维侧需要读取每个组合子实例的挂起/恢复次数、错误数、启动/完成数，
//!   但引擎本身不能绑定任何监控技术；因此只提供只读计数与可序列化快照。
//! - **契约 (What)**：
//!   - [`StreamStats`] 由组件核心持有（`Rc` 共享），计数只增不减；
//!   - [`StatsSnapshot`] 为 `Copy` 快照，派生 `serde::Serialize`，由宿主决定导出格式；
//!   - [`StatsRegistry`] 是显式对象而非全局表，只保存弱引用，组件销毁后在下一次快照时自动剔除。
//! - **设计权衡 (Trade-offs)**：单线程场景下使用 `Cell<u64>`，零同步开销；跨线程导出需先取快照再发送。

use std::{
    borrow::Cow,
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use serde::Serialize;

/// 单个组件的运行计数。
#[derive(Debug, Default)]
pub struct StreamStats {
    started: Cell<u64>,
    resumed: Cell<u64>,
    suspended: Cell<u64>,
    items: Cell<u64>,
    errors: Cell<u64>,
    completed: Cell<u64>,
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get().saturating_add(1));
}

impl StreamStats {
    pub(crate) fn record_started(&self) {
        bump(&self.started);
    }

    pub(crate) fn record_resumed(&self) {
        bump(&self.resumed);
    }

    pub(crate) fn record_suspended(&self) {
        bump(&self.suspended);
    }

    pub(crate) fn record_item(&self) {
        bump(&self.items);
    }

    pub(crate) fn record_error(&self) {
        bump(&self.errors);
    }

    pub(crate) fn record_completed(&self) {
        bump(&self.completed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started: self.started.get(),
            resumed: self.resumed.get(),
            suspended: self.suspended.get(),
            items: self.items.get(),
            errors: self.errors.get(),
            completed: self.completed.get(),
        }
    }
}

/// 计数快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// 完成绑定的次数（每个组件至多一次）。
    pub started: u64,
    /// 从挂起进入就绪的次数。
    pub resumed: u64,
    /// 从就绪进入挂起的次数。
    pub suspended: u64,
    /// 经由 Acceptor 交付的元素数。
    pub items: u64,
    /// 以错误终结的次数。
    pub errors: u64,
    /// 正常终结的次数。
    pub completed: u64,
}

/// 显式的计数注册表。
#[derive(Debug, Default)]
pub struct StatsRegistry {
    entries: RefCell<Vec<(Cow<'static, str>, Weak<StreamStats>)>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以名称登记一个组件的计数；同名登记会并存，快照中按登记顺序出现。
    pub fn register(&self, name: impl Into<Cow<'static, str>>, stats: &Rc<StreamStats>) {
        self.entries
            .borrow_mut()
            .push((name.into(), Rc::downgrade(stats)));
    }

    /// 当前存活组件数（会先剔除已销毁的条目）。
    pub fn len(&self) -> usize {
        self.prune();
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取全部存活组件的快照。
    pub fn snapshot(&self) -> Vec<(Cow<'static, str>, StatsSnapshot)> {
        self.prune();
        self.entries
            .borrow()
            .iter()
            .filter_map(|(name, stats)| {
                stats
                    .upgrade()
                    .map(|stats| (name.clone(), stats.snapshot()))
            })
            .collect()
    }

    fn prune(&self) {
        self.entries
            .borrow_mut()
            .retain(|(_, stats)| stats.strong_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_drops_dead_components() {
        let registry = StatsRegistry::new();
        let live = Rc::new(StreamStats::default());
        live.record_started();
        live.record_item();
        {
            let short_lived = Rc::new(StreamStats::default());
            registry.register("short", &short_lived);
        }
        registry.register("live", &live);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "live");
        assert_eq!(snapshot[0].1.items, 1);
        assert_eq!(registry.len(), 1);
    }
}
