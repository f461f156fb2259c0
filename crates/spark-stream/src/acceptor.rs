//! 数据接收器（Acceptor）。
//!
//! # 教案式说明
//! - **意图 (Why)**：背压协议的最小交付单元。消费方声明就绪时把 Acceptor 交给供应方，
//!   供应方此后只通过它推送单个元素；挂起即“收回” Acceptor。
//! - **契约 (What)**：
//!   - `accept` 一次交付一个元素，所有权随之转移；
//!   - Acceptor 可廉价克隆，克隆体与原件“同一性”相同（[`Acceptor::same`]），
//!     供应方据此判断重复 `resume` 是否为无操作。
//! - **设计权衡 (Trade-offs)**：内部使用 `Rc<dyn Fn(T)>`，仅适用于单线程调度器；
//!   以 `Fn` 而非 `FnMut` 约束回调，要求实现方通过 `Cell`/`RefCell` 管理内部状态，避免借用跨越回调。

use std::{fmt, rc::Rc};

/// 单操作回调：“把这个元素推到这里”。
pub struct Acceptor<T> {
    callback: Rc<dyn Fn(T)>,
}

impl<T: 'static> Acceptor<T> {
    pub fn new(callback: impl Fn(T) + 'static) -> Self {
        Self {
            callback: Rc::new(callback),
        }
    }

    /// 交付一个元素。
    pub fn accept(&self, item: T) {
        (self.callback)(item)
    }

    /// 判断两个 Acceptor 是否指向同一个回调实例。
    pub fn same(&self, other: &Acceptor<T>) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.callback), Rc::as_ptr(&other.callback))
    }
}

impl<T> Clone for Acceptor<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Rc::clone(&self.callback),
        }
    }
}

impl<T> fmt::Debug for Acceptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("callback", &Rc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn clones_share_identity() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let acceptor = Acceptor::new(move |item: u32| sink.borrow_mut().push(item));
        let clone = acceptor.clone();
        let other = Acceptor::new(|_: u32| {});

        acceptor.accept(1);
        clone.accept(2);

        assert!(acceptor.same(&clone));
        assert!(!acceptor.same(&other));
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }
}
