//! 供应方契约。

use std::rc::Rc;

use crate::{
    acceptor::Acceptor, capability::Capabilities, contract::consumer::ConsumerRef,
    error::StreamError, promise::Promise, scheduler::Scheduler,
};

/// 类型擦除的供应方引用。
pub type SupplierRef<T> = Rc<dyn StreamSupplier<T>>;

/// 推送式数据源。
///
/// # 教案式说明
/// - **意图 (Why)**：供应方只在持有 Acceptor 时推送，由消费方通过 `resume`/`suspend` 控制节奏，
///   从而把背压表达为“是否持有回调”这一单一事实。
/// - **契约 (What)**：
///   - `set_consumer` 只能成功一次，重复调用返回
///     [`ProtocolViolation::AlreadyBound`](crate::error::ProtocolViolation::AlreadyBound)；
///     `check_bindable` 给出相同判定但不改变状态；
///   - `resume` 对同一 Acceptor 重复登记、或在终态后调用均为无操作；
///   - `suspend` 清除 Acceptor；声明 `IMMEDIATE_SUSPEND` 的实现在返回后不再推送；
///   - `close` 立即进入 end-of-stream（未交付的缓冲元素被丢弃），`close_with_error` 以错误终结，
///     二者都会传播到已绑定的消费方且幂等；
///   - `end_of_stream` 返回的 Promise 恰好完成一次，可在完成前后任意观察。
/// - **设计权衡 (Trade-offs)**：所有方法只接收 `&self`，实现方以内部可变性管理状态，
///   换取 `Rc<dyn StreamSupplier<T>>` 可在组合子之间自由共享。
pub trait StreamSupplier<T: 'static>: 'static {
    /// 绑定下游消费方。
    fn set_consumer(&self, consumer: ConsumerRef<T>) -> Result<(), StreamError>;

    /// 不改变状态地校验 `set_consumer` 是否会成功。
    fn check_bindable(&self) -> Result<(), StreamError>;

    /// 登记 Acceptor，允许推送。
    fn resume(&self, acceptor: Acceptor<T>);

    /// 收回 Acceptor，停止推送。
    fn suspend(&self);

    /// 以 end-of-stream 立即终结。
    fn close(&self);

    /// 以错误终结。
    fn close_with_error(&self, error: StreamError);

    /// end-of-stream 完成信号。
    fn end_of_stream(&self) -> Promise<()>;

    fn capabilities(&self) -> Capabilities;

    /// 组件所属的调度器。
    fn scheduler(&self) -> Scheduler;
}
