//! 消费方契约。

use std::rc::Rc;

use crate::{
    acceptor::Acceptor, capability::Capabilities, contract::supplier::SupplierRef,
    error::StreamError, promise::Promise, scheduler::Scheduler,
};

/// 类型擦除的消费方引用。
pub type ConsumerRef<T> = Rc<dyn StreamConsumer<T>>;

/// 推送式数据汇。
///
/// # 教案式说明
/// - **意图 (Why)**：消费方决定何时就绪，并以 acknowledgement 告知“已处理完全部数据”；
///   绑定方据此与供应方的 end-of-stream 合取出整条链路的完成信号。
/// - **契约 (What)**：
///   - `set_supplier` 只能成功一次，`check_bindable` 给出相同判定但不改变状态；
///   - `data_acceptor` 在绑定时读取一次：返回 `Some` 表示立即就绪，`None` 表示以挂起状态开始，
///     之后由消费方自行 `resume`；
///   - `close` 提前确认（上游随即以 end-of-stream 终结），`close_with_error` 以错误终结并传播给上游；
///   - `acknowledgement` 恰好完成一次。
pub trait StreamConsumer<T: 'static>: 'static {
    /// 绑定上游供应方。
    fn set_supplier(&self, supplier: SupplierRef<T>) -> Result<(), StreamError>;

    /// 不改变状态地校验 `set_supplier` 是否会成功。
    fn check_bindable(&self) -> Result<(), StreamError>;

    /// 绑定时读取的初始 Acceptor。
    fn data_acceptor(&self) -> Option<Acceptor<T>>;

    /// 确认完成信号。
    fn acknowledgement(&self) -> Promise<()>;

    /// 提前确认并终结。
    fn close(&self);

    /// 以错误终结。
    fn close_with_error(&self, error: StreamError);

    fn capabilities(&self) -> Capabilities;

    fn scheduler(&self) -> Scheduler;
}

/// 产出最终结果的消费方（如收集型 Sink）。
pub trait StreamConsumerWithResult<T: 'static, R>: StreamConsumer<T> {
    /// 结果信号：end-of-stream 时成功，出错时失败。
    fn result(&self) -> Promise<R>;
}
