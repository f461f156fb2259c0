//! 供应方/消费方契约与绑定协议。
//!
//! # 教案式说明
//! - **意图 (Why)**：把“谁推送、谁接收、何时完成”抽象成两个对象安全的 trait，
//!   使组合子可以只依赖契约而非具体实现，并以 `Rc<dyn ...>` 在运行时自由拼装；
//! - **结构 (How)**：
//!   - [`supplier`]：`StreamSupplier<T>` 与别名 [`SupplierRef`]；
//!   - [`consumer`]：`StreamConsumer<T>`、带结果的 `StreamConsumerWithResult<T, R>` 与别名 [`ConsumerRef`]；
//!   - [`binding`]：一次性双向绑定与组合完成信号。

pub mod binding;
pub mod consumer;
pub mod supplier;

pub use binding::{StreamCompletion, StreamResult, bind, bind_with_result};
pub use consumer::{ConsumerRef, StreamConsumer, StreamConsumerWithResult};
pub use supplier::{StreamSupplier, SupplierRef};

/// 组件生命周期状态。
///
/// 就绪与挂起是 `Open` 内部的子状态（是否持有 Acceptor），两个终态互斥且只进入一次。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    /// 可继续收发数据。
    Open,
    /// 供应方已发出 end-of-stream，或消费方已确认。
    EndOfStream,
    /// 以错误终结。
    ClosedWithError,
}

impl StreamStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StreamStatus::Open)
    }
}
